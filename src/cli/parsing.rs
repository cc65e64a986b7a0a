//! CLI parsing helpers for clap value parsers.

use crate::features::TagExpression;

pub(super) fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("{s} is not a valid number"))?;
    if (1..=super::MAX_CONCURRENCY).contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "concurrency must be between 1 and {}",
            super::MAX_CONCURRENCY
        ))
    }
}

/// Validate a tag expression while keeping its source text.
pub(super) fn parse_tags(s: &str) -> Result<String, String> {
    s.parse::<TagExpression>()
        .map(|_| s.trim().to_owned())
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", Ok(1))]
    #[case("64", Ok(64))]
    #[case("0", Err("concurrency must be between 1 and 64"))]
    #[case("65", Err("concurrency must be between 1 and 64"))]
    #[case("many", Err("many is not a valid number"))]
    fn concurrency_is_bounded(#[case] input: &str, #[case] expected: Result<usize, &str>) {
        assert_eq!(parse_concurrency(input), expected.map_err(str::to_owned));
    }

    #[rstest]
    fn tags_are_validated() {
        assert_eq!(parse_tags(" @smoke,~@slow "), Ok("@smoke,~@slow".to_owned()));
        assert!(parse_tags("@a && ").is_err());
    }
}
