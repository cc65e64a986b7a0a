//! Tag filter expressions.
//!
//! The syntax follows godog: `,` separates alternatives, `&&` joins groups
//! that must all hold and `~` negates a single tag. `@wip,@smoke && ~@slow`
//! selects scenarios tagged `wip` or `smoke` that are not tagged `slow`.

use super::normalise_tag;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    tag: String,
    negated: bool,
}

impl Term {
    fn holds(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| *t == self.tag) != self.negated
    }
}

/// Parsed tag filter. The empty expression selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagExpression {
    groups: Vec<Vec<Term>>,
    source: String,
}

/// Error for a malformed tag expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tag expression '{expression}': {reason}")]
pub struct TagExpressionError {
    /// Expression as given.
    pub expression: String,
    /// What is wrong with it.
    pub reason: &'static str,
}

impl TagExpression {
    /// Return `true` when `tags` satisfy the expression.
    #[must_use]
    pub fn matches(&self, tags: &[String]) -> bool {
        self.groups
            .iter()
            .all(|group| group.iter().any(|term| term.holds(tags)))
    }

    /// Return `true` when the expression selects everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl FromStr for TagExpression {
    type Err = TagExpressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| TagExpressionError {
            expression: s.to_owned(),
            reason,
        };
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut groups = Vec::new();
        for group in s.split("&&") {
            let mut terms = Vec::new();
            for raw in group.split(',') {
                let term = raw.trim();
                let (negated, body) = term
                    .strip_prefix('~')
                    .map_or((false, term), |rest| (true, rest.trim()));
                let tag = normalise_tag(body);
                if tag.is_empty() {
                    return Err(invalid("empty tag"));
                }
                if tag.chars().any(char::is_whitespace) {
                    return Err(invalid("tags cannot contain spaces"));
                }
                terms.push(Term { tag, negated });
            }
            groups.push(terms);
        }
        Ok(Self {
            groups,
            source: s.trim().to_owned(),
        })
    }
}

impl fmt::Display for TagExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| (*t).to_owned()).collect()
    }

    #[rstest]
    #[case("", &[], true)]
    #[case("@wip", &["wip"], true)]
    #[case("@wip", &["smoke"], false)]
    #[case("@wip,@smoke", &["smoke"], true)]
    #[case("~@slow", &["wip"], true)]
    #[case("~@slow", &["slow"], false)]
    #[case("@wip && ~@slow", &["wip", "slow"], false)]
    #[case("@wip,@smoke && ~@slow", &["smoke"], true)]
    #[case("wip && smoke", &["wip"], false)]
    fn expressions_select_scenarios(
        #[case] expression: &str,
        #[case] scenario_tags: &[&str],
        #[case] expected: bool,
    ) {
        let parsed: TagExpression = expression.parse().expect("valid expression");
        assert_eq!(parsed.matches(&tags(scenario_tags)), expected);
    }

    #[rstest]
    #[case("@wip,")]
    #[case("~")]
    #[case("@wip && ")]
    #[case("@two words")]
    fn malformed_expressions_are_rejected(#[case] expression: &str) {
        assert!(expression.parse::<TagExpression>().is_err());
    }

    #[test]
    fn display_keeps_the_source() {
        let parsed: TagExpression = " @a,@b ".parse().expect("valid");
        assert_eq!(parsed.to_string(), "@a,@b");
        assert!(!parsed.is_empty());
    }
}
