//! Output mode detection for scenario reporting.
//!
//! Accessible mode writes one static, labelled line per scenario; standard
//! mode may animate a progress bar. The mode is forced with `--accessible` or
//! inferred from `NO_COLOR` and `TERM`.

use std::env;

/// How scenario progress is rendered on the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Static labelled lines, suitable for screen readers, dumb terminals
    /// and CI logs.
    Accessible,
    /// Standard terminal output with an optional progress bar.
    Standard,
}

impl OutputMode {
    /// Return `true` when the mode is [`Accessible`](OutputMode::Accessible).
    #[must_use]
    pub const fn is_accessible(self) -> bool {
        matches!(self, Self::Accessible)
    }
}

/// Resolve the output mode from the `--accessible` flag and the environment.
///
/// An explicit flag wins. Otherwise `NO_COLOR` (any value, even empty) or
/// `TERM=dumb` select accessible output.
///
/// ```
/// use campus_bdd::output_mode::{OutputMode, resolve};
///
/// assert_eq!(resolve(Some(true)), OutputMode::Accessible);
/// assert_eq!(resolve(Some(false)), OutputMode::Standard);
/// ```
#[must_use]
pub fn resolve(explicit: Option<bool>) -> OutputMode {
    resolve_with(explicit, |key| env::var(key).ok())
}

/// [`resolve`] with an injectable environment lookup.
#[must_use]
pub fn resolve_with<F>(explicit: Option<bool>, read_env: F) -> OutputMode
where
    F: Fn(&str) -> Option<String>,
{
    let accessible = explicit.unwrap_or_else(|| {
        read_env("NO_COLOR").is_some() || read_env("TERM").as_deref() == Some("dumb")
    });
    if accessible {
        OutputMode::Accessible
    } else {
        OutputMode::Standard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::forced_on(Some(true), None, None, OutputMode::Accessible)]
    #[case::forced_off_beats_env(Some(false), Some("1"), Some("dumb"), OutputMode::Standard)]
    #[case::no_color(None, Some(""), None, OutputMode::Accessible)]
    #[case::dumb_term(None, None, Some("dumb"), OutputMode::Accessible)]
    #[case::colour_term(None, None, Some("xterm-256color"), OutputMode::Standard)]
    #[case::nothing_set(None, None, None, OutputMode::Standard)]
    fn mode_follows_flag_then_environment(
        #[case] explicit: Option<bool>,
        #[case] no_color: Option<&str>,
        #[case] term: Option<&str>,
        #[case] expected: OutputMode,
    ) {
        let mode = resolve_with(explicit, |key| match key {
            "NO_COLOR" => no_color.map(String::from),
            "TERM" => term.map(String::from),
            _ => None,
        });
        assert_eq!(mode, expected);
        assert_eq!(mode.is_accessible(), expected == OutputMode::Accessible);
    }
}
