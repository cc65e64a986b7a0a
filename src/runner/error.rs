//! Error types for the runner module.
//!
//! This submodule isolates derive-macro-affected code to scope lint suppressions
//! narrowly. The `unused_assignments` lint fires in some Rust versions due to
//! thiserror/miette derive macro expansion.

// Scoped suppression for version-dependent lint false positives from
// miette/thiserror derive macros. The unused_assignments lint fires in some
// Rust versions but not others. Since `#[expect]` fails when the lint doesn't
// fire, and `unfulfilled_lint_expectations` cannot be expected, we must use
// `#[allow]` here.
// FIXME(rust-lang/rust#130021): remove once upstream is fixed.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised during command execution.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// No suite is registered under the requested service name.
    #[error("unknown service '{name}'")]
    #[diagnostic(
        code(campus_bdd::runner::unknown_service),
        help("available services: {available}")
    )]
    UnknownService {
        /// Requested name.
        name: String,
        /// Comma-separated list of known services.
        available: String,
    },
    /// Loaded features contain lines matching several patterns.
    #[error("{count} step line(s) match more than one pattern")]
    #[diagnostic(
        code(campus_bdd::runner::ambiguous_steps),
        help("run `campus-bdd lint` to list them")
    )]
    AmbiguousSteps {
        /// Number of offending lines.
        count: usize,
    },
    /// `lint` found problems.
    #[error("lint found {count} problem(s)")]
    #[diagnostic(code(campus_bdd::runner::lint_failed))]
    LintFailed {
        /// Number of problems.
        count: usize,
    },
    /// No scenario was selected.
    #[error("no scenarios matched the selected features and tags")]
    #[diagnostic(code(campus_bdd::runner::no_scenarios))]
    NoScenarios,
    /// At least one scenario did not pass.
    #[error("{failed} of {total} scenario(s) did not pass")]
    #[diagnostic(code(campus_bdd::runner::scenarios_failed))]
    ScenariosFailed {
        /// Scenarios that failed or were undefined under strict mode.
        failed: usize,
        /// Scenarios run.
        total: usize,
    },
    /// The run was interrupted before every scenario finished.
    #[error("run interrupted")]
    #[diagnostic(code(campus_bdd::runner::interrupted))]
    Interrupted,
}
