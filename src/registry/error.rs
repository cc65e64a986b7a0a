//! Error types raised while building or consulting a step registry.
//!
//! Kept in its own submodule so the lint suppression needed by the derive
//! macros stays narrow.

// The `unused_assignments` lint fires on miette/thiserror derive expansion in
// some toolchains and not others, so `#[expect]` cannot be used here.
// FIXME(rust-lang/rust#130021): remove once upstream is fixed.
#![allow(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    unused_assignments
)]

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by the step registry.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum RegistryError {
    /// The same pattern text was registered twice.
    #[error("step pattern `{pattern}` is registered more than once")]
    #[diagnostic(
        code(campus_bdd::registry::duplicate_pattern),
        help("each pattern may be bound to exactly one handler")
    )]
    DuplicatePattern {
        /// The duplicated pattern text.
        pattern: String,
    },

    /// A pattern failed to compile.
    #[error("step pattern `{pattern}` is not a valid regular expression: {message}")]
    #[diagnostic(code(campus_bdd::registry::invalid_pattern))]
    InvalidPattern {
        /// The offending pattern text.
        pattern: String,
        /// Compiler message from the regex engine.
        message: String,
    },

    /// No registered pattern matches a step line.
    #[error("no step pattern matches \"{text}\"")]
    #[diagnostic(code(campus_bdd::registry::undefined))]
    Undefined {
        /// The step text without its keyword.
        text: String,
    },

    /// More than one registered pattern matches a step line.
    #[error(
        "step \"{text}\" matches {count} patterns: {listing}",
        count = .patterns.len(),
        listing = .patterns.join(", ")
    )]
    #[diagnostic(
        code(campus_bdd::registry::ambiguous),
        help("tighten the patterns so that every step line has one owner")
    )]
    Ambiguous {
        /// The step text without its keyword.
        text: String,
        /// Every pattern that matched, in registration order.
        patterns: Vec<String>,
    },

    /// A captured argument could not be coerced to the handler's type.
    #[error("capture {index} ({value:?}) cannot be read as {target}: {message}")]
    #[diagnostic(code(campus_bdd::registry::capture))]
    Capture {
        /// Zero-based capture index, excluding the whole-match group.
        index: usize,
        /// Raw captured text, if the group participated in the match.
        value: Option<String>,
        /// Name of the requested type.
        target: &'static str,
        /// Reason the coercion failed.
        message: String,
    },
}

impl RegistryError {
    /// Return `true` for errors that make the whole step table unusable.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicatePattern { .. } | Self::InvalidPattern { .. } | Self::Ambiguous { .. }
        )
    }
}
