//! Step registry: compiled step patterns bound to asynchronous handlers.
//!
//! A [`RegistryBuilder`] collects `(pattern, handler)` pairs, rejecting
//! duplicate or malformed patterns as it goes, and freezes them into an
//! immutable [`StepRegistry`]. Suites keep their registry in a
//! [`RegistryCell`] so the patterns are compiled once per process and shared
//! by every scenario.
//!
//! Patterns are matched against the step text without its Gherkin keyword.
//! A line matched by more than one pattern is never dispatched: the lookup
//! reports [`RegistryError::Ambiguous`] instead of choosing a winner.

mod args;
mod error;

pub use args::{DataTable, StepArgs};
pub use error::RegistryError;

use crate::context::StepContext;
use regex::Regex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

/// Future returned by a step handler.
pub type StepFuture = Pin<Box<dyn Future<Output = anyhow::Result<StepContext>> + Send>>;

/// Type-erased step handler receiving the suite world, the incoming context
/// and the captured arguments.
pub type StepFn<W> = Arc<dyn Fn(Arc<W>, StepContext, StepArgs) -> StepFuture + Send + Sync>;

/// A compiled pattern and the handler bound to it.
pub struct StepDefinition<W> {
    pattern: Regex,
    handler: StepFn<W>,
}

impl<W> StepDefinition<W> {
    /// Pattern source text.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Invoke the handler.
    pub fn invoke(&self, world: Arc<W>, ctx: StepContext, args: StepArgs) -> StepFuture {
        (self.handler)(world, ctx, args)
    }
}

impl<W> fmt::Debug for StepDefinition<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

/// The single definition matching a step line, with its captures.
#[derive(Debug)]
pub struct StepMatch<'r, W> {
    /// Definition that matched.
    pub definition: &'r StepDefinition<W>,
    /// Capture groups, excluding the whole match.
    pub captures: Vec<Option<String>>,
}

impl<W> StepMatch<'_, W> {
    /// Convert the captures into handler arguments.
    #[must_use]
    pub fn args(&self) -> StepArgs {
        StepArgs::new(self.captures.clone())
    }
}

/// Collects step definitions before freezing them into a [`StepRegistry`].
pub struct RegistryBuilder<W> {
    steps: Vec<StepDefinition<W>>,
}

impl<W> Default for RegistryBuilder<W> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<W: Send + Sync + 'static> RegistryBuilder<W> {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicatePattern`] when `pattern` is already
    /// registered and [`RegistryError::InvalidPattern`] when it does not
    /// compile.
    pub fn step<F, Fut>(&mut self, pattern: &str, handler: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(Arc<W>, StepContext, StepArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<StepContext>> + Send + 'static,
    {
        if self.steps.iter().any(|step| step.pattern() == pattern) {
            return Err(RegistryError::DuplicatePattern {
                pattern: pattern.to_owned(),
            });
        }
        let compiled = Regex::new(pattern).map_err(|err| RegistryError::InvalidPattern {
            pattern: pattern.to_owned(),
            message: err.to_string(),
        })?;
        let boxed: StepFn<W> = Arc::new(
            move |world: Arc<W>, ctx: StepContext, args: StepArgs| -> StepFuture {
                Box::pin(handler(world, ctx, args))
            },
        );
        self.steps.push(StepDefinition {
            pattern: compiled,
            handler: boxed,
        });
        Ok(self)
    }

    /// Freeze the collected definitions.
    #[must_use]
    pub fn build(self) -> StepRegistry<W> {
        tracing::debug!(steps = self.steps.len(), "step registry built");
        StepRegistry { steps: self.steps }
    }
}

/// Immutable table of step definitions, safe to share between scenarios.
pub struct StepRegistry<W> {
    steps: Vec<StepDefinition<W>>,
}

impl<W> fmt::Debug for StepRegistry<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl<W> StepRegistry<W> {
    /// Number of registered patterns.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.steps.len()
    }

    /// Return `true` when no pattern is registered.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Registered patterns in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(StepDefinition::pattern)
    }

    /// Find the single definition matching `text`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Undefined`] when nothing matches and
    /// [`RegistryError::Ambiguous`] when several patterns match.
    pub fn find(&self, text: &str) -> Result<StepMatch<'_, W>, RegistryError> {
        let mut hits = self
            .steps
            .iter()
            .filter_map(|step| step.pattern.captures(text).map(|caps| (step, caps)));
        let Some((definition, caps)) = hits.next() else {
            return Err(RegistryError::Undefined {
                text: text.to_owned(),
            });
        };
        let others: Vec<String> = hits.map(|(step, _)| step.pattern().to_owned()).collect();
        if !others.is_empty() {
            let mut patterns = Vec::with_capacity(others.len() + 1);
            patterns.push(definition.pattern().to_owned());
            patterns.extend(others);
            return Err(RegistryError::Ambiguous {
                text: text.to_owned(),
                patterns,
            });
        }
        let captures = caps
            .iter()
            .skip(1)
            .map(|group| group.map(|m| m.as_str().to_owned()))
            .collect();
        Ok(StepMatch {
            definition,
            captures,
        })
    }

    /// Resolve every line up front and collect the problems.
    ///
    /// Each distinct line is reported at most once, in first-seen order.
    pub fn check<'a, I>(&self, lines: I) -> Vec<RegistryError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = std::collections::HashSet::new();
        lines
            .into_iter()
            .filter(|line| seen.insert(*line))
            .filter_map(|line| self.find(line).err())
            .collect()
    }
}

/// One-time gate around a registry build.
///
/// The build closure runs at most once; later callers share its result.
pub struct RegistryCell<W> {
    cell: OnceLock<Result<Arc<StepRegistry<W>>, RegistryError>>,
}

impl<W> RegistryCell<W> {
    /// Create an empty cell, usable in a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Return the registry, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns the error produced by the first (and only) build attempt.
    pub fn get_or_build<F>(&self, build: F) -> Result<Arc<StepRegistry<W>>, RegistryError>
    where
        F: FnOnce() -> Result<StepRegistry<W>, RegistryError>,
    {
        self.cell.get_or_init(|| build().map(Arc::new)).clone()
    }
}

impl<W> Default for RegistryCell<W> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
