//! Scenario-scoped context threaded through every step.
//!
//! A [`StepContext`] is immutable: deriving a context with a new value or a
//! tighter deadline returns a fresh handle that shares everything else with
//! its parent. Scenario state lives behind an `Arc<Mutex<_>>` stored in the
//! context, so mutations made by one step are visible to the next even when
//! a handler forgets to re-attach it.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Scenario state shared between steps.
pub type SharedState<S> = Arc<Mutex<S>>;

type ValueMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

struct StateSlot<S>(SharedState<S>);

/// Immutable bag of scenario values plus an optional deadline.
#[derive(Clone, Default)]
pub struct StepContext {
    values: Arc<ValueMap>,
    deadline: Option<Instant>,
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("values", &self.values.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl StepContext {
    /// Create an empty context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context carrying `value`, replacing any value of the same type.
    #[must_use]
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        let mut values = ValueMap::clone(&self.values);
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            values: Arc::new(values),
            deadline: self.deadline,
        }
    }

    /// Borrow the value of type `T`, if present.
    #[must_use]
    pub fn value<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.as_ref().downcast_ref::<T>())
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            values: Arc::clone(&self.values),
            deadline: Some(deadline),
        }
    }

    /// Absolute deadline, if one was set.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when no deadline is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Return `true` once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Clamp `wanted` to the time remaining before the deadline.
    #[must_use]
    pub fn bounded(&self, wanted: Duration) -> Duration {
        self.remaining().map_or(wanted, |left| left.min(wanted))
    }

    /// Derive a context carrying `state`.
    #[must_use]
    pub fn with_state<S: Send + 'static>(&self, state: SharedState<S>) -> Self {
        self.with_value(StateSlot(state))
    }

    /// Return `true` when a state of type `S` is attached.
    #[must_use]
    pub fn has_state<S: Send + 'static>(&self) -> bool {
        self.value::<StateSlot<S>>().is_some()
    }

    /// Fetch the scenario state of type `S`.
    ///
    /// A missing state is replaced by a fresh `S::default()` so a step never
    /// fails on an uninitialised scenario; the substitution is logged at
    /// `warn` level. Re-attach the returned state with [`Self::with_state`]
    /// to keep it for later steps.
    #[must_use]
    pub fn state<S: Default + Send + 'static>(&self) -> SharedState<S> {
        if let Some(slot) = self.value::<StateSlot<S>>() {
            return Arc::clone(&slot.0);
        }
        tracing::warn!(
            state = type_name::<S>(),
            "scenario state missing from context; using a blank one"
        );
        Arc::new(Mutex::new(S::default()))
    }

    /// Fetch the state and return it with a context that carries it.
    #[must_use]
    pub fn ensure_state<S: Default + Send + 'static>(&self) -> (Self, SharedState<S>) {
        let state = self.state::<S>();
        (self.with_state(Arc::clone(&state)), state)
    }
}
