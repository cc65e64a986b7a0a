//! Per-scenario mutable record.
//!
//! One [`ScenarioState`] is created by the before-scenario hook, shared with
//! every step through the [`StepContext`](crate::context::StepContext) and
//! dropped when the scenario ends.

use crate::bus::{RawWaiter, Subscription};
use anyhow::{Context as _, anyhow};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;
use tonic::Status;

type Erased = Box<dyn Any + Send + Sync>;

/// Cross-step data for one running scenario.
#[derive(Default)]
pub struct ScenarioState {
    /// Token sent with the next call.
    pub auth_token: Option<String>,
    /// User the token belongs to.
    pub current_user_id: Option<String>,
    /// Group of the signed-in user.
    pub current_user_group: Option<String>,
    /// Organisation of the signed-in user.
    pub current_school_id: Option<i64>,
    /// Tenant path used when seeding rows.
    pub resource_path: Option<String>,
    /// Time the last request was sent.
    pub request_sent_at: Option<OffsetDateTime>,
    /// Last random number drawn by a step, as written into requests.
    pub random: Option<String>,
    /// Locations created for this scenario.
    pub location_ids: Vec<String>,
    /// Lesson the scenario acts on.
    pub current_lesson_id: Option<String>,
    /// Learners attached to the current lesson.
    pub learner_ids: Vec<String>,
    /// Subscriptions drained by the after-scenario hook.
    pub subscriptions: Vec<Subscription>,
    request: Option<Erased>,
    response: Option<Erased>,
    response_err: Option<Status>,
    waiters: HashMap<String, RawWaiter>,
    extensions: HashMap<TypeId, Erased>,
}

impl fmt::Debug for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioState")
            .field("current_user_id", &self.current_user_id)
            .field("current_user_group", &self.current_user_group)
            .field("current_school_id", &self.current_school_id)
            .field("has_token", &self.auth_token.is_some())
            .field("has_request", &self.request.is_some())
            .field("has_response", &self.response.is_some())
            .field("response_err", &self.response_err)
            .field("location_ids", &self.location_ids)
            .field("current_lesson_id", &self.current_lesson_id)
            .field("learner_ids", &self.learner_ids)
            .field("subscriptions", &self.subscriptions.len())
            .field("waiters", &self.waiters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ScenarioState {
    /// Remember `request` as the last request and stamp the send time.
    ///
    /// Clears the previous outcome so assertions never see a stale response.
    pub fn record_request<T: Any + Send + Sync>(&mut self, request: T) {
        self.request = Some(Box::new(request));
        self.request_sent_at = Some(OffsetDateTime::now_utc());
        self.response = None;
        self.response_err = None;
    }

    /// Capture the outcome of the last call.
    ///
    /// RPC failures are stored instead of propagated so later steps can
    /// assert on them.
    pub fn record_outcome<T: Any + Send + Sync>(&mut self, outcome: Result<T, Status>) {
        match outcome {
            Ok(response) => {
                self.response = Some(Box::new(response));
                self.response_err = None;
            }
            Err(status) => {
                tracing::debug!(code = ?status.code(), message = status.message(), "call failed");
                self.response = None;
                self.response_err = Some(status);
            }
        }
    }

    /// Last request, downcast to `T`.
    ///
    /// # Errors
    ///
    /// Fails when no request was recorded or it has another type.
    pub fn request<T: Any>(&self) -> anyhow::Result<&T> {
        downcast(self.request.as_ref(), "request")
    }

    /// Last successful response, downcast to `T`.
    ///
    /// # Errors
    ///
    /// Fails with the captured status when the call failed, or when the
    /// response has another type.
    pub fn response<T: Any>(&self) -> anyhow::Result<&T> {
        if let Some(status) = &self.response_err {
            return Err(anyhow!(
                "expected a {} response but the call failed: {} ({})",
                type_name::<T>(),
                status.message(),
                crate::rpc::code_name(status.code())
            ));
        }
        downcast(self.response.as_ref(), "response")
    }

    /// Status captured from the last failed call.
    #[must_use]
    pub const fn response_err(&self) -> Option<&Status> {
        self.response_err.as_ref()
    }

    /// Whether any call outcome has been recorded.
    #[must_use]
    pub const fn has_outcome(&self) -> bool {
        self.response.is_some() || self.response_err.is_some()
    }

    /// Run `f` on the scratch value of type `T`, creating it on first use.
    pub fn with_extension<T, R>(&mut self, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Sync + Default,
    {
        let id = TypeId::of::<T>();
        let mut value = match self.extensions.remove(&id).map(|boxed| boxed.downcast::<T>()) {
            Some(Ok(existing)) => existing,
            _ => Box::<T>::default(),
        };
        let out = f(&mut value);
        self.extensions.insert(id, value);
        out
    }

    /// Read a scratch value without creating it.
    #[must_use]
    pub fn peek_extension<T: Any>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Keep `waiter` until a later step collects it with
    /// [`ScenarioState::take_waiter`].
    ///
    /// A waiter already armed for the same subject is dropped, which stops
    /// its delivery.
    pub fn arm_waiter(&mut self, waiter: RawWaiter) {
        let subject = waiter.subject().to_owned();
        if let Some(previous) = self.waiters.insert(subject, waiter) {
            tracing::debug!(subject = previous.subject(), "replacing armed waiter");
        }
    }

    /// Collect the waiter armed for `subject`.
    ///
    /// # Errors
    ///
    /// Fails when no earlier step armed one.
    pub fn take_waiter(&mut self, subject: &str) -> anyhow::Result<RawWaiter> {
        self.waiters
            .remove(subject)
            .with_context(|| format!("no subscription was set up for subject {subject}"))
    }

    /// Hand over every subscription and armed waiter for draining.
    pub fn take_subscriptions(&mut self) -> (Vec<Subscription>, Vec<RawWaiter>) {
        (
            std::mem::take(&mut self.subscriptions),
            self.waiters.drain().map(|(_, waiter)| waiter).collect(),
        )
    }
}

fn downcast<'a, T: Any>(slot: Option<&'a Erased>, what: &str) -> anyhow::Result<&'a T> {
    let value = slot.with_context(|| format!("no {what} has been recorded"))?;
    value
        .downcast_ref::<T>()
        .with_context(|| format!("last {what} is not a {}", type_name::<T>()))
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
