//! Event-bus access for observing asynchronous side effects.
//!
//! Steps subscribe before triggering an action and later wait for a matching
//! message. [`EventBus`] hides the broker: [`NatsBus`] talks to NATS and
//! [`MemoryBus`] delivers in-process, which keeps the waiting logic testable
//! without a broker.

mod memory;
mod nats;
mod waiter;

pub use memory::MemoryBus;
pub use nats::{NatsBus, NatsSettings};
pub use waiter::{EventWaiter, RawWaiter, WaitError, decode_message};

use async_trait::async_trait;
use bytes::Bytes;
use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A message delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Subject the message was published on.
    pub subject: String,
    /// Raw payload.
    pub payload: Bytes,
}

/// Callback invoked for every delivered message.
///
/// Runs on the bus's delivery task, so it must not block.
pub type MessageHandler = Arc<dyn Fn(BusMessage) + Send + Sync>;

/// Errors raised by bus operations.
#[derive(Debug, Error, Diagnostic)]
pub enum BusError {
    /// Could not reach the broker.
    #[error("cannot connect to event bus at {url}: {message}")]
    #[diagnostic(code(campus_bdd::bus::connect))]
    Connect {
        /// Broker URL.
        url: String,
        /// Underlying failure.
        message: String,
    },
    /// The broker refused a subscription.
    #[error("cannot subscribe to {subject}: {message}")]
    #[diagnostic(code(campus_bdd::bus::subscribe))]
    Subscribe {
        /// Requested subject.
        subject: String,
        /// Underlying failure.
        message: String,
    },
    /// The broker refused a publish.
    #[error("cannot publish to {subject}: {message}")]
    #[diagnostic(code(campus_bdd::bus::publish))]
    Publish {
        /// Target subject.
        subject: String,
        /// Underlying failure.
        message: String,
    },
}

/// Publish/subscribe access to the event bus.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register `handler` for messages on `subject` (wildcards allowed).
    ///
    /// Only messages published after the call returns are delivered.
    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BusError>;

    /// Publish `payload` on `subject`.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError>;
}

/// Handle to an active subscription.
///
/// Dropping the handle stops delivery; [`Subscription::unsubscribe`] also
/// waits for the delivery task to finish.
#[derive(Debug)]
pub struct Subscription {
    subject: String,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(subject: &str, cancel: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self {
            subject: subject.to_owned(),
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    /// Subject this subscription listens on.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Stop delivery and wait for the delivery task to wind down.
    pub async fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            // The task may already have ended; nothing to report then.
            drop(cancel.send(()));
        }
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            tracing::debug!(subject = %self.subject, error = %err, "delivery task ended abnormally");
        }
    }
}

/// Return `true` when `subject` matches the NATS-style `pattern`.
///
/// `*` matches one token and a trailing `>` matches one or more tokens.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut wanted = pattern.split('.');
    let mut actual = subject.split('.');
    loop {
        match (wanted.next(), actual.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(w), Some(a)) if w == a => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Drain and unsubscribe every subscription in `subscriptions`.
pub async fn drain(subscriptions: Vec<Subscription>) {
    let count = subscriptions.len();
    futures::future::join_all(subscriptions.into_iter().map(Subscription::unsubscribe)).await;
    if count > 0 {
        tracing::debug!(count, "subscriptions drained");
    }
}
