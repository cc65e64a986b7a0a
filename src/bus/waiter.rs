//! Waiting for a message that an earlier action should cause.

use super::{BusError, BusMessage, EventBus, MessageHandler, Subscription};
use miette::Diagnostic;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

/// Failure to observe an expected message.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum WaitError {
    /// Nothing matching arrived within the window.
    #[error("timed out after {waited:?} waiting for a message on {subject}")]
    #[diagnostic(code(campus_bdd::bus::timeout))]
    TimedOut {
        /// Subject being watched.
        subject: String,
        /// Window that elapsed.
        waited: Duration,
    },
    /// The subscription ended before a message arrived.
    #[error("subscription to {subject} closed before a message arrived")]
    #[diagnostic(code(campus_bdd::bus::closed))]
    Closed {
        /// Subject being watched.
        subject: String,
    },
}

/// A subscription armed before an action, paired with a bounded ring of
/// recent messages.
///
/// Messages that `decode` rejects are dropped at delivery. Once the ring is
/// full the oldest queued message is evicted, so the newest `capacity`
/// messages are always available to [`EventWaiter::wait_for`].
#[derive(Debug)]
pub struct EventWaiter<T> {
    subject: String,
    rx: broadcast::Receiver<T>,
    subscription: Option<Subscription>,
}

/// Waiter that keeps the raw message.
pub type RawWaiter = EventWaiter<BusMessage>;

impl<T: Clone + Send + 'static> EventWaiter<T> {
    /// Subscribe to `subject` and keep the latest `capacity` decoded messages.
    ///
    /// # Errors
    ///
    /// Propagates the bus's subscription failure.
    pub async fn arm<F>(
        bus: &dyn EventBus,
        subject: &str,
        capacity: usize,
        decode: F,
    ) -> Result<Self, BusError>
    where
        F: Fn(&BusMessage) -> Option<T> + Send + Sync + 'static,
    {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        let handler: MessageHandler = Arc::new(move |message: BusMessage| {
            if let Some(value) = decode(&message)
                && tx.send(value).is_err()
            {
                tracing::trace!(subject = %message.subject, "waiter already gone; message ignored");
            }
        });
        let subscription = bus.subscribe(subject, handler).await?;
        Ok(Self {
            subject: subject.to_owned(),
            rx,
            subscription: Some(subscription),
        })
    }

    /// Subject being watched.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wait up to `timeout` for the next queued message.
    ///
    /// Returns as soon as one arrives; only reports a timeout once the whole
    /// window has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::TimedOut`] or [`WaitError::Closed`].
    pub async fn wait(&mut self, timeout: Duration) -> Result<T, WaitError> {
        self.wait_for(timeout, |_| true).await
    }

    /// Wait up to `timeout` for a queued message accepted by `accept`.
    ///
    /// Rejected messages are consumed. The window is shared across all
    /// candidates rather than restarted per message. Messages evicted before
    /// they were read are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::TimedOut`] or [`WaitError::Closed`].
    pub async fn wait_for<P>(&mut self, timeout: Duration, mut accept: P) -> Result<T, WaitError>
    where
        P: FnMut(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Ok(value)) if accept(&value) => return Ok(value),
                Ok(Ok(_)) => {}
                Ok(Err(RecvError::Lagged(evicted))) => {
                    tracing::warn!(
                        subject = %self.subject,
                        evicted,
                        "waiter fell behind; oldest messages were evicted"
                    );
                }
                Ok(Err(RecvError::Closed)) => {
                    return Err(WaitError::Closed {
                        subject: self.subject.clone(),
                    });
                }
                Err(_) => {
                    return Err(WaitError::TimedOut {
                        subject: self.subject.clone(),
                        waited: timeout,
                    });
                }
            }
        }
    }

    /// Stop listening.
    pub async fn disarm(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
        }
    }
}

impl RawWaiter {
    /// Arm a waiter that keeps every message on `subject`.
    ///
    /// # Errors
    ///
    /// Propagates the bus's subscription failure.
    pub async fn raw(bus: &dyn EventBus, subject: &str, capacity: usize) -> Result<Self, BusError> {
        Self::arm(bus, subject, capacity, |message| Some(message.clone())).await
    }
}

/// Decode a protobuf payload, logging and discarding malformed messages.
#[must_use]
pub fn decode_message<M: prost::Message + Default>(message: &BusMessage) -> Option<M> {
    match M::decode(message.payload.clone()) {
        Ok(decoded) => Some(decoded),
        Err(err) => {
            tracing::debug!(subject = %message.subject, error = %err, "discarding undecodable message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use bytes::Bytes;
    use rstest::rstest;

    fn text(message: &BusMessage) -> Option<String> {
        String::from_utf8(message.payload.to_vec()).ok()
    }

    #[tokio::test(start_paused = true)]
    async fn returns_as_soon_as_a_message_arrives() {
        let bus = MemoryBus::new();
        let mut waiter = EventWaiter::arm(&bus, "Lesson.Created", 4, text)
            .await
            .expect("arm");
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            publisher
                .publish("Lesson.Created", Bytes::from_static(b"lesson-1"))
                .await
                .expect("publish");
        });
        let started = Instant::now();
        let got = waiter.wait(Duration::from_secs(60)).await.expect("message");
        assert_eq!(got, "lesson-1");
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_only_after_the_full_window() {
        let bus = MemoryBus::new();
        let mut waiter = RawWaiter::raw(&bus, "Lesson.Updated", 4).await.expect("arm");
        let started = Instant::now();
        let err = waiter
            .wait(Duration::from_secs(60))
            .await
            .expect_err("nothing was published");
        assert_eq!(started.elapsed(), Duration::from_secs(60));
        assert_eq!(
            err,
            WaitError::TimedOut {
                subject: "Lesson.Updated".to_owned(),
                waited: Duration::from_secs(60),
            }
        );
    }

    #[rstest]
    #[case(&["other", "wanted"], Some("wanted"))]
    #[case(&["other", "noise"], None)]
    #[tokio::test(start_paused = true)]
    async fn filters_with_a_shared_window(
        #[case] payloads: &[&'static str],
        #[case] expected: Option<&str>,
    ) {
        let bus = MemoryBus::new();
        let mut waiter = EventWaiter::arm(&bus, "SyncLocation.*", 8, text)
            .await
            .expect("arm");
        for payload in payloads {
            bus.publish("SyncLocation.Upserted", Bytes::from(payload.as_bytes().to_vec()))
                .await
                .expect("publish");
        }
        let got = waiter
            .wait_for(Duration::from_secs(5), |value| value == "wanted")
            .await
            .ok();
        assert_eq!(got.as_deref(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn noisy_traffic_never_crowds_out_a_later_match() {
        let bus = MemoryBus::new();
        let mut waiter = EventWaiter::arm(&bus, "Lesson.Created", 4, text)
            .await
            .expect("arm");
        for n in 0..64 {
            bus.publish("Lesson.Created", Bytes::from(format!("noise-{n}")))
                .await
                .expect("publish");
        }
        bus.publish("Lesson.Created", Bytes::from_static(b"wanted"))
            .await
            .expect("publish");
        let got = waiter
            .wait_for(Duration::from_secs(5), |value| value == "wanted")
            .await
            .expect("the match survives the noise");
        assert_eq!(got, "wanted");
    }

    #[tokio::test]
    async fn disarm_stops_delivery() {
        let bus = MemoryBus::new();
        let waiter = RawWaiter::raw(&bus, "a.b", 1).await.expect("arm");
        waiter.disarm().await;
        assert_eq!(bus.active_subscriptions(), 0);
    }

    #[test]
    fn malformed_protobuf_is_discarded() {
        let message = BusMessage {
            subject: "x".to_owned(),
            payload: Bytes::from_static(&[0xff, 0xff, 0xff]),
        };
        assert!(decode_message::<fixture::Empty>(&message).is_none());
    }

    mod fixture {
        #[derive(Clone, PartialEq, prost::Message)]
        pub struct Empty {
            #[prost(string, tag = "1")]
            pub name: String,
        }
    }
}
