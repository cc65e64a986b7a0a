//! In-process event bus.

use super::{BusError, BusMessage, EventBus, MessageHandler, Subscription, subject_matches};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
struct Subscriber {
    pattern: String,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// Bus that delivers published messages to local subscribers.
///
/// Used when no broker is configured and by the harness's own tests.
/// Delivery happens on a spawned task per subscription, so handlers observe
/// messages in publish order.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl MemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscriptions still receiving messages.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BusError> {
        if subject.is_empty() {
            return Err(BusError::Subscribe {
                subject: subject.to_owned(),
                message: "subject must not be empty".to_owned(),
            });
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<BusMessage>();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                pattern: subject.to_owned(),
                tx,
            });
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    next = rx.recv() => match next {
                        Some(message) => handler(message),
                        None => break,
                    },
                }
            }
        });
        Ok(Subscription::new(subject, cancel_tx, task))
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in subscribers
            .iter()
            .filter(|s| subject_matches(&s.pattern, subject))
        {
            // A receiver closing between retain and send is equivalent to an
            // unsubscribe that won the race.
            drop(subscriber.tx.send(BusMessage {
                subject: subject.to_owned(),
                payload: payload.clone(),
            }));
        }
        Ok(())
    }
}
