//! NATS-backed event bus.

use super::{BusError, BusMessage, EventBus, MessageHandler, Subscription};
use async_nats::{Client, ConnectOptions, Event};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::oneshot;

/// Connection settings for the NATS broker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NatsSettings {
    /// Broker URL, for example `nats://localhost:4222`.
    pub url: String,
    /// Optional user name.
    pub user: Option<String>,
    /// Optional password, used together with `user`.
    pub password: Option<String>,
    /// Connection timeout in seconds.
    pub connection_timeout_secs: u64,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: None,
            password: None,
            connection_timeout_secs: 10,
        }
    }
}

/// Event bus backed by a NATS client.
#[derive(Debug, Clone)]
pub struct NatsBus {
    client: Client,
}

impl NatsBus {
    /// Connect to the broker described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connect`] when the broker cannot be reached.
    pub async fn connect(settings: &NatsSettings) -> Result<Self, BusError> {
        let mut options = ConnectOptions::new()
            .connection_timeout(Duration::from_secs(settings.connection_timeout_secs))
            .event_callback(|event| async move {
                match event {
                    Event::Disconnected => tracing::warn!("event bus disconnected"),
                    Event::Connected => tracing::debug!("event bus connected"),
                    Event::ClientError(err) => tracing::warn!(error = %err, "event bus client error"),
                    _ => {}
                }
            });
        if let (Some(user), Some(password)) = (&settings.user, &settings.password) {
            options = options.user_and_password(user.clone(), password.clone());
        }
        let client = options
            .connect(settings.url.as_str())
            .await
            .map_err(|err| BusError::Connect {
                url: settings.url.clone(),
                message: err.to_string(),
            })?;
        tracing::debug!(url = %settings.url, "connected to event bus");
        Ok(Self { client })
    }

    /// Flush pending publishes and drop the connection.
    pub async fn close(&self) {
        if let Err(err) = self.client.flush().await {
            tracing::debug!(error = %err, "flush before close failed");
        }
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn subscribe(
        &self,
        subject: &str,
        handler: MessageHandler,
    ) -> Result<Subscription, BusError> {
        let mut subscriber = self
            .client
            .subscribe(subject.to_owned())
            .await
            .map_err(|err| BusError::Subscribe {
                subject: subject.to_owned(),
                message: err.to_string(),
            })?;
        // Make sure the SUB reached the server before the caller triggers the
        // action it wants to observe.
        self.client
            .flush()
            .await
            .map_err(|err| BusError::Subscribe {
                subject: subject.to_owned(),
                message: err.to_string(),
            })?;
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let label = subject.to_owned();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    next = subscriber.next() => match next {
                        Some(message) => handler(BusMessage {
                            subject: message.subject.to_string(),
                            payload: message.payload,
                        }),
                        None => break,
                    },
                }
            }
            if let Err(err) = subscriber.unsubscribe().await {
                tracing::debug!(subject = %label, error = %err, "unsubscribe failed");
            }
        });
        Ok(Subscription::new(subject, cancel_tx, task))
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), BusError> {
        let to_error = |message: String| BusError::Publish {
            subject: subject.to_owned(),
            message,
        };
        self.client
            .publish(subject.to_owned(), payload)
            .await
            .map_err(|err| to_error(err.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|err| to_error(err.to_string()))
    }
}
