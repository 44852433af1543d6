//! # Delayed Message Publisher
//!
//! Serializes a payload, attaches a delay tier and the caller's trace context,
//! and publishes it synchronously: `send_sync` only returns once the broker has
//! handed back a receipt, or once the retry budget is spent.
//!
//! A `Producer` is owned by the [`LifecycleManager`](crate::lifecycle::LifecycleManager).
//! Only the manager can start or stop it; everyone else gets a
//! [`ProducerHandle`](crate::lifecycle::ProducerHandle).
//!
//! ## Retry Policy
//!
//! | Failure                         | Retried | Surfaced as                  |
//! |---------------------------------|---------|------------------------------|
//! | transient broker error          | yes     | `SendFailure { Broker }`     |
//! | no receipt within `send_timeout`| yes     | `SendFailure { Timeout }`    |
//! | caller cancellation             | no      | `SendFailure { Timeout }`    |
//! | unknown session / closed broker | no      | `Connection`                 |
//! | invalid tier / empty topic      | no      | `Configuration`              |
//! | serialization                   | no      | `Encoding`                   |

pub mod error;

pub use error::{PublishError, SendFailureKind};

use crate::broker::{BrokerTransport, DelayTier, DelayedMessage, SendReceipt};
use crate::config::ProducerSettings;
use crate::error::ConnectionError;
use crate::lifecycle::ServiceState;
use crate::trace::SpanContext;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ProducerOptions {
    pub group: String,
    /// Extra attempts after the first; `2` means at most three sends.
    pub retry_times: u32,
    pub send_timeout: Duration,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self::from(&ProducerSettings::default())
    }
}

impl From<&ProducerSettings> for ProducerOptions {
    fn from(settings: &ProducerSettings) -> Self {
        Self {
            group: settings.group.clone(),
            retry_times: settings.retry_times,
            send_timeout: settings.send_timeout(),
        }
    }
}

pub struct Producer {
    client_id: String,
    options: ProducerOptions,
    transport: Arc<dyn BrokerTransport>,
    state: Mutex<ServiceState>,
}

impl Producer {
    pub(crate) fn new(options: ProducerOptions, transport: Arc<dyn BrokerTransport>) -> Self {
        let client_id = format!("{}@{}", options.group, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        Self {
            client_id,
            options,
            transport,
            state: Mutex::new(ServiceState::Created),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn options(&self) -> &ProducerOptions {
        &self.options
    }

    pub fn state(&self) -> ServiceState {
        *self.lock_state()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ServiceState) {
        *self.lock_state() = state;
    }

    /// Opens the broker session. Only valid once, from `Created`.
    #[instrument(skip(self), fields(client = %self.client_id))]
    pub(crate) async fn start(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.lock_state();
            if *state != ServiceState::Created {
                return Err(ConnectionError::InvalidState {
                    component: "producer",
                    state: state.to_string(),
                    expected: "created",
                });
            }
            *state = ServiceState::Starting;
        }

        match self.transport.connect(&self.client_id).await {
            Ok(()) => {
                self.set_state(ServiceState::Running);
                info!(name_server = %self.transport.name_server(), "Producer started");
                Ok(())
            }
            Err(e) => {
                self.set_state(ServiceState::StartFailed);
                error!(error = %e, "Producer failed to start");
                Err(e.into())
            }
        }
    }

    /// Closes the broker session.
    ///
    /// Returns `Ok(false)` if the producer was already shut down.
    #[instrument(skip(self), fields(client = %self.client_id))]
    pub(crate) async fn shutdown(&self) -> Result<bool, ConnectionError> {
        let previous = std::mem::replace(&mut *self.lock_state(), ServiceState::ShutDown);
        match previous {
            ServiceState::ShutDown => Ok(false),
            ServiceState::Running => {
                self.transport.disconnect(&self.client_id).await?;
                info!("Producer shut down");
                Ok(true)
            }
            other => {
                debug!(state = %other, "Producer shut down without a session");
                Ok(true)
            }
        }
    }

    /// Marks the producer shut down and closes the session in the background.
    pub(crate) fn shutdown_now(&self) {
        let previous = std::mem::replace(&mut *self.lock_state(), ServiceState::ShutDown);
        if previous != ServiceState::Running {
            return;
        }
        let transport = self.transport.clone();
        let client_id = self.client_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = transport.disconnect(&client_id).await {
                        warn!(client = %client_id, error = %e, "Background producer disconnect failed");
                    }
                });
            }
            Err(_) => warn!(client = %client_id, "No runtime, producer session left to expire"),
        }
    }

    fn ensure_running(&self) -> Result<(), ConnectionError> {
        let state = self.state();
        if state != ServiceState::Running {
            return Err(ConnectionError::InvalidState {
                component: "producer",
                state: state.to_string(),
                expected: "running",
            });
        }
        Ok(())
    }

    /// Serializes `payload` as JSON into a message for `topic`, carrying
    /// `parent` in its properties.
    pub fn build_message<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        tier: DelayTier,
        parent: Option<&SpanContext>,
    ) -> Result<DelayedMessage, PublishError> {
        let body = serde_json::to_vec(payload).map_err(|e| PublishError::Encoding(e.to_string()))?;
        let mut message = DelayedMessage::new(topic, body, tier)?;
        if let Some(parent) = parent {
            parent.inject(message.properties_mut());
        }
        Ok(message)
    }

    /// Publishes `payload` to `topic`, deliverable after `tier`.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        tier: DelayTier,
        parent: Option<&SpanContext>,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, PublishError> {
        let message = self.build_message(topic, payload, tier, parent)?;
        self.send_sync(message, cancel).await
    }

    /// Like [`publish`](Self::publish) with a raw 1-based delay level.
    /// An unsupported level fails before anything is sent.
    pub async fn publish_with_level<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
        level: u8,
        parent: Option<&SpanContext>,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, PublishError> {
        let tier = DelayTier::from_level(level)?;
        self.publish(topic, payload, tier, parent, cancel).await
    }

    /// Sends `message` and waits for the broker receipt.
    #[instrument(skip_all, fields(client = %self.client_id, topic = %message.topic(), delay = %message.delay()))]
    pub async fn send_sync(
        &self,
        message: DelayedMessage,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, PublishError> {
        let max_attempts = self.options.retry_times.saturating_add(1);
        let mut kind = SendFailureKind::Broker;
        let mut reason = String::new();

        for attempt in 1..=max_attempts {
            self.ensure_running()?;

            let send = tokio::time::timeout(
                self.options.send_timeout,
                self.transport.send(&self.client_id, message.clone()),
            );
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(attempt, "Send cancelled by caller");
                    return Err(PublishError::SendFailure {
                        kind: SendFailureKind::Timeout,
                        attempts: attempt,
                        reason: "cancelled by caller".to_string(),
                    });
                }
                outcome = send => outcome,
            };

            match outcome {
                Ok(Ok(receipt)) => {
                    info!(
                        message_id = %receipt.message_id,
                        attempt,
                        eligible_at = %receipt.eligible_at,
                        "Message sent"
                    );
                    return Ok(receipt);
                }
                Ok(Err(e)) if e.is_retryable() => {
                    warn!(attempt, max_attempts, error = %e, "Send failed");
                    kind = SendFailureKind::Broker;
                    reason = e.to_string();
                }
                Ok(Err(e)) => {
                    error!(attempt, error = %e, "Send rejected");
                    return Err(PublishError::Connection(e.into()));
                }
                Err(_) => {
                    warn!(attempt, max_attempts, timeout = ?self.options.send_timeout, "Send timed out");
                    kind = SendFailureKind::Timeout;
                    reason = format!("no receipt within {:?}", self.options.send_timeout);
                }
            }
        }

        error!(attempts = max_attempts, %kind, "Send retry budget exhausted");
        Err(PublishError::SendFailure {
            kind,
            attempts: max_attempts,
            reason,
        })
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("client_id", &self.client_id)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}
