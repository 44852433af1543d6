//! # Wire Messages
//!
//! `DelayedMessage` is what a producer hands to the broker; `MessageExt` is what
//! the broker hands back to a consumer once the delay has elapsed. A `Delivery`
//! bundles a batch of `MessageExt` with the channel the consumer uses to report
//! its [`ConsumeResult`].

use super::delay::DelayTier;
use crate::error::ConfigurationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use tokio::sync::oneshot;

/// Broker-assigned message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string().to_uppercase())
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message waiting to be published with a delay.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayedMessage {
    topic: String,
    tag: String,
    keys: Vec<String>,
    body: Vec<u8>,
    delay: DelayTier,
    properties: HashMap<String, String>,
}

impl DelayedMessage {
    /// Builds a message for `topic`. The topic must be non-empty.
    pub fn new(
        topic: impl Into<String>,
        body: Vec<u8>,
        delay: DelayTier,
    ) -> Result<Self, ConfigurationError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(ConfigurationError::EmptyTopic);
        }
        Ok(Self {
            topic,
            tag: String::new(),
            keys: Vec::new(),
            body,
            delay,
            properties: HashMap::new(),
        })
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn properties_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.properties
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn delay(&self) -> DelayTier {
        self.delay
    }

    /// Stamps broker metadata onto the message, producing its stored form.
    pub(crate) fn into_stored(self, born_at: DateTime<Utc>) -> MessageExt {
        let eligible_at = born_at
            + chrono::Duration::from_std(self.delay.duration()).unwrap_or(chrono::Duration::zero());
        MessageExt {
            message_id: MessageId::generate(),
            topic: self.topic,
            tag: self.tag,
            keys: self.keys,
            body: self.body,
            properties: self.properties,
            delay: self.delay,
            born_at,
            eligible_at,
            reconsume_times: 0,
        }
    }
}

/// A message as delivered to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageExt {
    pub message_id: MessageId,
    pub topic: String,
    pub tag: String,
    pub keys: Vec<String>,
    pub body: Vec<u8>,
    pub properties: HashMap<String, String>,
    pub delay: DelayTier,
    pub born_at: DateTime<Utc>,
    /// Wall-clock time before which the broker will not deliver the message.
    pub eligible_at: DateTime<Utc>,
    /// How many times the broker has redelivered this message.
    pub reconsume_times: u32,
}

/// The broker's acknowledgment of a successful send.
#[derive(Debug, Clone, PartialEq)]
pub struct SendReceipt {
    pub message_id: MessageId,
    pub topic: String,
    pub delay: DelayTier,
    pub queue_offset: u64,
    pub eligible_at: DateTime<Utc>,
}

/// What a consumer reports back for a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    /// Every message in the batch is done.
    Success,
    /// Redeliver the batch later.
    RetryLater,
}

/// One batch pushed to a subscription.
///
/// Dropping a `Delivery` without calling [`Delivery::ack`] is treated by the
/// broker as [`ConsumeResult::RetryLater`].
#[derive(Debug)]
pub struct Delivery {
    pub messages: Vec<MessageExt>,
    respond_to: oneshot::Sender<ConsumeResult>,
}

impl Delivery {
    pub(crate) fn new(messages: Vec<MessageExt>) -> (Self, oneshot::Receiver<ConsumeResult>) {
        let (respond_to, response) = oneshot::channel();
        (
            Self {
                messages,
                respond_to,
            },
            response,
        )
    }

    /// Reports the consume result for the batch.
    pub fn ack(self, result: ConsumeResult) {
        let _ = self.respond_to.send(result);
    }
}
