use crate::broker::DelayTier;
use crate::error::ConfigurationError;
use serde::Deserialize;
use std::fmt::Display;
use std::time::Duration;

/// Top-level configuration settings for the application.
///
/// Every section and field falls back to its default, so a partial file or a
/// handful of environment variables is enough.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub tracer: TracerSettings,
    pub log: LogSettings,
}

/// Where the broker lives and what the order workflow publishes to it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    pub name_server: String,
    pub order_topic: String,
    /// Delay level used for cancellation messages. `3` is 10 seconds.
    pub cancel_delay_level: u8,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ProducerSettings {
    pub group: String,
    /// Extra attempts after the first failed send.
    pub retry_times: u32,
    pub send_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConsumerSettings {
    pub group: String,
    pub max_concurrency: usize,
    pub max_batch_size: usize,
    /// How long `shutdown` waits for in-flight batches.
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TracerSettings {
    pub service_name: String,
    /// Collector agent address, `host:port`.
    pub agent_host_port: String,
    /// Log every finished span at info level.
    pub log_spans: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LogSettings {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            name_server: "127.0.0.1:9876".to_string(),
            order_topic: "order_topic".to_string(),
            cancel_delay_level: DelayTier::TEN_SECONDS.level(),
        }
    }
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            group: "order_producer".to_string(),
            retry_times: 2,
            send_timeout_ms: 3_000,
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            group: "order_cancel".to_string(),
            max_concurrency: 4,
            max_batch_size: 1,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl Default for TracerSettings {
    fn default() -> Self {
        Self {
            service_name: "shop".to_string(),
            agent_host_port: "127.0.0.1:6831".to_string(),
            log_spans: true,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ProducerSettings {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl ConsumerSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// A parsed `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameServerAddr {
    pub host: String,
    pub port: u16,
}

impl NameServerAddr {
    pub fn parse(addr: &str) -> Result<Self, ConfigurationError> {
        let invalid = || ConfigurationError::InvalidAddress(addr.to_string());
        let (host, port) = addr.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        if port == 0 {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl Display for NameServerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn non_empty(key: &str, value: &str) -> Result<(), ConfigurationError> {
    if value.trim().is_empty() {
        return Err(ConfigurationError::InvalidSetting {
            key: key.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn positive(key: &str, value: u64) -> Result<(), ConfigurationError> {
    if value == 0 {
        return Err(ConfigurationError::InvalidSetting {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

impl Settings {
    /// Rejects values that could never work at runtime.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        NameServerAddr::parse(&self.broker.name_server)?;
        if self.broker.order_topic.trim().is_empty() {
            return Err(ConfigurationError::EmptyTopic);
        }
        self.cancel_delay()?;

        non_empty("producer.group", &self.producer.group)?;
        positive("producer.send_timeout_ms", self.producer.send_timeout_ms)?;

        non_empty("consumer.group", &self.consumer.group)?;
        positive("consumer.max_concurrency", self.consumer.max_concurrency as u64)?;
        positive("consumer.max_batch_size", self.consumer.max_batch_size as u64)?;

        non_empty("tracer.service_name", &self.tracer.service_name)?;
        NameServerAddr::parse(&self.tracer.agent_host_port)?;
        Ok(())
    }

    /// The configured cancellation delay as a checked tier.
    pub fn cancel_delay(&self) -> Result<DelayTier, ConfigurationError> {
        DelayTier::from_level(self.broker.cancel_delay_level)
    }
}
