//! Kafka connection configuration.
//!
//! [`KafkaConfig`] is the opaque backend config carried through
//! [`BrokerOptions`](logbus_core::BrokerOptions) extensions. [`KafkaSettings`]
//! is a typed, serde-friendly view of the common keys that can be loaded from
//! the environment.

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::env;

/// Key holding the bootstrap endpoints.
pub const BOOTSTRAP_SERVERS: &str = "bootstrap.servers";

/// Default consumer group when none is configured.
pub const DEFAULT_GROUP_ID: &str = "logbus";

/// Keys librdkafka only accepts on consumers.
const CONSUMER_ONLY_KEYS: &[&str] = &[
    "group.id",
    "group.instance.id",
    "enable.auto.commit",
    "auto.commit.interval.ms",
    "auto.offset.reset",
    "session.timeout.ms",
    "heartbeat.interval.ms",
    "max.poll.interval.ms",
    "enable.partition.eof",
];

/// Backend-specific configuration for the Kafka adapter.
///
/// A thin wrapper around rdkafka's [`ClientConfig`]. Attach it to the broker
/// options as an extension:
///
/// ```
/// use logbus_core::BrokerOptions;
/// use logbus_kafka::KafkaConfig;
///
/// let options = BrokerOptions::new().with_extension(
///     KafkaConfig::new()
///         .set("bootstrap.servers", "localhost:9092")
///         .set("group.id", "billing"),
/// );
/// # let _ = options;
/// ```
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    inner: ClientConfig,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            inner: ClientConfig::new(),
        }
    }
}

impl KafkaConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a librdkafka property.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.set(key, value);
        self
    }

    /// Look up a librdkafka property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key)
    }

    /// The configured bootstrap endpoints, if set and non-empty.
    #[must_use]
    pub fn bootstrap_servers(&self) -> Option<&str> {
        self.get(BOOTSTRAP_SERVERS).filter(|servers| !servers.is_empty())
    }

    /// Config for the shared consumer.
    ///
    /// Forces manual commits and fills in a group id and offset reset policy
    /// when missing.
    #[must_use]
    pub fn consumer_config(&self) -> ClientConfig {
        let mut config = self.inner.clone();
        if config.get("group.id").is_none() {
            config.set("group.id", DEFAULT_GROUP_ID);
        }
        if config.get("auto.offset.reset").is_none() {
            config.set("auto.offset.reset", "latest");
        }
        config
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");
        config
    }

    /// Config for the producer, with consumer-only keys removed.
    #[must_use]
    pub fn producer_config(&self) -> ClientConfig {
        let mut config = self.inner.clone();
        for key in CONSUMER_ONLY_KEYS {
            config.remove(key);
        }
        if config.get("message.timeout.ms").is_none() {
            config.set("message.timeout.ms", "5000");
        }
        config
    }
}

impl From<ClientConfig> for KafkaConfig {
    fn from(inner: ClientConfig) -> Self {
        Self { inner }
    }
}

/// Typed view of the commonly used connection settings.
///
/// Loaded from environment variables with sensible defaults:
///
/// | Variable | Default |
/// |---|---|
/// | `KAFKA_BOOTSTRAP_SERVERS` | `localhost:9092` |
/// | `KAFKA_GROUP_ID` | `logbus` |
/// | `KAFKA_AUTO_OFFSET_RESET` | `latest` |
/// | `KAFKA_SECURITY_PROTOCOL` | `plaintext` |
/// | `KAFKA_SASL_MECHANISM` | unset |
/// | `KAFKA_SASL_USERNAME` | unset |
/// | `KAFKA_SASL_PASSWORD` | unset |
/// | `KAFKA_SESSION_TIMEOUT_MS` | `6000` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaSettings {
    /// Broker addresses (comma-separated)
    pub bootstrap_servers: String,
    /// Consumer group id
    pub group_id: String,
    /// Where a new group starts reading: earliest, latest, error
    pub auto_offset_reset: String,
    /// Security protocol: plaintext, ssl, `sasl_plaintext`, `sasl_ssl`
    pub security_protocol: String,
    /// SASL mechanism: PLAIN, SCRAM-SHA-256, SCRAM-SHA-512
    pub sasl_mechanism: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Consumer session timeout in milliseconds
    pub session_timeout_ms: u32,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            group_id: DEFAULT_GROUP_ID.to_string(),
            auto_offset_reset: "latest".to_string(),
            security_protocol: "plaintext".to_string(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            session_timeout_ms: 6000,
        }
    }
}

impl KafkaSettings {
    /// Load settings from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    ///
    /// Unparsable numeric values fall back to their defaults.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            bootstrap_servers: lookup("KAFKA_BOOTSTRAP_SERVERS").unwrap_or(defaults.bootstrap_servers),
            group_id: lookup("KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            auto_offset_reset: lookup("KAFKA_AUTO_OFFSET_RESET").unwrap_or(defaults.auto_offset_reset),
            security_protocol: lookup("KAFKA_SECURITY_PROTOCOL").unwrap_or(defaults.security_protocol),
            sasl_mechanism: lookup("KAFKA_SASL_MECHANISM"),
            sasl_username: lookup("KAFKA_SASL_USERNAME"),
            sasl_password: lookup("KAFKA_SASL_PASSWORD"),
            session_timeout_ms: lookup("KAFKA_SESSION_TIMEOUT_MS")
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.session_timeout_ms),
        }
    }

    /// Convert into the backend config carried by broker options.
    #[must_use]
    pub fn into_config(self) -> KafkaConfig {
        let mut config = KafkaConfig::new()
            .set(BOOTSTRAP_SERVERS, self.bootstrap_servers)
            .set("group.id", self.group_id)
            .set("auto.offset.reset", self.auto_offset_reset)
            .set("security.protocol", self.security_protocol)
            .set("session.timeout.ms", self.session_timeout_ms.to_string());

        if let Some(mechanism) = self.sasl_mechanism {
            config = config.set("sasl.mechanism", mechanism);
        }
        if let Some(username) = self.sasl_username {
            config = config.set("sasl.username", username);
        }
        if let Some(password) = self.sasl_password {
            config = config.set("sasl.password", password);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn bootstrap_servers_ignores_empty_value() {
        assert_eq!(KafkaConfig::new().bootstrap_servers(), None);
        assert_eq!(KafkaConfig::new().set(BOOTSTRAP_SERVERS, "").bootstrap_servers(), None);
        assert_eq!(
            KafkaConfig::new().set(BOOTSTRAP_SERVERS, "a:9092").bootstrap_servers(),
            Some("a:9092")
        );
    }

    #[test]
    fn consumer_config_forces_manual_commit() {
        let config = KafkaConfig::new()
            .set("enable.auto.commit", "true")
            .set("group.id", "billing")
            .consumer_config();

        assert_eq!(config.get("enable.auto.commit"), Some("false"));
        assert_eq!(config.get("group.id"), Some("billing"));
        assert_eq!(config.get("auto.offset.reset"), Some("latest"));
    }

    #[test]
    fn consumer_config_defaults_group() {
        let config = KafkaConfig::new().consumer_config();
        assert_eq!(config.get("group.id"), Some(DEFAULT_GROUP_ID));
    }

    #[test]
    fn producer_config_strips_consumer_keys() {
        let config = KafkaConfig::new()
            .set(BOOTSTRAP_SERVERS, "a:9092")
            .set("group.id", "billing")
            .set("auto.offset.reset", "earliest")
            .producer_config();

        assert_eq!(config.get(BOOTSTRAP_SERVERS), Some("a:9092"));
        assert_eq!(config.get("group.id"), None);
        assert_eq!(config.get("auto.offset.reset"), None);
        assert_eq!(config.get("message.timeout.ms"), Some("5000"));
    }

    #[test]
    fn settings_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("KAFKA_BOOTSTRAP_SERVERS", "kafka-1:9092,kafka-2:9092"),
            ("KAFKA_GROUP_ID", "payments"),
            ("KAFKA_SASL_MECHANISM", "PLAIN"),
            ("KAFKA_SESSION_TIMEOUT_MS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let settings = KafkaSettings::from_lookup(|key| vars.get(key).map(ToString::to_string));

        assert_eq!(settings.bootstrap_servers, "kafka-1:9092,kafka-2:9092");
        assert_eq!(settings.group_id, "payments");
        assert_eq!(settings.auto_offset_reset, "latest");
        assert_eq!(settings.sasl_mechanism.as_deref(), Some("PLAIN"));
        assert_eq!(settings.sasl_username, None);
        assert_eq!(settings.session_timeout_ms, 6000);

        let config = settings.into_config();
        assert_eq!(config.bootstrap_servers(), Some("kafka-1:9092,kafka-2:9092"));
        assert_eq!(config.get("sasl.mechanism"), Some("PLAIN"));
        assert_eq!(config.get("sasl.username"), None);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: Test will fail if serialization fails
    fn settings_deserialize_from_json() {
        let json = serde_json::to_string(&KafkaSettings::default()).expect("serialize");
        let settings: KafkaSettings = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(settings, KafkaSettings::default());
    }
}
