//! Configuration management for the ingestion service
//!
//! This module provides configuration file support with TOML format,
//! environment variable overrides, and sensible defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::index::{BulkConfig, IndexConfig};
use crate::input::KafkaConfig;

// =============================================================================
// SecretString - credential handling
// =============================================================================

/// A string wrapper that prevents accidental logging of sensitive data
///
/// Used for the search engine password. Debug and Display print
/// `[REDACTED]` instead of the value.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new SecretString from a regular string
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Access the secret value
    ///
    /// Use this only where the credential is actually sent.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

// =============================================================================
// Configuration sections
// =============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Kafka consumer
    #[serde(default)]
    pub kafka: KafkaSection,

    /// Definition index
    #[serde(default)]
    pub index: IndexSection,

    /// Dispatch stage
    #[serde(default)]
    pub ingest: IngestSection,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

/// Kafka consumer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaSection {
    /// Bootstrap brokers
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,

    /// Topic carrying metric messages
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group id
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// Group session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Offset commit interval in milliseconds
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    /// Start position without a committed offset (latest, earliest)
    #[serde(default = "default_offset_reset")]
    pub offset_reset: String,
}

/// Definition index configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexSection {
    /// Elasticsearch address, host:port
    #[serde(default = "default_es_addr")]
    pub addr: String,

    /// Basic auth user
    #[serde(default)]
    pub user: String,

    /// Basic auth password
    ///
    /// Never written back by [`Config::save_to_file`].
    #[serde(default, skip_serializing)]
    pub pass: SecretString,

    /// Index name
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Warmup window in seconds
    #[serde(default = "default_warmup_window_secs")]
    pub warmup_window_secs: u64,

    /// Percentage of definition writes admitted during warmup
    #[serde(default = "default_warmup_percent")]
    pub warmup_percent: u32,

    /// Concurrent bulk requests
    #[serde(default = "default_bulk_workers")]
    pub bulk_workers: usize,

    /// Maximum documents per bulk request
    #[serde(default = "default_bulk_max_docs")]
    pub bulk_max_docs: usize,

    /// Maximum buffering delay in milliseconds
    #[serde(default = "default_bulk_delay_ms")]
    pub bulk_delay_ms: u64,

    /// Bulk queue capacity
    #[serde(default = "default_bulk_queue_capacity")]
    pub bulk_queue_capacity: usize,

    /// Scroll session keep-alive in seconds
    #[serde(default = "default_scroll_ttl_secs")]
    pub scroll_ttl_secs: u64,

    /// HTTP request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Dispatch stage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestSection {
    /// Record per-organisation usage
    #[serde(default)]
    pub usage_enabled: bool,

    /// Deduplicate definition writes through the front-line cache
    #[serde(default = "default_true")]
    pub defcache_enabled: bool,

    /// Age in seconds after which a cached definition is indexed again
    #[serde(default = "default_defcache_refresh_secs")]
    pub defcache_refresh_secs: u64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Listen address of the health and metrics endpoints
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

// Default value functions
fn default_brokers() -> Vec<String> { vec!["localhost:9092".to_string()] }
fn default_topic() -> String { "mdm".to_string() }
fn default_group_id() -> String { "group1".to_string() }
fn default_session_timeout_ms() -> u64 { 30_000 }
fn default_commit_interval_ms() -> u64 { 1_000 }
fn default_offset_reset() -> String { "latest".to_string() }
fn default_es_addr() -> String { "localhost:9200".to_string() }
fn default_index_name() -> String { "metric".to_string() }
fn default_warmup_window_secs() -> u64 { 1_800 }
fn default_warmup_percent() -> u32 { 1 }
fn default_bulk_workers() -> usize { 20 }
fn default_bulk_max_docs() -> usize { 10_000 }
fn default_bulk_delay_ms() -> u64 { 10_000 }
fn default_bulk_queue_capacity() -> usize { 10_000 }
fn default_scroll_ttl_secs() -> u64 { 60 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_defcache_refresh_secs() -> u64 { 6 * 3600 }
fn default_log_level() -> String { "info".to_string() }
fn default_listen_addr() -> String { "0.0.0.0:6060".to_string() }
fn default_true() -> bool { true }

impl Default for KafkaSection {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            group_id: default_group_id(),
            session_timeout_ms: default_session_timeout_ms(),
            commit_interval_ms: default_commit_interval_ms(),
            offset_reset: default_offset_reset(),
        }
    }
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            addr: default_es_addr(),
            user: String::new(),
            pass: SecretString::default(),
            index_name: default_index_name(),
            warmup_window_secs: default_warmup_window_secs(),
            warmup_percent: default_warmup_percent(),
            bulk_workers: default_bulk_workers(),
            bulk_max_docs: default_bulk_max_docs(),
            bulk_delay_ms: default_bulk_delay_ms(),
            bulk_queue_capacity: default_bulk_queue_capacity(),
            scroll_ttl_secs: default_scroll_ttl_secs(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            usage_enabled: false,
            defcache_enabled: true,
            defcache_refresh_secs: default_defcache_refresh_secs(),
        }
    }
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen_addr: default_listen_addr(),
        }
    }
}

impl KafkaSection {
    /// Consumer configuration
    pub fn to_kafka_config(&self) -> KafkaConfig {
        KafkaConfig {
            brokers: self.brokers.clone(),
            topic: self.topic.clone(),
            group_id: self.group_id.clone(),
            session_timeout: Duration::from_millis(self.session_timeout_ms),
            commit_interval: Duration::from_millis(self.commit_interval_ms),
            offset_reset: self.offset_reset.clone(),
        }
    }
}

impl IndexSection {
    /// Definition index configuration
    pub fn to_index_config(&self) -> IndexConfig {
        IndexConfig {
            addr: self.addr.clone(),
            user: self.user.clone(),
            pass: self.pass.clone(),
            index_name: self.index_name.clone(),
            warmup_window: Duration::from_secs(self.warmup_window_secs),
            warmup_percent: self.warmup_percent,
            bulk: BulkConfig {
                workers: self.bulk_workers,
                max_docs: self.bulk_max_docs,
                buffer_delay_max: Duration::from_millis(self.bulk_delay_ms),
                refresh: true,
                max_retries: 0,
                queue_capacity: self.bulk_queue_capacity,
            },
            scroll_ttl: Duration::from_secs(self.scroll_ttl_secs),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup
    ///
    /// Unparsable numeric values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Kafka
        if let Some(brokers) = lookup("INGEST_KAFKA_BROKERS") {
            self.kafka.brokers = brokers
                .split(',')
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(topic) = lookup("INGEST_KAFKA_TOPIC") {
            self.kafka.topic = topic;
        }
        if let Some(group) = lookup("INGEST_KAFKA_GROUP") {
            self.kafka.group_id = group;
        }

        // Index
        if let Some(addr) = lookup("INGEST_ES_ADDR") {
            self.index.addr = addr;
        }
        if let Some(user) = lookup("INGEST_ES_USER") {
            self.index.user = user;
        }
        if let Some(pass) = lookup("INGEST_ES_PASS") {
            self.index.pass = SecretString::new(pass);
        }
        if let Some(index) = lookup("INGEST_ES_INDEX") {
            self.index.index_name = index;
        }
        if let Some(percent) = lookup("INGEST_WARMUP_PERCENT") {
            if let Ok(p) = percent.parse() {
                self.index.warmup_percent = p;
            }
        }

        // Monitoring
        if let Some(log_level) = lookup("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.kafka
            .to_kafka_config()
            .validate()
            .map_err(|e| format!("kafka: {}", e))?;
        self.index
            .to_index_config()
            .validate()
            .map_err(|e| format!("index: {}", e))?;

        if self.ingest.defcache_enabled && self.ingest.defcache_refresh_secs == 0 {
            return Err("ingest: defcache_refresh_secs must be > 0".to_string());
        }
        if self.monitoring.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "monitoring: invalid listen_addr {:?}",
                self.monitoring.listen_addr
            ));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    ///
    /// The search engine password is left out; supply it through the file
    /// by hand or `INGEST_ES_PASS`.
    pub fn save_to_file(&self, path: &str) -> Result<(), String> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        std::fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file {}: {}", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.kafka.group_id, "group1");
        assert_eq!(config.index.index_name, "metric");
        assert_eq!(config.index.warmup_percent, 1);
        assert!(!config.ingest.usage_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [kafka]
            topic = "metrics"

            [index]
            addr = "es:9200"
            "#,
        )
        .unwrap();
        assert_eq!(config.kafka.topic, "metrics");
        assert_eq!(config.kafka.brokers, vec!["localhost:9092"]);
        assert_eq!(config.index.addr, "es:9200");
        assert_eq!(config.index.bulk_workers, 20);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("INGEST_KAFKA_BROKERS", "a:9092, b:9092"),
            ("INGEST_ES_PASS", "hunter2"),
            ("INGEST_WARMUP_PERCENT", "25"),
            ("INGEST_ES_INDEX", "defs"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.kafka.brokers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.index.pass.expose_secret(), "hunter2");
        assert_eq!(config.index.warmup_percent, 25);
        assert_eq!(config.index.index_name, "defs");
    }

    #[test]
    fn test_bad_numeric_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| (k == "INGEST_WARMUP_PERCENT").then(|| "lots".to_string()));
        assert_eq!(config.index.warmup_percent, 1);
    }

    #[test]
    fn test_invalid_addresses() {
        let mut config = Config::default();
        config.index.addr = "nohost".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitoring.listen_addr = "nope".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_password_redacted() {
        let mut config = Config::default();
        config.index.pass = SecretString::from("hunter2");
        assert!(!format!("{:?}", config).contains("hunter2"));
        assert_eq!(config.index.pass.to_string(), "[REDACTED]");
    }

    #[test]
    fn test_conversions() {
        let config = Config::default();
        let index = config.index.to_index_config();
        assert_eq!(index.bulk.max_docs, 10_000);
        assert_eq!(index.bulk.buffer_delay_max, Duration::from_secs(10));
        assert_eq!(index.scroll_ttl, Duration::from_secs(60));

        let kafka = config.kafka.to_kafka_config();
        assert_eq!(kafka.topic, "mdm");
    }
}
