//! Configuration for the connector.
//!
//! Configurations are built in code with the `with_*` methods or read from
//! a JSON document with [`ConnectorConfig::from_json`]:
//!
//! ```
//! use livelink_core::ConnectorConfig;
//!
//! let config = ConnectorConfig::from_json(r#"{
//!     "default_adapter": "http",
//!     "adapters": { "http": { "base_url": "https://api.example.com" } },
//!     "endpoints": {
//!         "tags": "local",
//!         "notes": { "type": "http", "cached": true, "exclusions": ["created"] }
//!     },
//!     "retry": { "retry_timeout": 500, "max_retry": -1 }
//! }"#).unwrap();
//!
//! assert!(config.is_cached("notes"));
//! assert_eq!(config.retry.max_retry, None);
//! ```

use crate::error::{ConnectorError, ConnectorResult};
use crate::schema::Schema;
use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a connector.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Adapter used by types without an endpoint mapping.
    #[serde(alias = "defaultInterface")]
    pub default_adapter: Option<String>,
    /// Settings handed to each adapter factory, by adapter name.
    #[serde(alias = "configuration")]
    pub adapters: BTreeMap<String, serde_json::Value>,
    /// Endpoint mappings, by entity type.
    #[serde(alias = "map")]
    pub endpoints: BTreeMap<String, EndpointMapping>,
    /// Retry policy for transient adapter errors.
    pub retry: RetryConfig,
}

impl ConnectorConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Config`] if the document is malformed.
    pub fn from_json(text: &str) -> ConnectorResult<Self> {
        serde_json::from_str(text).map_err(ConnectorError::Config)
    }

    /// Reads a configuration from a parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Config`] if the value has the wrong shape.
    pub fn from_value(value: serde_json::Value) -> ConnectorResult<Self> {
        serde_json::from_value(value).map_err(ConnectorError::Config)
    }

    /// Sets the default adapter.
    pub fn with_default_adapter(mut self, name: impl Into<String>) -> Self {
        self.default_adapter = Some(name.into());
        self
    }

    /// Sets the settings for one adapter.
    pub fn with_adapter_settings(mut self, name: impl Into<String>, settings: serde_json::Value) -> Self {
        self.adapters.insert(name.into(), settings);
        self
    }

    /// Maps an entity type to an endpoint.
    pub fn with_endpoint(mut self, entity_type: impl Into<String>, mapping: impl Into<EndpointMapping>) -> Self {
        self.endpoints.insert(entity_type.into(), mapping.into());
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the full endpoint configuration for a type, if it has one.
    pub fn endpoint(&self, entity_type: &str) -> Option<&EndpointConfig> {
        match self.endpoints.get(entity_type) {
            Some(EndpointMapping::Config(config)) => Some(config),
            _ => None,
        }
    }

    /// Returns the name of the adapter serving a type.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::NoDefaultAdapter`] if the type has no
    /// mapping and no default adapter is configured.
    pub fn adapter_name(&self, entity_type: &str) -> ConnectorResult<&str> {
        let mapped = match self.endpoints.get(entity_type) {
            Some(EndpointMapping::Adapter(name)) => Some(name.as_str()),
            Some(EndpointMapping::Config(config)) => config.adapter.as_deref(),
            None => None,
        };
        mapped
            .or(self.default_adapter.as_deref())
            .ok_or_else(|| ConnectorError::NoDefaultAdapter {
                entity_type: entity_type.to_string(),
            })
    }

    /// Returns true if loads for a type are served from the live store.
    pub fn is_cached(&self, entity_type: &str) -> bool {
        self.endpoint(entity_type).is_some_and(|e| e.cached)
    }

    /// Returns the attributes never sent on create or save.
    pub fn exclusions(&self, entity_type: &str) -> &[String] {
        self.endpoint(entity_type)
            .map(|e| e.exclusions.as_slice())
            .unwrap_or_default()
    }

    /// Returns the schema of a type.
    pub fn schema(&self, entity_type: &str) -> Option<&Arc<dyn Schema>> {
        self.endpoint(entity_type).and_then(|e| e.schema.as_ref())
    }

    /// Returns the embedded attributes of a type, mapped to child types.
    pub fn embeddings(&self, entity_type: &str) -> Option<&BTreeMap<String, String>> {
        self.endpoint(entity_type)
            .map(|e| &e.embeddings)
            .filter(|e| !e.is_empty())
    }
}

/// How one entity type is served.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EndpointMapping {
    /// Served by the named adapter with default policy.
    Adapter(String),
    /// Served according to a full endpoint configuration.
    Config(EndpointConfig),
}

impl From<&str> for EndpointMapping {
    fn from(name: &str) -> Self {
        EndpointMapping::Adapter(name.to_string())
    }
}

impl From<String> for EndpointMapping {
    fn from(name: String) -> Self {
        EndpointMapping::Adapter(name)
    }
}

impl From<EndpointConfig> for EndpointMapping {
    fn from(config: EndpointConfig) -> Self {
        EndpointMapping::Config(config)
    }
}

/// Policy for one entity type.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Adapter serving the type. `None` falls back to the default adapter.
    #[serde(rename = "type", alias = "adapter")]
    pub adapter: Option<String>,
    /// Schema applied to records of this type.
    #[serde(skip)]
    pub schema: Option<Arc<dyn Schema>>,
    /// Whether loads are served from the live store when possible.
    pub cached: bool,
    /// Attributes stripped from create and save payloads.
    pub exclusions: Vec<String>,
    /// Embedded attributes, mapped to the entity type of their children.
    pub embeddings: BTreeMap<String, String>,
}

impl EndpointConfig {
    /// Creates an endpoint served by the default adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the adapter.
    pub fn with_adapter(mut self, name: impl Into<String>) -> Self {
        self.adapter = Some(name.into());
        self
    }

    /// Sets the schema.
    pub fn with_schema(mut self, schema: Arc<dyn Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Enables or disables caching.
    pub fn with_cache(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// Sets the write exclusions.
    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }

    /// Declares an embedded attribute.
    pub fn with_embedding(mut self, attribute: impl Into<String>, child_type: impl Into<String>) -> Self {
        self.embeddings.insert(attribute.into(), child_type.into());
        self
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("adapter", &self.adapter)
            .field("schema", &self.schema.is_some())
            .field("cached", &self.cached)
            .field("exclusions", &self.exclusions)
            .field("embeddings", &self.embeddings)
            .finish()
    }
}

/// Configuration for retry behavior.
///
/// Only transient adapter errors are retried.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds when read from JSON.
    #[serde(alias = "retryTimeout", deserialize_with = "duration_millis")]
    pub retry_timeout: Duration,
    /// Maximum number of retries. `None` retries forever; `-1` in JSON.
    #[serde(alias = "maxRetry", deserialize_with = "retry_limit")]
    pub max_retry: Option<u32>,
    /// Multiplier applied to the delay after each retry.
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay, in milliseconds when read from JSON.
    #[serde(deserialize_with = "duration_millis")]
    pub max_delay: Duration,
    /// Whether to add up to 25% random jitter to each delay.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the default retry configuration.
    pub fn new() -> Self {
        Self {
            retry_timeout: Duration::from_millis(2000),
            max_retry: Some(1000),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            add_jitter: false,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self::new().with_max_retry(Some(0))
    }

    /// Creates a configuration that retries forever.
    pub fn unlimited() -> Self {
        Self::new().with_max_retry(None)
    }

    /// Sets the delay before the first retry.
    pub fn with_retry_timeout(mut self, delay: Duration) -> Self {
        self.retry_timeout = delay;
        self
    }

    /// Sets the maximum number of retries.
    pub fn with_max_retry(mut self, max_retry: Option<u32>) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Returns true if another retry is allowed after `retries` retries.
    pub fn allows_retry(&self, retries: u32) -> bool {
        self.max_retry.map_or(true, |max| retries < max)
    }

    /// Calculates the delay before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.retry_timeout.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64()).max(0.0);

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

fn retry_limit<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    match Option::<i64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(n) if n < 0 => Ok(None),
        Some(n) => u32::try_from(n).map(Some).map_err(D::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_value::RawRecord;

    #[test]
    fn retry_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.retry_timeout, Duration::from_millis(2000));
        assert_eq!(config.max_retry, Some(1000));
        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(7), Duration::from_secs(2));
    }

    #[test]
    fn retry_allowance() {
        let config = RetryConfig::new().with_max_retry(Some(2));
        assert!(config.allows_retry(0));
        assert!(config.allows_retry(1));
        assert!(!config.allows_retry(2));
        assert!(!RetryConfig::no_retry().allows_retry(0));
        assert!(RetryConfig::unlimited().allows_retry(u32::MAX));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new()
            .with_retry_timeout(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new()
            .with_retry_timeout(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(true);

        let delay = config.delay_for_attempt(5);
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_millis(6250)); // 5s + 25% jitter
    }

    #[test]
    fn endpoint_resolution() {
        let config = ConnectorConfig::new()
            .with_default_adapter("http")
            .with_endpoint("tags", "local")
            .with_endpoint("notes", EndpointConfig::new().with_adapter("socket").with_cache(true))
            .with_endpoint("users", EndpointConfig::new().with_exclusions(["password"]));

        assert_eq!(config.adapter_name("tags").unwrap(), "local");
        assert_eq!(config.adapter_name("notes").unwrap(), "socket");
        assert_eq!(config.adapter_name("users").unwrap(), "http");
        assert_eq!(config.adapter_name("other").unwrap(), "http");
        assert!(config.is_cached("notes"));
        assert!(!config.is_cached("tags"));
        assert_eq!(config.exclusions("users"), ["password".to_string()]);
        assert!(config.exclusions("tags").is_empty());
    }

    #[test]
    fn missing_default_adapter() {
        let config = ConnectorConfig::new();
        assert!(matches!(
            config.adapter_name("notes"),
            Err(ConnectorError::NoDefaultAdapter { .. })
        ));
    }

    #[test]
    fn parse_json() {
        let config = ConnectorConfig::from_json(
            r#"{
                "defaultInterface": "http",
                "configuration": { "http": { "base": "x" }, "local": {} },
                "map": {
                    "tags": "local",
                    "notes": {
                        "type": "http",
                        "cached": true,
                        "exclusions": ["created"],
                        "embeddings": { "author": "users" }
                    }
                },
                "retry": { "maxRetry": 3, "retryTimeout": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_adapter.as_deref(), Some("http"));
        assert_eq!(config.adapters.len(), 2);
        assert_eq!(config.adapter_name("tags").unwrap(), "local");
        assert!(config.is_cached("notes"));
        assert_eq!(config.exclusions("notes"), ["created".to_string()]);
        assert_eq!(
            config.embeddings("notes").and_then(|e| e.get("author")).map(String::as_str),
            Some("users")
        );
        assert_eq!(config.retry.max_retry, Some(3));
        assert_eq!(config.retry.retry_timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn negative_max_retry_is_unlimited() {
        let config = ConnectorConfig::from_json(r#"{ "retry": { "max_retry": -1 } }"#).unwrap();
        assert_eq!(config.retry.max_retry, None);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = ConnectorConfig::from_json("{ \"endpoints\": 3 }").unwrap_err();
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[derive(Debug)]
    struct Passthrough;

    impl Schema for Passthrough {
        fn filter_model(&self, raw: RawRecord) -> RawRecord {
            raw
        }

        fn generate_model(&self, _existing: Option<&RawRecord>, patch: RawRecord) -> RawRecord {
            patch
        }
    }

    #[test]
    fn schema_is_attached_in_code() {
        let config = ConnectorConfig::new().with_endpoint(
            "notes",
            EndpointConfig::new().with_schema(Arc::new(Passthrough)),
        );
        assert!(config.schema("notes").is_some());
        assert!(config.schema("tags").is_none());
        assert!(format!("{:?}", config.endpoint("notes").unwrap()).contains("schema: true"));
    }
}
