//! Connector fixtures and test helpers.
//!
//! Provides a ready connector over a [`MockAdapter`], a whitelisting
//! [`Schema`] and tracing setup for tests.

use crate::mock::MockAdapter;
use livelink_core::{Attributes, Connector, ConnectorConfig, RawRecord, RetryConfig, Schema, Value, ID_KEY};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Name the fixtures register the mock adapter under.
pub const MOCK_ADAPTER: &str = "mock";

/// Retry policy of [`test_config`]: 100ms between attempts, 3 retries.
pub fn test_retry() -> RetryConfig {
    RetryConfig::new()
        .with_retry_timeout(Duration::from_millis(100))
        .with_max_retry(Some(3))
}

/// A config whose default adapter is the mock, with [`test_retry`].
pub fn test_config() -> ConnectorConfig {
    ConnectorConfig::new()
        .with_default_adapter(MOCK_ADAPTER)
        .with_retry(test_retry())
}

/// Builds a connector over a fresh [`MockAdapter`].
///
/// Must run inside a tokio runtime.
pub fn mock_connector(config: ConnectorConfig) -> (Connector, Arc<MockAdapter>) {
    connector_with(config, MockAdapter::new())
}

/// Builds a connector over `mock`.
///
/// Must run inside a tokio runtime.
pub fn connector_with(config: ConnectorConfig, mock: MockAdapter) -> (Connector, Arc<MockAdapter>) {
    let mock = Arc::new(mock);
    let connector = Connector::builder(config)
        .adapter(MOCK_ADAPTER, mock.clone())
        .build()
        .expect("Failed to build connector");
    (connector, mock)
}

/// Lets spawned connector tasks run until they block on a timer.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Installs a fmt subscriber for test output.
///
/// Honors `RUST_LOG` and defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// A schema that keeps only whitelisted fields and fills defaults.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    fields: Vec<String>,
    defaults: Attributes,
}

impl FieldSchema {
    /// Keeps `id` and `fields`.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            defaults: Attributes::new(),
        }
    }

    /// Fills `key` with `value` when generating a model without it.
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Returns the schema as a trait object.
    pub fn shared(self) -> Arc<dyn Schema> {
        Arc::new(self)
    }
}

impl Schema for FieldSchema {
    fn filter_model(&self, raw: RawRecord) -> RawRecord {
        raw.into_iter()
            .filter(|(key, _)| key == ID_KEY || self.fields.contains(key))
            .collect()
    }

    fn generate_model(&self, existing: Option<&RawRecord>, patch: RawRecord) -> RawRecord {
        let mut model = existing.cloned().unwrap_or_default();
        model.extend(patch);
        for (key, value) in &self.defaults {
            model.entry(key.clone()).or_insert_with(|| value.clone());
        }
        model
    }
}
