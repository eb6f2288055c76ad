//! # livelink testkit
//!
//! Test utilities for livelink.
//!
//! This crate provides:
//! - [`MockAdapter`], an in-memory backend with call counters, failure
//!   injection and simulated latency
//! - [`FieldSchema`], a schema that whitelists fields and fills defaults
//! - Connector fixtures and tracing setup for tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use livelink_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn loads_a_note() {
//!     let (connector, mock) = mock_connector(test_config());
//!     let id = mock.insert("notes", attributes! { "title" => "todo" });
//!     let note = connector.load_entity("notes", id).unwrap().first().await.unwrap();
//!     assert_eq!(note.get("title"), Some(&Value::from("todo")));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mock;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::mock::*;
    pub use livelink_core::{
        attributes, Attributes, Channel, Collection, Connector, ConnectorConfig, EndpointConfig,
        Entity, EntityId, Filter, RetryConfig, Value,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use mock::*;
