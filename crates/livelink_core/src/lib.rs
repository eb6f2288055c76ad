//! # livelink core
//!
//! Live data connector for livelink.
//!
//! This crate provides:
//! - Replay-last-value channels every operation returns
//! - Entity and collection stores keyed by id and by filter hash
//! - The adapter and schema contracts backends implement
//! - The connector: cache-or-fetch loads, writes, retries with backoff and
//!   cross-invalidation of stored collections
//! - Paginated collections
//!
//! ## Usage
//!
//! ```rust,ignore
//! use livelink_core::{attributes, Connector, ConnectorConfig, Filter};
//!
//! let config = ConnectorConfig::new()
//!     .with_default_adapter("api")
//!     .with_endpoint("notes", "api");
//! let connector = Connector::builder(config)
//!     .adapter("api", adapter)
//!     .build()?;
//!
//! let open = connector.load_collection("notes", Filter::new(attributes! { "status" => "open" })?)?;
//! let notes = open.first().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod channel;
mod collection;
mod config;
mod connector;
mod entity;
mod error;
mod filter;
mod paginator;
mod retry;
mod schema;
mod store;

pub use adapter::{Adapter, PageRequest, RawPage};
pub use channel::{Channel, Event, Subscription};
pub use collection::Collection;
pub use config::{ConnectorConfig, EndpointConfig, EndpointMapping, RetryConfig};
pub use connector::{AdapterFactory, Connector, ConnectorBuilder, ConnectorHandle, USERS_TYPE};
pub use entity::{Embedded, Entity, EntityId, ID_KEY};
pub use error::{AdapterResult, ConnectorError, ConnectorResult, InterfaceError, CANCELLED_CODE};
pub use filter::{Filter, FilterHash};
pub use paginator::{CollectionOptions, PaginatedCollection, Paginator, DEFAULT_RANGE};
pub use schema::Schema;
pub use store::{CollectionStore, EntityStore};

pub use livelink_value::{attributes, Attributes, RawRecord, Value};
