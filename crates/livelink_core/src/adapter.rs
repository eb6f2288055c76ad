//! Adapter contract.
//!
//! An adapter is a backend-specific driver: an HTTP API, a local store, a
//! realtime socket. It turns connector requests into backend calls and
//! reports failures as [`InterfaceError`]s, whose code decides whether the
//! connector retries.

use crate::entity::EntityId;
use crate::error::{AdapterResult, InterfaceError};
use crate::filter::Filter;
use async_trait::async_trait;
use livelink_value::RawRecord;

/// Page parameters for a paginated collection load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRequest {
    /// Page number.
    pub page: u32,
    /// Offset of the first record.
    pub offset: u32,
    /// Number of records per page.
    pub range: u32,
}

/// One page of raw records.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPage {
    /// Records in backend order.
    pub rows: Vec<RawRecord>,
    /// Total number of records across all pages, if the backend reports it.
    pub total: Option<u64>,
}

impl RawPage {
    /// Creates a page without a total.
    pub fn from_rows(rows: Vec<RawRecord>) -> Self {
        Self { rows, total: None }
    }

    /// Sets the total.
    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }
}

/// A backend driver consumed by the connector.
///
/// Only the load, create, save and delete operations are required.
/// Authentication defaults to a 501 error.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Returns true if saves should receive only changed attributes.
    fn uses_diff(&self) -> bool {
        false
    }

    /// Loads one record. `Ok(None)` means the backend has no such record.
    async fn load_entity(&self, entity_type: &str, id: &EntityId) -> AdapterResult<Option<RawRecord>>;

    /// Loads every record matching `filter`.
    async fn load_collection(&self, entity_type: &str, filter: &Filter) -> AdapterResult<Vec<RawRecord>>;

    /// Loads one page of records matching `filter`.
    async fn load_collection_page(
        &self,
        entity_type: &str,
        filter: &Filter,
        _page: &PageRequest,
    ) -> AdapterResult<RawPage> {
        let rows = self.load_collection(entity_type, filter).await?;
        Ok(RawPage::from_rows(rows))
    }

    /// Creates a record and returns it with its assigned id.
    async fn create_entity(&self, entity_type: &str, data: RawRecord) -> AdapterResult<RawRecord>;

    /// Updates the record `id` with `data` and returns the stored record.
    async fn save_entity(&self, data: RawRecord, entity_type: &str, id: &EntityId) -> AdapterResult<RawRecord>;

    /// Deletes the record `id`.
    async fn delete_entity(&self, entity_type: &str, id: &EntityId) -> AdapterResult<bool>;

    /// Logs in and returns the user record.
    async fn authenticate(&self, _login: &str, _password: &str) -> AdapterResult<RawRecord> {
        Err(InterfaceError::unsupported("authenticate"))
    }

    /// Returns the user record of the current session.
    async fn authenticated(&self) -> AdapterResult<RawRecord> {
        Err(InterfaceError::unsupported("authenticated"))
    }

    /// Ends the current session.
    async fn logout(&self) -> AdapterResult<bool> {
        Err(InterfaceError::unsupported("logout"))
    }

    /// Drops any state the adapter keeps, called by `Connector::clear`.
    fn clear(&self) {}
}
