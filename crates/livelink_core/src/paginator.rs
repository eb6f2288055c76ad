//! Paginated collections.
//!
//! A paginated collection lives outside the collection store. Its
//! [`Paginator`] holds the page window; moving the window reloads through
//! [`Adapter::load_collection_page`] and pushes onto the same channel.
//!
//! [`Adapter::load_collection_page`]: crate::Adapter::load_collection_page

use crate::adapter::PageRequest;
use crate::channel::Channel;
use crate::collection::Collection;
use crate::connector::{Connector, ConnectorHandle, TaskKey};
use crate::error::{ConnectorError, ConnectorResult};
use crate::filter::Filter;
use crate::retry::run_with_retry;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default number of records per page.
pub const DEFAULT_RANGE: u32 = 20;

/// Options of a paginated load.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOptions {
    /// Filter of the collection.
    pub filter: Filter,
    /// First page to load.
    pub page: u32,
    /// Offset of the first record.
    pub offset: u32,
    /// Records per page.
    pub range: u32,
}

impl CollectionOptions {
    /// Creates options for page 1 of `filter`.
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            page: 1,
            offset: 0,
            range: DEFAULT_RANGE,
        }
    }

    /// Sets the page.
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Sets the offset.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the range.
    pub fn with_range(mut self, range: u32) -> Self {
        self.range = range;
        self
    }

    fn request(&self) -> PageRequest {
        PageRequest {
            page: self.page,
            offset: self.offset,
            range: self.range,
        }
    }
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self::new(Filter::all())
    }
}

#[derive(Debug)]
struct PageState {
    request: PageRequest,
    total: Option<u64>,
}

struct PaginatorInner {
    id: u64,
    entity_type: String,
    filter: Filter,
    state: Mutex<PageState>,
    channel: Channel<Collection>,
    connector: ConnectorHandle,
}

/// The page window of a paginated collection.
///
/// Cloning a paginator yields another handle to the same window.
#[derive(Clone)]
pub struct Paginator {
    inner: Arc<PaginatorInner>,
}

impl Paginator {
    /// Returns the entity type.
    pub fn entity_type(&self) -> &str {
        &self.inner.entity_type
    }

    /// Returns the filter.
    pub fn filter(&self) -> &Filter {
        &self.inner.filter
    }

    /// Returns the current page request.
    pub fn request(&self) -> PageRequest {
        self.inner.state.lock().request
    }

    /// Returns the page.
    pub fn page(&self) -> u32 {
        self.request().page
    }

    /// Returns the offset.
    pub fn offset(&self) -> u32 {
        self.request().offset
    }

    /// Returns the range.
    pub fn range(&self) -> u32 {
        self.request().range
    }

    /// Returns the total the backend last reported.
    pub fn total(&self) -> Option<u64> {
        self.inner.state.lock().total
    }

    /// Moves to `page` and reloads.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Detached`] if the connector is gone, or an
    /// adapter resolution error.
    pub fn set_page(&self, page: u32) -> ConnectorResult<()> {
        self.inner.state.lock().request.page = page;
        self.reload()
    }

    /// Moves to `offset` and reloads.
    ///
    /// # Errors
    ///
    /// See [`Paginator::set_page`].
    pub fn set_offset(&self, offset: u32) -> ConnectorResult<()> {
        self.inner.state.lock().request.offset = offset;
        self.reload()
    }

    /// Changes the range and reloads.
    ///
    /// # Errors
    ///
    /// See [`Paginator::set_page`].
    pub fn set_range(&self, range: u32) -> ConnectorResult<()> {
        self.inner.state.lock().request.range = range;
        self.reload()
    }

    /// Reloads the current page.
    ///
    /// A reload still running for this paginator is aborted.
    ///
    /// # Errors
    ///
    /// See [`Paginator::set_page`].
    pub fn reload(&self) -> ConnectorResult<()> {
        let connector = self.inner.connector.upgrade().ok_or(ConnectorError::Detached)?;
        connector.load_page(self)
    }

    fn set_total(&self, total: Option<u64>) {
        if total.is_some() {
            self.inner.state.lock().total = total;
        }
    }
}

impl fmt::Debug for Paginator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paginator")
            .field("entity_type", &self.inner.entity_type)
            .field("filter", &self.inner.filter.hash())
            .field("state", &*self.inner.state.lock())
            .finish()
    }
}

/// A paginated collection channel and its paginator.
#[derive(Debug, Clone)]
pub struct PaginatedCollection {
    /// Receives one collection per loaded page.
    pub channel: Channel<Collection>,
    /// Moves the page window.
    pub paginator: Paginator,
}

impl Connector {
    /// Loads the first page described by `options`.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves `entity_type`.
    pub fn paginated_load_collection(
        &self,
        entity_type: &str,
        options: CollectionOptions,
    ) -> ConnectorResult<PaginatedCollection> {
        let channel = Channel::new();
        let paginator = Paginator {
            inner: Arc::new(PaginatorInner {
                id: self.next_generation(),
                entity_type: entity_type.to_string(),
                state: Mutex::new(PageState {
                    request: options.request(),
                    total: None,
                }),
                filter: options.filter,
                channel: channel.clone(),
                connector: self.handle(),
            }),
        };
        self.load_page(&paginator)?;
        Ok(PaginatedCollection { channel, paginator })
    }

    fn load_page(&self, paginator: &Paginator) -> ConnectorResult<()> {
        let entity_type = paginator.entity_type().to_string();
        let adapter = self.resolve(&entity_type)?;
        let request = paginator.request();
        debug!(entity_type, page = request.page, offset = request.offset, range = request.range, "loading page");

        let retry = self.config().retry.clone();
        let call = {
            let entity_type = entity_type.clone();
            let filter = paginator.filter().clone();
            async move {
                run_with_retry(&retry, "load_collection_page", || {
                    adapter.load_collection_page(&entity_type, &filter, &request)
                })
                .await
            }
        };
        let target = paginator.clone();
        self.spawn_tracked(TaskKey::Page(paginator.inner.id), &paginator.inner.channel, call, move |connector, outcome| match outcome {
            Ok(page) => {
                let entities = page
                    .rows
                    .into_iter()
                    .map(|row| connector.wrap_entity(&entity_type, row, None))
                    .collect();
                let collection = connector.collect_entities_for(&entity_type, entities);
                target.set_total(page.total);
                debug!(entity_type, page = request.page, count = collection.len(), "page loaded");
                target.inner.channel.push(collection);
            }
            Err(error) => {
                warn!(entity_type, page = request.page, code = error.code, message = %error.message, "page load failed");
                target.inner.channel.fail(error);
            }
        });
        Ok(())
    }
}
