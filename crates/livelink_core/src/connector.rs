//! The connector.
//!
//! The connector owns the live stores and the adapters. Every operation
//! returns a [`Channel`] at once and performs the adapter work in a tokio
//! task on the runtime captured when the connector was built:
//! - Loads are served from the store when the endpoint is cached, and
//!   concurrent loads of one key share a single adapter call
//! - Transient adapter errors are retried per [`RetryConfig`], terminal ones
//!   fail the channel and drop the key from its store
//! - Every entity that lands in a store is fanned out to each stored
//!   collection of its type whose filter it matches
//!
//! [`RetryConfig`]: crate::RetryConfig

use crate::adapter::Adapter;
use crate::channel::Channel;
use crate::collection::Collection;
use crate::config::ConnectorConfig;
use crate::entity::{Embedded, Entity, EntityId, ID_KEY};
use crate::error::{AdapterResult, ConnectorError, ConnectorResult, InterfaceError};
use crate::filter::{Filter, FilterHash};
use crate::retry::run_with_retry;
use crate::store::{CollectionStore, EntityStore};
use livelink_value::{Attributes, RawRecord, Value};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Entity type of the user records returned by authentication.
pub const USERS_TYPE: &str = "users";

/// Builds an adapter from its JSON settings.
///
/// The handle lets realtime adapters push backend changes into the stores.
pub type AdapterFactory =
    Box<dyn Fn(&serde_json::Value, ConnectorHandle) -> ConnectorResult<Arc<dyn Adapter>> + Send + Sync>;

#[derive(Debug, Default)]
struct TypeStores {
    entities: EntityStore,
    collections: CollectionStore,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TaskKey {
    Entity(String, EntityId),
    Collection(String, FilterHash),
    Page(u64),
    Write(u64),
}

struct TaskEntry {
    generation: u64,
    abort: AbortHandle,
    fail_target: Box<dyn FnOnce(InterfaceError) + Send>,
}

impl TaskEntry {
    /// Aborts the task and fails the channel it was feeding.
    fn cancel(self) {
        self.abort.abort();
        (self.fail_target)(InterfaceError::cancelled());
    }
}

struct ConnectorInner {
    config: ConnectorConfig,
    adapters: RwLock<BTreeMap<String, Arc<dyn Adapter>>>,
    stores: Mutex<HashMap<String, TypeStores>>,
    tasks: Mutex<HashMap<TaskKey, TaskEntry>>,
    next_generation: AtomicU64,
    runtime: Handle,
}

/// Builder for a [`Connector`].
pub struct ConnectorBuilder {
    config: ConnectorConfig,
    factories: BTreeMap<String, AdapterFactory>,
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
}

impl ConnectorBuilder {
    /// Creates a builder for `config`.
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            factories: BTreeMap::new(),
            adapters: BTreeMap::new(),
        }
    }

    /// Registers an adapter factory under `name`.
    ///
    /// The factory receives the settings configured for `name`, or null.
    pub fn factory<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&serde_json::Value, ConnectorHandle) -> ConnectorResult<Arc<dyn Adapter>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
        self
    }

    /// Registers a ready adapter under `name`.
    pub fn adapter(mut self, name: impl Into<String>, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(name.into(), adapter);
        self
    }

    /// Builds the connector on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::NoRuntime`] outside a runtime,
    /// [`ConnectorError::UnknownAdapter`] if settings name an adapter that
    /// has neither a factory nor an instance, or the first factory error.
    pub fn build(self) -> ConnectorResult<Connector> {
        let runtime = Handle::try_current().map_err(|_| ConnectorError::NoRuntime)?;

        if let Some(name) = self
            .config
            .adapters
            .keys()
            .find(|name| !self.factories.contains_key(*name) && !self.adapters.contains_key(*name))
        {
            return Err(ConnectorError::unknown_adapter(name.clone()));
        }

        let inner = Arc::new(ConnectorInner {
            config: self.config,
            adapters: RwLock::new(self.adapters),
            stores: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            runtime,
        });

        let handle = ConnectorHandle(Arc::downgrade(&inner));
        let mut built = BTreeMap::new();
        for (name, factory) in &self.factories {
            let settings = inner
                .config
                .adapters
                .get(name)
                .unwrap_or(&serde_json::Value::Null);
            built.insert(name.clone(), factory(settings, handle.clone())?);
        }
        inner.adapters.write().extend(built);

        info!(adapters = inner.adapters.read().len(), "connector ready");
        Ok(Connector { inner })
    }
}

impl fmt::Debug for ConnectorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorBuilder")
            .field("config", &self.config)
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A weak reference to a [`Connector`].
///
/// Entities and adapters hold handles so they never keep a connector alive.
#[derive(Clone)]
pub struct ConnectorHandle(Weak<ConnectorInner>);

impl ConnectorHandle {
    /// Returns the connector, if it is still alive.
    pub fn upgrade(&self) -> Option<Connector> {
        self.0.upgrade().map(|inner| Connector { inner })
    }
}

impl fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

/// Orchestrates adapters, live stores and retries.
///
/// Cloning a connector yields another handle to the same stores.
#[derive(Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

impl Connector {
    /// Creates a builder.
    pub fn builder(config: ConnectorConfig) -> ConnectorBuilder {
        ConnectorBuilder::new(config)
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Returns a weak handle to this connector.
    pub fn handle(&self) -> ConnectorHandle {
        ConnectorHandle(Arc::downgrade(&self.inner))
    }

    /// Returns the adapter registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::UnknownAdapter`] if there is none.
    pub fn adapter(&self, name: &str) -> ConnectorResult<Arc<dyn Adapter>> {
        self.inner
            .adapters
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::unknown_adapter(name))
    }

    pub(crate) fn resolve(&self, entity_type: &str) -> ConnectorResult<Arc<dyn Adapter>> {
        let name = self.inner.config.adapter_name(entity_type)?;
        self.adapter(name)
    }

    // ---- loads ----

    /// Loads one entity.
    ///
    /// For a cached endpoint an existing channel is returned without
    /// contacting the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves `entity_type`, or if `id` is
    /// temporary.
    pub fn load_entity(&self, entity_type: &str, id: impl Into<EntityId>) -> ConnectorResult<Channel<Entity>> {
        let use_cache = self.inner.config.is_cached(entity_type);
        self.load_entity_with(entity_type, id.into(), use_cache)
    }

    fn load_entity_with(
        &self,
        entity_type: &str,
        id: EntityId,
        use_cache: bool,
    ) -> ConnectorResult<Channel<Entity>> {
        if id.is_temporary() {
            return Err(ConnectorError::invalid_operation(
                "temporary entities exist only on the client",
            ));
        }
        let adapter = self.resolve(entity_type)?;

        let channel = {
            let mut stores = self.inner.stores.lock();
            let store = &mut stores.entry(entity_type.to_string()).or_default().entities;
            if use_cache {
                if let Some(channel) = store.existing(&id) {
                    debug!(entity_type, %id, "entity served from store");
                    return Ok(channel);
                }
            }
            store.get_channel(&id)
        };

        let key = TaskKey::Entity(entity_type.to_string(), id.clone());
        if self.is_running(&key) {
            debug!(entity_type, %id, "joined in-flight entity load");
            return Ok(channel);
        }

        debug!(entity_type, %id, "loading entity");
        let retry = self.inner.config.retry.clone();
        let call = {
            let entity_type = entity_type.to_string();
            let id = id.clone();
            async move {
                run_with_retry(&retry, "load_entity", || adapter.load_entity(&entity_type, &id)).await
            }
        };
        let entity_type = entity_type.to_string();
        self.spawn_tracked(key, &channel, call, move |connector, outcome| match outcome {
            Ok(Some(raw)) => connector.finish_entity_load(&entity_type, &id, raw),
            Ok(None) => {
                let error = InterfaceError::not_found(format!("{entity_type} {id} not found"));
                connector.fail_entity(&entity_type, &id, error);
            }
            Err(error) => connector.fail_entity(&entity_type, &id, error),
        });
        Ok(channel)
    }

    fn finish_entity_load(&self, entity_type: &str, id: &EntityId, raw: RawRecord) {
        let entity = self.wrap_entity(entity_type, raw, Some(id));
        self.register_entity(entity_type, id, entity);
        debug!(entity_type, %id, "entity loaded");
    }

    fn fail_entity(&self, entity_type: &str, id: &EntityId, error: InterfaceError) {
        warn!(entity_type, %id, code = error.code, message = %error.message, "entity load failed");
        let mut stores = self.inner.stores.lock();
        if let Some(channel) = stores
            .get_mut(entity_type)
            .and_then(|s| s.entities.unregister(id))
        {
            channel.fail(error);
        }
    }

    /// Loads the collection of `entity_type` matching `filter`.
    ///
    /// For a cached endpoint an existing channel is returned without
    /// contacting the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves `entity_type`.
    pub fn load_collection(&self, entity_type: &str, filter: Filter) -> ConnectorResult<Channel<Collection>> {
        let use_cache = self.inner.config.is_cached(entity_type);
        self.load_collection_with(entity_type, filter, use_cache)
    }

    fn load_collection_with(
        &self,
        entity_type: &str,
        filter: Filter,
        use_cache: bool,
    ) -> ConnectorResult<Channel<Collection>> {
        let adapter = self.resolve(entity_type)?;

        let channel = {
            let mut stores = self.inner.stores.lock();
            let store = &mut stores.entry(entity_type.to_string()).or_default().collections;
            if use_cache {
                if let Some(channel) = store.existing(&filter) {
                    debug!(entity_type, filter = %filter.hash(), "collection served from store");
                    return Ok(channel);
                }
            }
            store.get_channel(&filter)
        };

        let key = TaskKey::Collection(entity_type.to_string(), filter.hash().clone());
        if self.is_running(&key) {
            debug!(entity_type, filter = %filter.hash(), "joined in-flight collection load");
            return Ok(channel);
        }

        debug!(entity_type, filter = %filter.hash(), "loading collection");
        let retry = self.inner.config.retry.clone();
        let call = {
            let entity_type = entity_type.to_string();
            let filter = filter.clone();
            async move {
                run_with_retry(&retry, "load_collection", || {
                    adapter.load_collection(&entity_type, &filter)
                })
                .await
            }
        };
        let entity_type = entity_type.to_string();
        self.spawn_tracked(key, &channel, call, move |connector, outcome| match outcome {
            Ok(rows) => connector.finish_collection_load(&entity_type, filter, rows),
            Err(error) => connector.fail_collection(&entity_type, &filter, error),
        });
        Ok(channel)
    }

    fn finish_collection_load(&self, entity_type: &str, filter: Filter, rows: Vec<RawRecord>) {
        let entities: Vec<Entity> = rows
            .into_iter()
            .map(|row| self.wrap_entity(entity_type, row, None))
            .collect();
        let count = entities.len();

        let mut stores = self.inner.stores.lock();
        let stores = stores.entry(entity_type.to_string()).or_default();
        let collection = Self::collect_entities(stores, entity_type, entities, Some(filter.hash()));
        stores.collections.register_collection(collection, filter);
        debug!(entity_type, count, "collection loaded");
    }

    /// Registers `entities` in the entity store and builds an unstored
    /// collection of them. Stored collections that gained an entity are
    /// pushed.
    pub(crate) fn collect_entities_for(
        &self,
        entity_type: &str,
        entities: Vec<Entity>,
    ) -> Collection {
        let mut stores = self.inner.stores.lock();
        let stores = stores.entry(entity_type.to_string()).or_default();
        Self::collect_entities(stores, entity_type, entities, None)
    }

    /// Stored collections that gained an entity are pushed, except the one
    /// under `own`.
    fn collect_entities(
        stores: &mut TypeStores,
        entity_type: &str,
        entities: Vec<Entity>,
        own: Option<&FilterHash>,
    ) -> Collection {
        let mut touched = BTreeSet::new();
        let collection = Collection::from_entities(entity_type, entities, |entity| {
            let channel = stores.entities.register_entity(entity.clone(), entity.id());
            touched.extend(
                stores
                    .collections
                    .register_entity_in_collections(entity, &channel, false),
            );
            channel
        });
        if let Some(own) = own {
            touched.remove(own);
        }
        stores.collections.refresh_hashes(&touched);
        collection
    }

    fn fail_collection(&self, entity_type: &str, filter: &Filter, error: InterfaceError) {
        warn!(entity_type, filter = %filter.hash(), code = error.code, message = %error.message, "collection load failed");
        let mut stores = self.inner.stores.lock();
        if let Some(channel) = stores
            .get_mut(entity_type)
            .and_then(|s| s.collections.unregister(filter))
        {
            channel.fail(error);
        }
    }

    /// Reloads an entity, but only if it is in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves `entity_type`.
    pub fn refresh_entity(
        &self,
        entity_type: &str,
        id: impl Into<EntityId>,
    ) -> ConnectorResult<Option<Channel<Entity>>> {
        let id = id.into();
        if !self.is_entity_in_store(entity_type, &id) {
            return Ok(None);
        }
        self.load_entity_with(entity_type, id, false).map(Some)
    }

    /// Reloads a collection, but only if it is in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves `entity_type`.
    pub fn refresh_collection(
        &self,
        entity_type: &str,
        filter: Filter,
    ) -> ConnectorResult<Option<Channel<Collection>>> {
        if !self.is_collection_in_store(entity_type, &filter) {
            return Ok(None);
        }
        self.load_collection_with(entity_type, filter, false).map(Some)
    }

    // ---- writes ----

    /// Creates an entity.
    ///
    /// The schema's generate step fills the payload and write exclusions are
    /// stripped. On success the returned channel becomes the live channel
    /// of the new entity.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves `entity_type`.
    pub fn create_entity(&self, entity_type: &str, data: Attributes) -> ConnectorResult<Channel<Entity>> {
        let adapter = self.resolve(entity_type)?;
        let mut payload = match self.inner.config.schema(entity_type) {
            Some(schema) => schema.generate_model(None, data),
            None => data,
        };
        payload.remove(ID_KEY);
        self.strip_exclusions(entity_type, &mut payload);

        let result = Channel::new();
        let retry = self.inner.config.retry.clone();
        let call = {
            let entity_type = entity_type.to_string();
            async move {
                run_with_retry(&retry, "create_entity", || {
                    adapter.create_entity(&entity_type, payload.clone())
                })
                .await
            }
        };
        let entity_type = entity_type.to_string();
        let target = result.clone();
        self.spawn_tracked(self.write_key(), &result, call, move |connector, outcome| match outcome {
            Ok(raw) => connector.finish_create(&entity_type, raw, &target),
            Err(error) => {
                warn!(entity_type, code = error.code, message = %error.message, "create failed");
                target.fail(error);
            }
        });
        Ok(result)
    }

    fn finish_create(&self, entity_type: &str, raw: RawRecord, result: &Channel<Entity>) {
        let entity = self.wrap_entity(entity_type, raw, None);
        let id = entity.id().clone();
        let mut stores = self.inner.stores.lock();
        let stores = stores.entry(entity_type.to_string()).or_default();
        let live = stores.entities.register_channel(&id, result.clone());
        live.push(entity.clone());
        if !Channel::same(&live, result) {
            result.push(entity.clone());
        }
        stores
            .collections
            .register_entity_in_collections(&entity, &live, true);
        info!(entity_type, %id, "entity created");
    }

    /// Builds a temporary entity and registers it without contacting any
    /// adapter.
    ///
    /// The entity joins matching stored collections. Saving it later
    /// performs a create.
    pub fn create_temporary_entity(&self, entity_type: &str, data: Attributes) -> Entity {
        let data = match self.inner.config.schema(entity_type) {
            Some(schema) => schema.generate_model(None, data),
            None => data,
        };
        let mut entity = Entity::new(entity_type, EntityId::temporary(), data);
        entity.attach(self.handle());

        let id = entity.id().clone();
        self.register_entity(entity_type, &id, entity.clone());
        debug!(entity_type, %id, "temporary entity registered");
        entity
    }

    /// Saves an entity.
    ///
    /// Diff-mode adapters receive only the changed attributes. If there are
    /// none the adapter is not called and the returned channel already holds
    /// the entity.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves the entity type, or if the
    /// entity is temporary.
    pub fn save_entity(&self, entity: &Entity) -> ConnectorResult<Channel<Entity>> {
        if entity.is_temporary() {
            return Err(ConnectorError::invalid_operation(
                "temporary entities are created, not saved",
            ));
        }
        let entity_type = entity.entity_type().to_string();
        let adapter = self.resolve(&entity_type)?;
        let diff_mode = adapter.uses_diff();
        let mut payload = if diff_mode {
            entity.diff()
        } else {
            entity.clone_attributes()
        };
        self.strip_exclusions(&entity_type, &mut payload);

        if diff_mode && payload.is_empty() {
            debug!(entity_type, id = %entity.id(), "nothing to save");
            return Ok(Channel::with_value(entity.clone()));
        }

        let result = Channel::new();
        let retry = self.inner.config.retry.clone();
        let call = {
            let entity_type = entity_type.clone();
            let id = entity.id().clone();
            async move {
                run_with_retry(&retry, "save_entity", || {
                    adapter.save_entity(payload.clone(), &entity_type, &id)
                })
                .await
            }
        };
        let local = entity.clone();
        let target = result.clone();
        self.spawn_tracked(self.write_key(), &result, call, move |connector, outcome| match outcome {
            Ok(raw) => connector.finish_save(local, raw, &target),
            Err(error) => {
                warn!(entity_type, id = %local.id(), code = error.code, message = %error.message, "save failed");
                target.fail(error);
            }
        });
        Ok(result)
    }

    fn finish_save(&self, local: Entity, raw: RawRecord, result: &Channel<Entity>) {
        let entity_type = local.entity_type().to_string();
        let id = local.id().clone();

        // the backend record wins, fields it leaves out keep their local value
        let mut record = local.clone_attributes();
        record.extend(raw);
        let mut entity = self.wrap_entity(&entity_type, record, Some(&id));
        for (name, embedded) in local.embeds() {
            if entity.embed(name).is_none() {
                entity.set_embed(name.clone(), embedded.clone());
            }
        }

        result.push(entity.clone());
        self.register_entity(&entity_type, &id, entity);
        debug!(entity_type, %id, "entity saved");
    }

    /// Deletes an entity.
    ///
    /// On success the entity leaves its store and every collection holding
    /// it. A temporary entity is dropped locally without contacting the
    /// adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves the entity type.
    pub fn delete_entity(&self, entity: &Entity) -> ConnectorResult<Channel<bool>> {
        let entity_type = entity.entity_type().to_string();
        if entity.is_temporary() {
            self.remove_temporary(entity);
            return Ok(Channel::with_value(true));
        }
        let adapter = self.resolve(&entity_type)?;

        let result = Channel::new();
        let retry = self.inner.config.retry.clone();
        let call = {
            let entity_type = entity_type.clone();
            let id = entity.id().clone();
            async move {
                run_with_retry(&retry, "delete_entity", || adapter.delete_entity(&entity_type, &id)).await
            }
        };
        let local = entity.clone();
        let target = result.clone();
        self.spawn_tracked(self.write_key(), &result, call, move |connector, outcome| match outcome {
            Ok(true) => {
                connector.purge_entity(&local);
                info!(entity_type, id = %local.id(), "entity deleted");
                target.push(true);
            }
            Ok(false) => target.push(false),
            Err(error) => {
                warn!(entity_type, id = %local.id(), code = error.code, message = %error.message, "delete failed");
                target.fail(error);
            }
        });
        Ok(result)
    }

    pub(crate) fn remove_temporary(&self, entity: &Entity) {
        let mut stores = self.inner.stores.lock();
        if let Some(stores) = stores.get_mut(entity.entity_type()) {
            stores.collections.delete_entity_from_collection(entity);
        }
    }

    // ---- authentication ----

    /// Logs in through the named adapter.
    ///
    /// The user record is wrapped as an entity of type `"users"`. There is
    /// no retry.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::UnknownAdapter`] if there is no such adapter.
    pub fn authenticate(&self, adapter_name: &str, login: &str, password: &str) -> ConnectorResult<Channel<Entity>> {
        let adapter = self.adapter(adapter_name)?;
        let login = login.to_string();
        let password = password.to_string();
        let call = async move { adapter.authenticate(&login, &password).await };
        self.spawn_user(call)
    }

    /// Returns the user of the current session of the named adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::UnknownAdapter`] if there is no such adapter.
    pub fn authenticated(&self, adapter_name: &str) -> ConnectorResult<Channel<Entity>> {
        let adapter = self.adapter(adapter_name)?;
        let call = async move { adapter.authenticated().await };
        self.spawn_user(call)
    }

    fn spawn_user<F>(&self, call: F) -> ConnectorResult<Channel<Entity>>
    where
        F: Future<Output = AdapterResult<RawRecord>> + Send + 'static,
    {
        let result = Channel::new();
        let target = result.clone();
        self.spawn_tracked(self.write_key(), &result, call, move |connector, outcome| match outcome {
            Ok(raw) => target.push(connector.wrap_entity(USERS_TYPE, raw, None)),
            Err(error) => {
                warn!(code = error.code, message = %error.message, "authentication failed");
                target.fail(error);
            }
        });
        Ok(result)
    }

    /// Ends the session of the named adapter.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::UnknownAdapter`] if there is no such adapter.
    pub fn logout(&self, adapter_name: &str) -> ConnectorResult<Channel<bool>> {
        let adapter = self.adapter(adapter_name)?;
        let result = Channel::new();
        let target = result.clone();
        let call = async move { adapter.logout().await };
        self.spawn_tracked(self.write_key(), &result, call, move |_, outcome| match outcome {
            Ok(done) => target.push(done),
            Err(error) => target.fail(error),
        });
        Ok(result)
    }

    // ---- remote push hooks ----

    /// Registers a record pushed by the backend.
    ///
    /// The record is stored under `id` and fanned out to matching
    /// collections.
    pub fn register_entity_by_data(
        &self,
        entity_type: &str,
        id: impl Into<EntityId>,
        mut raw: RawRecord,
    ) -> Channel<Entity> {
        let id = id.into();
        if !id.is_temporary() {
            raw.insert(ID_KEY.to_string(), id.to_value());
        }
        let entity = self.wrap_entity(entity_type, raw, Some(&id));
        let id = entity.id().clone();
        debug!(entity_type, %id, "entity pushed by backend");
        self.register_entity(entity_type, &id, entity)
    }

    /// Drops a record the backend reported as deleted, from its store and
    /// from every collection holding it.
    pub fn unregister_entity_type_and_id(&self, entity_type: &str, id: impl Into<EntityId>) {
        let id = id.into();
        let known = {
            let stores = self.inner.stores.lock();
            stores
                .get(entity_type)
                .and_then(|s| s.entities.existing(&id))
                .and_then(|channel| channel.value())
        };
        let entity = known.unwrap_or_else(|| Entity::new(entity_type, id.clone(), Attributes::new()));
        debug!(entity_type, %id, "entity removed by backend");
        self.purge_entity(&entity);
    }

    /// Reloads every stored collection of `entity_type` whose filter the
    /// pushed record matches. Returns the reloaded channels.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter serves `entity_type`.
    pub fn refresh_collection_with_data(
        &self,
        entity_type: &str,
        raw: &RawRecord,
    ) -> ConnectorResult<Vec<Channel<Collection>>> {
        let id = raw.get(ID_KEY).and_then(EntityId::from_value);
        let filters = {
            let stores = self.inner.stores.lock();
            stores
                .get(entity_type)
                .map(|s| s.collections.matching_filters(raw, id.as_ref()))
                .unwrap_or_default()
        };
        filters
            .into_iter()
            .map(|filter| self.load_collection_with(entity_type, filter, false))
            .collect()
    }

    // ---- store management ----

    /// Drops an entity channel and cancels its scheduled retries.
    ///
    /// A load still in flight fails the channel with
    /// [`InterfaceError::cancelled`].
    pub fn unregister_entity(&self, entity_type: &str, id: impl Into<EntityId>) {
        let id = id.into();
        {
            let mut stores = self.inner.stores.lock();
            if let Some(stores) = stores.get_mut(entity_type) {
                stores.entities.unregister(&id);
            }
        }
        self.cancel_task(&TaskKey::Entity(entity_type.to_string(), id));
    }

    /// Drops a collection and cancels its scheduled retries.
    ///
    /// A load still in flight fails the channel with
    /// [`InterfaceError::cancelled`].
    pub fn unregister_collection(&self, entity_type: &str, filter: &Filter) {
        {
            let mut stores = self.inner.stores.lock();
            if let Some(stores) = stores.get_mut(entity_type) {
                stores.collections.unregister(filter);
            }
        }
        self.cancel_task(&TaskKey::Collection(entity_type.to_string(), filter.hash().clone()));
    }

    /// Returns true if an entity channel exists for `(entity_type, id)`.
    pub fn is_entity_in_store(&self, entity_type: &str, id: &EntityId) -> bool {
        self.inner
            .stores
            .lock()
            .get(entity_type)
            .is_some_and(|s| s.entities.is_in_store(id))
    }

    /// Returns true if a collection channel exists for `(entity_type, filter)`.
    pub fn is_collection_in_store(&self, entity_type: &str, filter: &Filter) -> bool {
        self.inner
            .stores
            .lock()
            .get(entity_type)
            .is_some_and(|s| s.collections.is_in_store(filter))
    }

    /// Returns the number of adapter tasks still running or scheduled.
    pub fn running_tasks(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Drops every store, cancels every task and clears every adapter.
    ///
    /// Channels of cancelled tasks fail with [`InterfaceError::cancelled`].
    pub fn clear(&self) {
        let tasks: Vec<TaskEntry> = self.inner.tasks.lock().drain().map(|(_, t)| t).collect();
        let cancelled = tasks.len();
        for task in tasks {
            task.cancel();
        }
        self.inner.stores.lock().clear();
        for adapter in self.inner.adapters.read().values() {
            adapter.clear();
        }
        info!(cancelled, "connector cleared");
    }

    // ---- internals ----

    /// Pushes `entity` onto its live channel and fans it out to matching
    /// collections.
    fn register_entity(&self, entity_type: &str, id: &EntityId, entity: Entity) -> Channel<Entity> {
        let mut stores = self.inner.stores.lock();
        let stores = stores.entry(entity_type.to_string()).or_default();
        let channel = stores.entities.register_entity(entity.clone(), id);
        stores
            .collections
            .register_entity_in_collections(&entity, &channel, true);
        channel
    }

    fn purge_entity(&self, entity: &Entity) {
        {
            let mut stores = self.inner.stores.lock();
            if let Some(stores) = stores.get_mut(entity.entity_type()) {
                stores.entities.unregister(entity.id());
                stores.collections.delete_entity_from_collection(entity);
            }
        }
        self.cancel_task(&TaskKey::Entity(
            entity.entity_type().to_string(),
            entity.id().clone(),
        ));
    }

    /// Wraps a raw record into an attached entity.
    ///
    /// The schema filter runs first. Embedded attributes declared for the
    /// endpoint become child entities. A record without an id takes
    /// `fallback_id`, or a temporary id.
    pub(crate) fn wrap_entity(&self, entity_type: &str, raw: RawRecord, fallback_id: Option<&EntityId>) -> Entity {
        let mut raw = match self.inner.config.schema(entity_type) {
            Some(schema) => schema.filter_model(raw),
            None => raw,
        };

        let mut embeds = Vec::new();
        if let Some(embeddings) = self.inner.config.embeddings(entity_type) {
            for (attribute, child_type) in embeddings {
                match raw.remove(attribute) {
                    Some(Value::Map(child)) => {
                        let child = self.wrap_entity(child_type, child, None);
                        embeds.push((attribute.clone(), Embedded::One(Box::new(child))));
                    }
                    Some(Value::Array(items)) => {
                        let children = items
                            .into_iter()
                            .filter_map(|item| match item {
                                Value::Map(child) => Some(self.wrap_entity(child_type, child, None)),
                                _ => None,
                            })
                            .collect();
                        embeds.push((attribute.clone(), Embedded::Many(children)));
                    }
                    // a bare reference stays a plain attribute
                    Some(other) => {
                        raw.insert(attribute.clone(), other);
                    }
                    None => {}
                }
            }
        }

        let has_id = raw.get(ID_KEY).is_some_and(|v| !v.is_null());
        let mut entity = Entity::from_raw(entity_type, raw);
        if let (false, Some(id)) = (has_id, fallback_id) {
            entity.set_id(id.clone());
        }
        for (name, embedded) in embeds {
            entity.set_embed(name, embedded);
        }
        entity.attach(self.handle());
        entity
    }

    fn strip_exclusions(&self, entity_type: &str, payload: &mut Attributes) {
        for key in self.inner.config.exclusions(entity_type) {
            payload.remove(key);
        }
    }

    pub(crate) fn write_key(&self) -> TaskKey {
        TaskKey::Write(self.next_generation())
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.inner.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    fn is_running(&self, key: &TaskKey) -> bool {
        self.inner.tasks.lock().contains_key(key)
    }

    /// Spawns `call` under `key`, then hands its output to `done`.
    ///
    /// The task removes its own entry before `done` runs, so `done` may
    /// unregister the key without aborting itself. A task already tracked
    /// under `key` is aborted and its `done` never runs. A task cancelled
    /// through [`Connector::cancel_task`] or [`Connector::clear`] fails
    /// `target` instead.
    pub(crate) fn spawn_tracked<T, V, F, D>(&self, key: TaskKey, target: &Channel<V>, call: F, done: D)
    where
        T: Send + 'static,
        V: Clone + Send + 'static,
        F: Future<Output = T> + Send + 'static,
        D: FnOnce(&Connector, T) + Send + 'static,
    {
        let generation = self.next_generation();
        let handle = self.handle();
        let task_key = key.clone();
        let task = async move {
            let outcome = call.await;
            if let Some(connector) = handle.upgrade() {
                if connector.forget_task(&task_key, generation) {
                    done(&connector, outcome);
                }
            }
        };

        let target = target.clone();
        // tasks stays locked until the entry exists, so the task cannot
        // forget itself before it was recorded
        let mut tasks = self.inner.tasks.lock();
        let join = self.inner.runtime.spawn(task);
        let entry = TaskEntry {
            generation,
            abort: join.abort_handle(),
            fail_target: Box::new(move |error| target.fail(error)),
        };
        if let Some(previous) = tasks.insert(key, entry) {
            previous.abort.abort();
        }
    }

    /// Removes the entry of the task `generation` under `key`. Returns false
    /// if the entry was replaced or cancelled in the meantime.
    fn forget_task(&self, key: &TaskKey, generation: u64) -> bool {
        let mut tasks = self.inner.tasks.lock();
        if tasks.get(key).is_some_and(|t| t.generation == generation) {
            tasks.remove(key);
            true
        } else {
            false
        }
    }

    pub(crate) fn cancel_task(&self, key: &TaskKey) {
        let task = self.inner.tasks.lock().remove(key);
        if let Some(task) = task {
            task.cancel();
            debug!(?key, "task cancelled");
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let adapters: Vec<String> = self.inner.adapters.read().keys().cloned().collect();
        let types: Vec<String> = self.inner.stores.lock().keys().cloned().collect();
        f.debug_struct("Connector")
            .field("adapters", &adapters)
            .field("types", &types)
            .field("running_tasks", &self.running_tasks())
            .finish()
    }
}
