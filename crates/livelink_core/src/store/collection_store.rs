//! Per-type live cache of filtered collections.
//!
//! Besides mapping filters to channels, the store keeps every loaded
//! collection and its filter so that an entity created, updated or deleted
//! elsewhere can be fanned out to each open view that should reflect it.

use crate::channel::Channel;
use crate::collection::Collection;
use crate::entity::{Entity, EntityId};
use crate::filter::{Filter, FilterHash};
use livelink_value::Attributes;
use std::collections::HashMap;
use tracing::debug;

/// Maps filter hashes to collections and their live channels.
///
/// The channel, collection and filter maps always share one key set.
/// Channels handed out before the first load completes are held apart
/// until the collection is registered.
#[derive(Debug, Default)]
pub struct CollectionStore {
    channels: HashMap<FilterHash, Channel<Collection>>,
    collections: HashMap<FilterHash, Collection>,
    filters: HashMap<FilterHash, Filter>,
    pending: HashMap<FilterHash, Channel<Collection>>,
}

impl CollectionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel for `filter`, creating an empty one if needed.
    pub fn get_channel(&mut self, filter: &Filter) -> Channel<Collection> {
        let hash = filter.hash();
        if let Some(channel) = self.channels.get(hash) {
            return channel.clone();
        }
        self.pending.entry(hash.clone()).or_default().clone()
    }

    /// Returns the channel for `filter` without creating one.
    pub fn existing(&self, filter: &Filter) -> Option<Channel<Collection>> {
        let hash = filter.hash();
        self.channels
            .get(hash)
            .or_else(|| self.pending.get(hash))
            .cloned()
    }

    /// Returns the stored collection for `filter`.
    pub fn collection(&self, filter: &Filter) -> Option<&Collection> {
        self.collections.get(filter.hash())
    }

    /// Stores `collection` under `filter` and pushes it onto its channel.
    pub fn register_collection(&mut self, collection: Collection, filter: Filter) -> Channel<Collection> {
        let hash = filter.hash().clone();
        let channel = match self.channels.get(&hash) {
            Some(channel) => channel.clone(),
            None => self.pending.remove(&hash).unwrap_or_default(),
        };
        channel.push(collection.clone());
        self.channels.insert(hash.clone(), channel.clone());
        self.collections.insert(hash.clone(), collection);
        self.filters.insert(hash, filter);
        channel
    }

    /// Adds `entity` to every stored collection whose filter it matches.
    ///
    /// A collection that already holds the id gets the new version in
    /// place. When `push_update` is set each changed collection is pushed
    /// again. Returns the hashes of the changed collections.
    pub fn register_entity_in_collections(
        &mut self,
        entity: &Entity,
        channel: &Channel<Entity>,
        push_update: bool,
    ) -> Vec<FilterHash> {
        let mut touched = Vec::new();
        for (hash, filter) in &self.filters {
            if !filter.matches(entity) {
                continue;
            }
            let Some(collection) = self.collections.get_mut(hash) else {
                continue;
            };
            let changed = collection.register_entity(entity.clone(), channel.clone())
                || collection.replace_entity(entity.clone());
            if !changed {
                continue;
            }
            debug!(entity_type = entity.entity_type(), id = %entity.id(), filter = %hash, "entity fanned out to collection");
            if push_update {
                if let Some(channel) = self.channels.get(hash) {
                    channel.push(collection.clone());
                }
            }
            touched.push(hash.clone());
        }
        touched
    }

    /// Removes `entity` from every stored collection that matches it or
    /// holds its id, pushing each collection it was removed from.
    pub fn delete_entity_from_collection(&mut self, entity: &Entity) -> Vec<FilterHash> {
        let mut touched = Vec::new();
        for (hash, collection) in &mut self.collections {
            let candidate = collection.contains(entity.id())
                || self.filters.get(hash).is_some_and(|f| f.matches(entity));
            if !candidate || collection.delete_entity(entity.id()).is_none() {
                continue;
            }
            if let Some(channel) = self.channels.get(hash) {
                channel.push(collection.clone());
            }
            touched.push(hash.clone());
        }
        touched
    }

    /// Pushes again every stored collection whose filter equals `filter`.
    pub fn refresh_collections(&self, filter: &Filter) {
        let hashes: Vec<FilterHash> = self
            .filters
            .iter()
            .filter(|(_, stored)| stored.same_as(filter))
            .map(|(hash, _)| hash.clone())
            .collect();
        self.refresh_hashes(&hashes);
    }

    /// Pushes again the stored collections under `hashes`.
    pub fn refresh_hashes<'a>(&self, hashes: impl IntoIterator<Item = &'a FilterHash>) {
        for hash in hashes {
            if let (Some(channel), Some(collection)) =
                (self.channels.get(hash), self.collections.get(hash))
            {
                channel.push(collection.clone());
            }
        }
    }

    /// Returns the filters whose constraints the raw record satisfies.
    pub fn matching_filters(&self, attributes: &Attributes, id: Option<&EntityId>) -> Vec<Filter> {
        self.filters
            .values()
            .filter(|filter| filter.matches_attributes(attributes, id))
            .cloned()
            .collect()
    }

    /// Returns every stored filter.
    pub fn filters(&self) -> Vec<Filter> {
        self.filters.values().cloned().collect()
    }

    /// Drops the channel, collection and filter for `filter`.
    pub fn unregister(&mut self, filter: &Filter) -> Option<Channel<Collection>> {
        let hash = filter.hash();
        self.collections.remove(hash);
        self.filters.remove(hash);
        let pending = self.pending.remove(hash);
        self.channels.remove(hash).or(pending)
    }

    /// Returns true if a channel exists for `filter`.
    pub fn is_in_store(&self, filter: &Filter) -> bool {
        let hash = filter.hash();
        self.channels.contains_key(hash) || self.pending.contains_key(hash)
    }

    /// Empties the stored collection for `filter` and pushes it.
    pub fn clear_entities(&mut self, filter: &Filter) {
        let hash = filter.hash();
        if let Some(collection) = self.collections.get_mut(hash) {
            collection.clear();
            if let Some(channel) = self.channels.get(hash) {
                channel.push(collection.clone());
            }
        }
    }

    /// Drops every collection.
    pub fn clear(&mut self) {
        self.channels.clear();
        self.collections.clear();
        self.filters.clear();
        self.pending.clear();
    }

    /// Returns the number of loaded collections.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// Returns true if no collection is loaded.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
