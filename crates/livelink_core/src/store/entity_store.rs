//! Per-type live cache of single entities.

use crate::channel::Channel;
use crate::entity::{Entity, EntityId};
use std::collections::HashMap;

/// Maps entity ids to their live channels.
///
/// There is at most one channel per id. Temporary ids never enter the map,
/// so a temporary entity can never shadow a confirmed one.
#[derive(Debug, Default)]
pub struct EntityStore {
    channels: HashMap<EntityId, Channel<Entity>>,
}

impl EntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel for `id`, creating an empty one if needed.
    pub fn get_channel(&mut self, id: &EntityId) -> Channel<Entity> {
        if id.is_temporary() {
            return Channel::new();
        }
        self.channels.entry(id.clone()).or_default().clone()
    }

    /// Returns the channel for `id` without creating one.
    pub fn existing(&self, id: &EntityId) -> Option<Channel<Entity>> {
        self.channels.get(id).cloned()
    }

    /// Pushes `entity` onto the channel for `id` and returns that channel.
    pub fn register_entity(&mut self, entity: Entity, id: &EntityId) -> Channel<Entity> {
        let channel = self.get_channel(id);
        channel.push(entity);
        channel
    }

    /// Adopts `channel` as the live channel for `id`.
    ///
    /// If a channel already exists for `id` it is kept and returned instead.
    pub fn register_channel(&mut self, id: &EntityId, channel: Channel<Entity>) -> Channel<Entity> {
        if id.is_temporary() {
            return channel;
        }
        self.channels.entry(id.clone()).or_insert(channel).clone()
    }

    /// Drops the channel for `id`.
    pub fn unregister(&mut self, id: &EntityId) -> Option<Channel<Entity>> {
        self.channels.remove(id)
    }

    /// Returns true if a channel exists for `id`.
    pub fn is_in_store(&self, id: &EntityId) -> bool {
        self.channels.contains_key(id)
    }

    /// Returns the ids with a live channel.
    pub fn ids(&self) -> Vec<EntityId> {
        self.channels.keys().cloned().collect()
    }

    /// Drops every channel.
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Returns the number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if the store holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
