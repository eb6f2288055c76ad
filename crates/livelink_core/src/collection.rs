//! Collection value object.

use crate::channel::Channel;
use crate::entity::{Entity, EntityId};
use crate::schema::Schema;
use livelink_value::RawRecord;

/// An ordered set of entities of one type.
///
/// Each entity is paired with its live channel. No two entities share an
/// id.
#[derive(Debug, Clone)]
pub struct Collection {
    entity_type: String,
    entities: Vec<Entity>,
    channels: Vec<Channel<Entity>>,
}

impl Collection {
    /// Creates an empty collection.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entities: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Builds a detached collection from raw records, in order.
    ///
    /// Each record goes through `schema` first, if one is given. Each entity
    /// gets its own channel holding it. Records repeating an earlier id are
    /// skipped.
    pub fn from_raw(
        entity_type: impl Into<String>,
        rows: Vec<RawRecord>,
        schema: Option<&dyn Schema>,
    ) -> Self {
        let entity_type = entity_type.into();
        let entities: Vec<Entity> = rows
            .into_iter()
            .map(|row| match schema {
                Some(schema) => schema.filter_model(row),
                None => row,
            })
            .map(|row| Entity::from_raw(entity_type.clone(), row))
            .collect();
        Self::from_entities(entity_type, entities, |entity| Channel::with_value(entity.clone()))
    }

    /// Builds a collection from `entities`, in order, asking `channel_for`
    /// for the channel of each one. Entities repeating an earlier id are
    /// skipped after `channel_for` saw them.
    pub(crate) fn from_entities<F>(entity_type: impl Into<String>, entities: Vec<Entity>, mut channel_for: F) -> Self
    where
        F: FnMut(&Entity) -> Channel<Entity>,
    {
        let mut collection = Self::new(entity_type);
        for entity in entities {
            let channel = channel_for(&entity);
            collection.register_entity(entity, channel);
        }
        collection
    }

    /// Returns the entity type.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Adds an entity and its channel, unless an entity with the same id
    /// is already present. Returns true if the entity was added.
    pub fn register_entity(&mut self, entity: Entity, channel: Channel<Entity>) -> bool {
        if self.contains(entity.id()) {
            return false;
        }
        self.entities.push(entity);
        self.channels.push(channel);
        true
    }

    /// Replaces the entity with the same id, keeping its position and
    /// channel. Returns true if the stored entity changed.
    pub fn replace_entity(&mut self, entity: Entity) -> bool {
        match self.position(entity.id()) {
            Some(index) if self.entities[index] != entity => {
                self.entities[index] = entity;
                true
            }
            _ => false,
        }
    }

    /// Removes the entity with `id` and its channel.
    pub fn delete_entity(&mut self, id: &EntityId) -> Option<Entity> {
        let index = self.position(id)?;
        self.channels.remove(index);
        Some(self.entities.remove(index))
    }

    fn position(&self, id: &EntityId) -> Option<usize> {
        self.entities.iter().position(|e| e.id() == id)
    }

    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the collection holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the entities in order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns the entity channels, parallel to [`Collection::entities`].
    pub fn channels(&self) -> &[Channel<Entity>] {
        &self.channels
    }

    /// Returns the entity with `id`.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id() == id)
    }

    /// Returns the live channel of the entity with `id`.
    pub fn channel(&self, id: &EntityId) -> Option<&Channel<Entity>> {
        self.position(id).map(|index| &self.channels[index])
    }

    /// Returns true if an entity with `id` is present.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.position(id).is_some()
    }

    /// Returns the ids in order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.iter().map(|e| e.id().clone()).collect()
    }

    /// Iterates over the entities.
    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.entities.iter()
    }

    /// Removes every entity.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.channels.clear();
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type && self.entities == other.entities
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_value::{attributes, Value};

    #[derive(Debug)]
    struct DropSecret;

    impl Schema for DropSecret {
        fn filter_model(&self, mut raw: RawRecord) -> RawRecord {
            raw.remove("secret");
            raw
        }

        fn generate_model(&self, _existing: Option<&RawRecord>, patch: RawRecord) -> RawRecord {
            patch
        }
    }

    fn note(id: i64, title: &str) -> Entity {
        Entity::new("notes", id, attributes! { "title" => title })
    }

    #[test]
    fn from_raw_keeps_order_and_filters_rows() {
        let rows = vec![
            attributes! { "id" => 2, "title" => "b", "secret" => "x" },
            attributes! { "id" => 1, "title" => "a" },
            attributes! { "id" => 2, "title" => "dup" },
        ];
        let collection = Collection::from_raw("notes", rows, Some(&DropSecret as &dyn Schema));

        assert_eq!(collection.ids(), vec![EntityId::Int(2), EntityId::Int(1)]);
        assert_eq!(collection.channels().len(), 2);
        let first = collection.get(&EntityId::Int(2)).unwrap();
        assert!(first.get("secret").is_none());
        assert_eq!(first.get("title"), Some(&Value::from("b")));
    }

    #[test]
    fn register_is_idempotent_by_id() {
        let mut collection = Collection::new("notes");
        assert!(collection.register_entity(note(1, "a"), Channel::new()));
        assert!(!collection.register_entity(note(1, "again"), Channel::new()));
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.entities()[0].get("title"), Some(&Value::from("a")));
    }

    #[test]
    fn delete_keeps_lists_parallel() {
        let mut collection = Collection::new("notes");
        let channels: Vec<Channel<Entity>> = (0..3).map(|_| Channel::new()).collect();
        for (i, channel) in channels.iter().enumerate() {
            collection.register_entity(note(i as i64, "t"), channel.clone());
        }

        let removed = collection.delete_entity(&EntityId::Int(1)).unwrap();
        assert_eq!(removed.id(), &EntityId::Int(1));
        assert_eq!(collection.ids(), vec![EntityId::Int(0), EntityId::Int(2)]);
        assert!(Channel::same(&collection.channels()[1], &channels[2]));
        assert!(collection.delete_entity(&EntityId::Int(9)).is_none());
    }

    #[test]
    fn replace_updates_in_place() {
        let mut collection = Collection::new("notes");
        collection.register_entity(note(1, "a"), Channel::new());
        collection.register_entity(note(2, "b"), Channel::new());

        assert!(collection.replace_entity(note(1, "changed")));
        assert!(!collection.replace_entity(note(1, "changed")));
        assert!(!collection.replace_entity(note(3, "absent")));
        assert_eq!(collection.ids(), vec![EntityId::Int(1), EntityId::Int(2)]);
        assert_eq!(
            collection.get(&EntityId::Int(1)).and_then(|e| e.get("title")),
            Some(&Value::from("changed"))
        );
    }

    #[test]
    fn clear_and_iterate() {
        let mut collection = Collection::from_raw(
            "notes",
            vec![attributes! { "id" => 1 }, attributes! { "id" => 2 }],
            None,
        );
        assert_eq!((&collection).into_iter().count(), 2);
        assert!(collection.contains(&EntityId::Int(2)));
        assert!(collection.channel(&EntityId::Int(2)).is_some());

        collection.clear();
        assert!(collection.is_empty());
        assert!(collection.channels().is_empty());
    }
}
