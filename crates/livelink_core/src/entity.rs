//! Entity value object.

use crate::connector::{Connector, ConnectorHandle};
use crate::error::{ConnectorError, ConnectorResult};
use futures::future::{try_join_all, BoxFuture};
use livelink_value::{Attributes, RawRecord, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Attribute under which raw records carry their id.
pub const ID_KEY: &str = "id";

static NEXT_TEMPORARY: AtomicU64 = AtomicU64::new(1);

/// Identifier of an entity within its type.
///
/// Integer ids and numeric strings both map to [`EntityId::Int`], so `12`
/// and `"12"` address the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    /// Numeric id assigned by a backend.
    Int(i64),
    /// Textual id assigned by a backend.
    Text(String),
    /// Client-side id of an entity no backend has confirmed yet.
    Temporary(u64),
}

impl EntityId {
    /// Allocates a new temporary id, unique within the process.
    pub fn temporary() -> Self {
        EntityId::Temporary(NEXT_TEMPORARY.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns true for a temporary id.
    pub fn is_temporary(&self) -> bool {
        matches!(self, EntityId::Temporary(_))
    }

    /// Reads an id from a raw attribute value.
    ///
    /// Returns `None` for null and for shapes that cannot be ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => Some(EntityId::Int(*n)),
            Value::Text(s) => Some(EntityId::from(s.as_str())),
            _ => None,
        }
    }

    /// Converts the id back into an attribute value.
    ///
    /// Temporary ids have no backend form and become null.
    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Int(n) => Value::Integer(*n),
            EntityId::Text(s) => Value::Text(s.clone()),
            EntityId::Temporary(_) => Value::Null,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(n) => write!(f, "{n}"),
            EntityId::Text(s) => f.write_str(s),
            EntityId::Temporary(n) => write!(f, "temporary-{n}"),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId::Int(n)
    }
}

impl From<i32> for EntityId {
    fn from(n: i32) -> Self {
        EntityId::Int(i64::from(n))
    }
}

/// Parses `s` as an integer id only if it is the canonical decimal form,
/// so ids like `"007"` or `"+5"` keep their text.
fn canonical_int(s: &str) -> Option<i64> {
    s.parse::<i64>().ok().filter(|n| n.to_string() == s)
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        match canonical_int(s) {
            Some(n) => EntityId::Int(n),
            None => EntityId::Text(s.to_string()),
        }
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        match canonical_int(&s) {
            Some(n) => EntityId::Int(n),
            None => EntityId::Text(s),
        }
    }
}

impl From<&EntityId> for EntityId {
    fn from(id: &EntityId) -> Self {
        id.clone()
    }
}

/// Child entities held under one embedded attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Embedded {
    /// A nested map.
    One(Box<Entity>),
    /// An array of nested maps.
    Many(Vec<Entity>),
}

impl Embedded {
    /// Returns the single child, if this is [`Embedded::One`].
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            Embedded::One(entity) => Some(entity),
            Embedded::Many(_) => None,
        }
    }

    /// Returns the children, if this is [`Embedded::Many`].
    pub fn as_many(&self) -> Option<&[Entity]> {
        match self {
            Embedded::One(_) => None,
            Embedded::Many(entities) => Some(entities),
        }
    }

    /// Iterates over every child.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        let slice: &[Entity] = match self {
            Embedded::One(entity) => std::slice::from_ref(&**entity),
            Embedded::Many(entities) => entities,
        };
        slice.iter()
    }

    /// Iterates mutably over every child.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        let slice: &mut [Entity] = match self {
            Embedded::One(entity) => std::slice::from_mut(&mut **entity),
            Embedded::Many(entities) => entities,
        };
        slice.iter_mut()
    }
}

/// A record of one entity type.
///
/// An entity tracks a reference snapshot of its attributes, taken when it
/// was built and after every successful save, so it can report what changed.
/// Entities produced by a [`Connector`] stay attached to it and can save or
/// remove themselves.
#[derive(Clone)]
pub struct Entity {
    entity_type: String,
    id: EntityId,
    attributes: Attributes,
    reference: Attributes,
    embeds: BTreeMap<String, Embedded>,
    connector: Option<ConnectorHandle>,
}

impl Entity {
    /// Creates a detached entity.
    pub fn new(entity_type: impl Into<String>, id: impl Into<EntityId>, attributes: Attributes) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            reference: attributes.clone(),
            attributes,
            embeds: BTreeMap::new(),
            connector: None,
        }
    }

    /// Creates a detached entity from a raw record.
    ///
    /// The id is taken from the `"id"` attribute and removed from the
    /// attributes. A record without a usable id gets a temporary id.
    pub fn from_raw(entity_type: impl Into<String>, mut raw: RawRecord) -> Self {
        let id = raw
            .remove(ID_KEY)
            .and_then(|v| EntityId::from_value(&v))
            .unwrap_or_else(EntityId::temporary);
        Self::new(entity_type, id, raw)
    }

    /// Returns the entity type.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the entity id.
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    /// Returns true if no backend has confirmed this entity yet.
    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }

    /// Returns all attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Returns one attribute.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Sets one attribute. Nothing is persisted until [`Entity::save`].
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Removes one attribute and returns its value.
    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// Returns a copy of all attributes, used for full-record saves.
    pub fn clone_attributes(&self) -> Attributes {
        self.attributes.clone()
    }

    /// Returns the attributes whose value changed since the last snapshot.
    ///
    /// Only keys present in both the current attributes and the snapshot
    /// are compared. Keys added after the snapshot are not reported.
    pub fn diff(&self) -> Attributes {
        self.attributes
            .iter()
            .filter(|(key, value)| {
                self.reference
                    .get(key.as_str())
                    .is_some_and(|previous| previous != *value)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Returns true if [`Entity::diff`] is not empty.
    pub fn is_dirty(&self) -> bool {
        self.attributes
            .iter()
            .any(|(key, value)| self.reference.get(key).is_some_and(|previous| previous != value))
    }

    /// Re-captures the reference snapshot.
    pub fn snapshot(&mut self) {
        self.reference = self.attributes.clone();
    }

    /// Returns the children embedded under `name`.
    pub fn embed(&self, name: &str) -> Option<&Embedded> {
        self.embeds.get(name)
    }

    /// Returns the children embedded under `name`, mutably.
    pub fn embed_mut(&mut self, name: &str) -> Option<&mut Embedded> {
        self.embeds.get_mut(name)
    }

    /// Returns every embedded attribute.
    pub fn embeds(&self) -> &BTreeMap<String, Embedded> {
        &self.embeds
    }

    /// Embeds children under `name`, replacing the attribute of that name.
    pub fn set_embed(&mut self, name: impl Into<String>, embedded: Embedded) {
        let name = name.into();
        self.attributes.remove(&name);
        self.reference.remove(&name);
        self.embeds.insert(name, embedded);
    }

    /// Returns true if the entity is attached to a live connector.
    pub fn is_attached(&self) -> bool {
        self.connector
            .as_ref()
            .is_some_and(|handle| handle.upgrade().is_some())
    }

    pub(crate) fn attach(&mut self, handle: ConnectorHandle) {
        for embedded in self.embeds.values_mut() {
            for child in embedded.iter_mut() {
                child.attach(handle.clone());
            }
        }
        self.connector = Some(handle);
    }

    pub(crate) fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn connector(&self) -> ConnectorResult<Connector> {
        self.connector
            .as_ref()
            .and_then(ConnectorHandle::upgrade)
            .ok_or(ConnectorError::Detached)
    }

    /// Persists the entity through its connector.
    ///
    /// Dirty or temporary embedded children are saved first, concurrently.
    /// A temporary entity is created rather than updated and adopts the id
    /// the backend assigns. On success the reference snapshot is refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Detached`] if the entity has no connector,
    /// or the adapter error that ended the save.
    pub fn save(&mut self) -> BoxFuture<'_, ConnectorResult<Entity>> {
        Box::pin(async move {
            let connector = self.connector()?;

            let children = self
                .embeds
                .values_mut()
                .flat_map(Embedded::iter_mut)
                .filter(|child| child.is_dirty() || child.is_temporary())
                .map(Entity::save);
            try_join_all(children).await?;

            let saved = if self.is_temporary() {
                connector.remove_temporary(self);
                connector
                    .create_entity(&self.entity_type, self.clone_attributes())?
                    .first()
                    .await?
            } else {
                connector.save_entity(self)?.first().await?
            };

            if self.is_temporary() {
                self.id = saved.id.clone();
            }
            self.snapshot();
            Ok(saved)
        })
    }

    /// Deletes the entity through its connector.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Detached`] if the entity has no connector,
    /// or the adapter error that ended the delete.
    pub async fn remove(&self) -> ConnectorResult<bool> {
        let connector = self.connector()?;
        connector.delete_entity(self)?.first().await
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type
            && self.id == other.id
            && self.attributes == other.attributes
            && self.embeds == other.embeds
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("entity_type", &self.entity_type)
            .field("id", &self.id)
            .field("attributes", &self.attributes)
            .field("embeds", &self.embeds)
            .field("attached", &self.connector.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_value::attributes;

    #[test]
    fn id_parsing() {
        assert_eq!(EntityId::from("12"), EntityId::Int(12));
        assert_eq!(EntityId::from("abc"), EntityId::Text("abc".into()));
        assert_eq!(EntityId::from_value(&Value::from(3)), Some(EntityId::Int(3)));
        assert_eq!(EntityId::from_value(&Value::Null), None);
        assert_eq!(EntityId::Int(4).to_value(), Value::Integer(4));
    }

    #[test]
    fn padded_or_signed_text_ids_stay_text() {
        assert_eq!(EntityId::from("007"), EntityId::Text("007".into()));
        assert_eq!(EntityId::from("+5"), EntityId::Text("+5".into()));
        assert_eq!(EntityId::from("-3"), EntityId::Int(-3));
        assert_eq!(EntityId::from(String::from("0")), EntityId::Int(0));

        let id = EntityId::from_value(&Value::from("007")).unwrap();
        assert_eq!(id.to_value(), Value::from("007"));
        assert_eq!(id.to_string(), "007");
    }

    #[test]
    fn temporary_ids_never_collide() {
        let a = EntityId::temporary();
        let b = EntityId::temporary();
        assert!(a.is_temporary());
        assert_ne!(a, b);
        assert!(a.to_value().is_null());
    }

    #[test]
    fn from_raw_strips_id() {
        let entity = Entity::from_raw("notes", attributes! { "id" => "5", "title" => "a" });
        assert_eq!(entity.id(), &EntityId::Int(5));
        assert!(entity.get("id").is_none());
        assert_eq!(entity.get("title"), Some(&Value::from("a")));

        let unsaved = Entity::from_raw("notes", attributes! { "title" => "b" });
        assert!(unsaved.is_temporary());
    }

    #[test]
    fn diff_reports_changed_keys_only() {
        let mut entity = Entity::new("notes", 1, attributes! { "title" => "a", "body" => "x" });
        assert!(entity.diff().is_empty());
        assert!(!entity.is_dirty());

        entity.set("title", "b");
        entity.set("tag", "new");
        assert_eq!(entity.diff(), attributes! { "title" => "b" });
        assert!(entity.is_dirty());

        entity.snapshot();
        assert!(entity.diff().is_empty());
    }

    #[test]
    fn removed_keys_are_not_in_diff() {
        let mut entity = Entity::new("notes", 1, attributes! { "title" => "a" });
        entity.remove_attribute("title");
        assert!(entity.diff().is_empty());
    }

    #[test]
    fn clone_round_trip() {
        let entity = Entity::new("notes", 1, attributes! { "title" => "a", "n" => 2 });
        let rebuilt = Entity::new("notes", 1, entity.clone_attributes());
        assert_eq!(rebuilt.attributes(), entity.attributes());
        assert_eq!(rebuilt, entity);
    }

    #[test]
    fn embeds_replace_attributes() {
        let mut parent = Entity::new("notes", 1, attributes! { "author" => 3, "title" => "a" });
        let author = Entity::new("users", 3, attributes! { "name" => "ann" });
        parent.set_embed("author", Embedded::One(Box::new(author.clone())));

        assert!(parent.get("author").is_none());
        assert_eq!(parent.embed("author").and_then(Embedded::as_one), Some(&author));
        assert_eq!(parent.embeds().len(), 1);

        if let Some(embedded) = parent.embed_mut("author") {
            for child in embedded.iter_mut() {
                child.set("name", "bea");
            }
        }
        let child = parent.embed("author").and_then(Embedded::as_one).unwrap();
        assert!(child.is_dirty());
    }

    #[tokio::test]
    async fn detached_save_fails() {
        let mut entity = Entity::new("notes", 1, attributes! {});
        assert!(!entity.is_attached());
        assert!(matches!(entity.save().await, Err(ConnectorError::Detached)));
        assert!(matches!(entity.remove().await, Err(ConnectorError::Detached)));
    }
}
