//! Collection filters and their structural hashes.

use crate::entity::{Entity, EntityId, ID_KEY};
use livelink_value::{fingerprint, Attributes, Value, ValueResult};
use std::fmt;

/// Structural hash of a filter.
///
/// Equal filters always have equal hashes, whatever order their keys were
/// inserted in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FilterHash(String);

impl FilterHash {
    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A conjunction of equality constraints over entity attributes.
#[derive(Debug, Clone)]
pub struct Filter {
    constraints: Attributes,
    hash: FilterHash,
}

impl Filter {
    /// Creates a filter from its constraints.
    ///
    /// # Errors
    ///
    /// Returns [`livelink_value::ValueError::NaNForbidden`] if a constraint
    /// contains a NaN float, which has no structural hash.
    pub fn new(constraints: Attributes) -> ValueResult<Self> {
        let hash = FilterHash(fingerprint(&Value::Map(constraints.clone()))?);
        Ok(Self { constraints, hash })
    }

    /// Creates the filter with no constraints.
    pub fn all() -> Self {
        let constraints = Attributes::new();
        // the empty map always encodes
        let hash = FilterHash(fingerprint(&Value::Map(Attributes::new())).unwrap_or_default());
        Self { constraints, hash }
    }

    /// Returns the structural hash.
    pub fn hash(&self) -> &FilterHash {
        &self.hash
    }

    /// Returns the constraints.
    pub fn constraints(&self) -> &Attributes {
        &self.constraints
    }

    /// Returns the constraint on one key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.constraints.get(key)
    }

    /// Returns true if the filter has no constraints.
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Returns true if `entity` may belong to a collection with this filter.
    ///
    /// An attribute the entity does not have never excludes it. A
    /// constraint on `"id"` is checked against the entity id unless the id
    /// is temporary.
    pub fn matches(&self, entity: &Entity) -> bool {
        self.matches_attributes(entity.attributes(), Some(entity.id()))
    }

    /// Same as [`Filter::matches`] for a raw record and an optional id.
    pub fn matches_attributes(&self, attributes: &Attributes, id: Option<&EntityId>) -> bool {
        self.constraints.iter().all(|(key, expected)| {
            if key == ID_KEY {
                if let Some(id) = id.filter(|id| !id.is_temporary()) {
                    return EntityId::from_value(expected).as_ref() == Some(id);
                }
            }
            attributes
                .get(key)
                .map_or(true, |actual| values_match(actual, expected))
        })
    }

    /// Returns true if both filters hold the same constraints.
    pub fn same_as(&self, other: &Filter) -> bool {
        self == other
    }
}

/// Numbers compare by value, so `1` matches `1.0`.
fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual.as_float(), expected.as_float()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::all()
    }
}

impl PartialEq for Filter {
    fn eq(&self, other: &Self) -> bool {
        self.constraints == other.constraints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livelink_value::attributes;
    use proptest::prelude::*;

    fn filter(constraints: Attributes) -> Filter {
        Filter::new(constraints).unwrap()
    }

    #[test]
    fn key_order_does_not_change_hash() {
        let mut a = Attributes::new();
        a.insert("a".into(), Value::from(1));
        a.insert("b".into(), Value::from(2));
        let mut b = Attributes::new();
        b.insert("b".into(), Value::from(2));
        b.insert("a".into(), Value::from(1));

        assert_eq!(filter(a).hash(), filter(b).hash());
    }

    #[test]
    fn different_values_hash_differently() {
        let a = filter(attributes! { "status" => "open" });
        let b = filter(attributes! { "status" => "closed" });
        assert_ne!(a.hash(), b.hash());
        assert!(!a.same_as(&b));
    }

    #[test]
    fn nan_constraint_is_rejected() {
        assert!(Filter::new(attributes! { "score" => f64::NAN }).is_err());
    }

    #[test]
    fn empty_filter_matches_everything() {
        let all = Filter::all();
        assert!(all.is_empty());
        assert_eq!(all.hash(), Filter::new(Attributes::new()).unwrap().hash());
        let entity = Entity::new("notes", 1, attributes! { "status" => "open" });
        assert!(all.matches(&entity));
    }

    #[test]
    fn unset_attributes_never_exclude() {
        let f = filter(attributes! { "status" => "open", "owner" => 7 });

        let open = Entity::new("notes", 1, attributes! { "status" => "open", "owner" => 7 });
        let no_owner = Entity::new("notes", 2, attributes! { "status" => "open" });
        let closed = Entity::new("notes", 3, attributes! { "status" => "closed", "owner" => 7 });

        assert!(f.matches(&open));
        assert!(f.matches(&no_owner));
        assert!(!f.matches(&closed));
    }

    #[test]
    fn numbers_match_across_integer_and_float() {
        let f = filter(attributes! { "owner" => 1 });
        assert!(f.matches(&Entity::new("notes", 1, attributes! { "owner" => 1.0 })));
        assert!(!f.matches(&Entity::new("notes", 2, attributes! { "owner" => 1.5 })));
        assert!(!f.matches(&Entity::new("notes", 3, attributes! { "owner" => "1" })));
    }

    #[test]
    fn id_constraint_checks_entity_id() {
        let f = filter(attributes! { "id" => 2 });
        assert!(f.matches(&Entity::new("notes", 2, Attributes::new())));
        assert!(!f.matches(&Entity::new("notes", 3, Attributes::new())));
        assert!(f.matches(&Entity::new("notes", EntityId::temporary(), Attributes::new())));
    }

    proptest! {
        #[test]
        fn equal_filters_share_hash(entries in prop::collection::vec(("[a-d]", 0i64..4), 0..6)) {
            let mut forward = Attributes::new();
            for (k, v) in &entries {
                forward.insert(k.clone(), Value::from(*v));
            }
            let mut backward = Attributes::new();
            for (k, v) in forward.iter().rev() {
                backward.insert(k.clone(), v.clone());
            }
            let a = filter(forward);
            let b = filter(backward);
            prop_assert!(a.same_as(&b));
            prop_assert_eq!(a.hash(), b.hash());
        }
    }
}
