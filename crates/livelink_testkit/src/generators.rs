//! Property-based test generators using proptest.
//!
//! Values never contain NaN, so every generated map is a valid filter.

use livelink_value::{Attributes, Value};
use proptest::prelude::*;

/// Strategy for attribute keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9..1.0e9f64).prop_map(Value::Float),
        "[ -~]{0,16}".prop_map(Value::Text),
    ]
}

/// Strategy for nested values.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(key_strategy(), inner, 0..4).prop_map(Value::Map),
        ]
    })
}

/// Strategy for attribute maps without an `id` key.
pub fn attributes_strategy() -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map(key_strategy(), value_strategy(), 0..8)
        .prop_map(|mut attrs| {
            attrs.remove("id");
            attrs
        })
}

/// Strategy for scalar-only attribute maps, the usual shape of a filter.
pub fn constraints_strategy() -> impl Strategy<Value = Attributes> {
    prop::collection::btree_map(key_strategy(), scalar_strategy(), 0..5)
        .prop_map(|mut attrs| {
            attrs.remove("id");
            attrs
        })
}
