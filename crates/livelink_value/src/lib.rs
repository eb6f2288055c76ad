//! # livelink value
//!
//! Tagged attribute values for livelink.
//!
//! This crate provides:
//! - [`Value`], the closed JSON-like variant every entity attribute uses
//! - [`Attributes`], a sorted string-keyed map of values
//! - Conversions to and from `serde_json::Value`
//! - A deterministic byte encoding and SHA-256 [`fingerprint`] used as a
//!   structural hash for collection filters
//!
//! ## Usage
//!
//! ```
//! use livelink_value::{attributes, fingerprint, Value};
//!
//! let a = attributes! { "status" => "open", "owner" => 7 };
//! let b = attributes! { "owner" => 7, "status" => "open" };
//!
//! assert_eq!(
//!     fingerprint(&Value::Map(a)).unwrap(),
//!     fingerprint(&Value::Map(b)).unwrap(),
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod error;
mod json;
mod value;

pub use canonical::{fingerprint, to_canonical_bytes, CanonicalEncoder};
pub use error::{ValueError, ValueResult};
pub use json::{attributes_from_json, attributes_to_json};
pub use value::{Attributes, RawRecord, Value};

/// Build an [`Attributes`] map from `key => value` pairs.
///
/// Values go through `Into<Value>`.
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::Attributes::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Attributes::new();
        $(
            map.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        map
    }};
}
