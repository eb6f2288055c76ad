//! Canonical byte encoding and fingerprints.
//!
//! The encoding is CBOR-shaped and deterministic:
//! - Map keys are sorted by their encoded form (length-first, then bytewise)
//! - Integers use the shortest possible encoding
//! - Floats are always 64-bit, with `-0.0` folded into `0.0`
//! - NaN is rejected
//!
//! Two values that compare equal always encode to the same bytes, so the
//! SHA-256 of the encoding can be used as a structural hash key.

use crate::error::{ValueError, ValueResult};
use crate::value::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Encode a value to canonical bytes.
///
/// # Errors
///
/// Returns [`ValueError::NaNForbidden`] if the value contains a NaN float.
pub fn to_canonical_bytes(value: &Value) -> ValueResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Compute the hex SHA-256 fingerprint of a value's canonical encoding.
///
/// # Errors
///
/// Returns [`ValueError::NaNForbidden`] if the value contains a NaN float.
pub fn fingerprint(value: &Value) -> ValueResult<String> {
    let bytes = to_canonical_bytes(value)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// A canonical encoder.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> ValueResult<()> {
        match value {
            Value::Null => {
                self.buffer.push(0xf6);
                Ok(())
            }
            Value::Bool(b) => {
                self.buffer.push(if *b { 0xf5 } else { 0xf4 });
                Ok(())
            }
            Value::Integer(n) => {
                self.encode_integer(*n);
                Ok(())
            }
            Value::Float(f) => self.encode_float(*f),
            Value::Text(s) => {
                self.encode_text(s);
                Ok(())
            }
            Value::Array(arr) => self.encode_array(arr),
            Value::Map(map) => self.encode_map(map),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // -1 encodes as 0, -2 as 1, and so on
            let abs_minus_one = (-(n + 1)) as u64;
            self.encode_unsigned(1, abs_minus_one);
        }
    }

    fn encode_float(&mut self, f: f64) -> ValueResult<()> {
        if f.is_nan() {
            return Err(ValueError::NaNForbidden);
        }
        let normalized = if f == 0.0 { 0.0 } else { f };
        self.buffer.push(0xfb);
        self.buffer.extend_from_slice(&normalized.to_bits().to_be_bytes());
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_array(&mut self, arr: &[Value]) -> ValueResult<()> {
        self.encode_unsigned(4, arr.len() as u64);
        for item in arr {
            self.encode(item)?;
        }
        Ok(())
    }

    fn encode_map(&mut self, map: &BTreeMap<String, Value>) -> ValueResult<()> {
        let mut encoded_pairs: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(map.len());

        for (key, value) in map {
            let mut key_encoder = CanonicalEncoder::new();
            key_encoder.encode_text(key);
            encoded_pairs.push((key_encoder.into_bytes(), value));
        }

        encoded_pairs.sort_by(|a, b| match a.0.len().cmp(&b.0.len()) {
            std::cmp::Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });

        self.encode_unsigned(5, map.len() as u64);
        for (encoded_key, value) in encoded_pairs {
            self.buffer.extend_from_slice(&encoded_key);
            self.encode(value)?;
        }

        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}
