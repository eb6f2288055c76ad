//! Schema contract.

use livelink_value::RawRecord;

/// Shapes raw records against a declared structure.
///
/// The connector runs every record an adapter returns through
/// [`Schema::filter_model`] before wrapping it, and every new record through
/// [`Schema::generate_model`] before creating it.
pub trait Schema: Send + Sync {
    /// Drops or coerces fields that are not part of the structure.
    fn filter_model(&self, raw: RawRecord) -> RawRecord;

    /// Builds a complete record from `patch`, filling defaults.
    ///
    /// `existing` is the current record when one is known.
    fn generate_model(&self, existing: Option<&RawRecord>, patch: RawRecord) -> RawRecord;
}
