//! Live stores.
//!
//! One [`EntityStore`] and one [`CollectionStore`] exist per entity type.
//! Both map a logical query key to the single channel serving it.

mod collection_store;
mod entity_store;

pub use collection_store::CollectionStore;
pub use entity_store::EntityStore;
