//! Slot store gateway: the only place that knows how slot coordinates map
//! onto durable records.
//!
//! Every backend stores one document per booked coordinate, keyed by
//! [`SlotKey::storage_id`], with the four fields `date`, `period`,
//! `employee` and `value`. Range queries filter on `date` only; results are
//! keyed client-side from the record fields.

pub mod file;
pub mod firestore;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::{ConfigError, StoreError};
use crate::slot::{DateRange, Slot, SlotKey, SlotMap, StoredSlot};

pub use file::FileStore;
pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

/// Primitive operations against a slot collection.
///
/// Failures are returned uninterpreted; implementations do not retry.
#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// All slots whose `date` lies in the inclusive `range`.
    ///
    /// An inverted range yields an empty map, not an error.
    async fn fetch_range(&self, range: &DateRange) -> Result<SlotMap, StoreError>;

    /// Creates or fully overwrites the record at the slot's storage id.
    async fn write(&self, slot: &Slot) -> Result<StoredSlot, StoreError>;

    /// Deletes the record at `key`. Deleting an absent record succeeds.
    async fn clear(&self, key: &SlotKey) -> Result<(), StoreError>;
}

/// Keys fetched records by their own fields, dropping anything outside `range`.
pub(crate) fn key_records<I>(records: I, range: &DateRange) -> SlotMap
where
    I: IntoIterator<Item = StoredSlot>,
{
    let mut map = SlotMap::new();
    for record in records {
        if !range.contains(record.slot.date) {
            continue;
        }
        let key = record.slot.key();
        if let Some(previous) = map.insert(key, record) {
            warn!(
                id = %previous.id,
                "duplicate record for the same coordinate, keeping the later one"
            );
        }
    }
    map
}

/// Builds the backend selected in `config`.
pub fn open(config: &StoreConfig) -> Result<Arc<dyn SlotStore>, ConfigError> {
    let store: Arc<dyn SlotStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => {
            let path = config.path.clone().ok_or(ConfigError::MissingField {
                backend: "file",
                field: "path",
            })?;
            Arc::new(FileStore::new(path))
        }
        StoreBackend::Firestore => Arc::new(FirestoreStore::from_config(config)?),
    };
    Ok(store)
}
