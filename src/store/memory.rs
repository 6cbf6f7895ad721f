use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{key_records, SlotStore};
use crate::error::StoreError;
use crate::slot::{DateRange, Slot, SlotKey, SlotMap, StoredSlot};

/// Slot collection held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw record at a storage id, bypassing any range query.
    pub fn record(&self, id: &str) -> Option<Slot> {
        self.docs.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl SlotStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_range(&self, range: &DateRange) -> Result<SlotMap, StoreError> {
        let docs = self.docs.lock().unwrap();
        let records = docs
            .iter()
            .filter(|(_, slot)| range.contains(slot.date))
            .map(|(id, slot)| StoredSlot {
                id: id.clone(),
                slot: slot.clone(),
            });
        let map = key_records(records, range);
        debug!(count = map.len(), "memory range fetch");
        Ok(map)
    }

    async fn write(&self, slot: &Slot) -> Result<StoredSlot, StoreError> {
        let id = slot.key().storage_id();
        self.docs.lock().unwrap().insert(id.clone(), slot.clone());
        Ok(StoredSlot {
            id,
            slot: slot.clone(),
        })
    }

    async fn clear(&self, key: &SlotKey) -> Result<(), StoreError> {
        self.docs.lock().unwrap().remove(&key.storage_id());
        Ok(())
    }
}
