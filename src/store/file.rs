use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{key_records, SlotStore};
use crate::error::StoreError;
use crate::slot::{DateRange, Slot, SlotKey, SlotMap, StoredSlot};

/// Slot collection persisted as one JSON object (`storage id -> record`).
///
/// Meant for single-user local use: the lock only serializes writers inside
/// this process. Writes go to a sibling temp file that is renamed over the
/// original.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw records as stored. Records this build cannot read are kept here
    /// so a rewrite of the file carries them over untouched.
    async fn load(&self) -> Result<Documents, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Documents::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Documents::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, docs: &Documents) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(docs)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

type Documents = BTreeMap<String, serde_json::Value>;

/// Decodes the readable records, skipping the rest with a warning.
fn readable(docs: Documents) -> impl Iterator<Item = StoredSlot> {
    docs.into_iter()
        .filter_map(|(id, value)| match serde_json::from_value::<Slot>(value) {
            Ok(slot) => Some(StoredSlot { id, slot }),
            Err(e) => {
                warn!(%id, error = %e, "skipping unreadable record");
                None
            }
        })
}

#[async_trait]
impl SlotStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch_range(&self, range: &DateRange) -> Result<SlotMap, StoreError> {
        let _guard = self.lock.lock().await;
        let docs = self.load().await?;
        let map = key_records(readable(docs), range);
        debug!(path = %self.path.display(), count = map.len(), "file range fetch");
        Ok(map)
    }

    async fn write(&self, slot: &Slot) -> Result<StoredSlot, StoreError> {
        let _guard = self.lock.lock().await;
        let mut docs = self.load().await?;
        let id = slot.key().storage_id();
        docs.insert(id.clone(), serde_json::to_value(slot)?);
        self.save(&docs).await?;
        Ok(StoredSlot {
            id,
            slot: slot.clone(),
        })
    }

    async fn clear(&self, key: &SlotKey) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut docs = self.load().await?;
        if docs.remove(&key.storage_id()).is_some() {
            self.save(&docs).await?;
        }
        Ok(())
    }
}
