//! Slot cache and mutation coordinator.
//!
//! A [`SlotCoordinator`] backs one schedule view. It owns the snapshot of the
//! active date window, serves reads from it, and implements the three
//! mutation verbs on top of the [`SlotStore`] primitives:
//!
//! | Verb   | Store calls                         | Guard                         |
//! |--------|-------------------------------------|-------------------------------|
//! | `set`  | `write` (value) or `clear` (blank)  | blank on an Empty slot: no-op |
//! | `copy` | `write` target                      | Empty source or self: no-op   |
//! | `move` | `write` target, then `clear` source | Empty source or self: no-op   |
//!
//! Each applied verb ends with one snapshot refresh. No lock is held across
//! store calls, so verbs issued back-to-back interleave freely and the last
//! write to a coordinate wins.
//!
//! A coordinate is only known to be Empty once a fetch covering it has been
//! installed. Until then a blank `set` issues its `clear` anyway, and `copy`
//! or `move` from that coordinate fails with [`SlotError::NotLoaded`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SlotError};
use crate::slot::{Booking, DateRange, Slot, SlotKey, SlotMap, StoredSlot};
use crate::store::SlotStore;

/// Guidance shown alongside an edit prompt.
pub const EDIT_HINT: &str = "Enter booking details (e.g. name + address). \
Leave blank to clear.\n\nExample:\nSmith Kitchen\n12 High Street, Winchester";

/// How the snapshot is brought up to date after a mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Re-fetch the whole active range.
    #[default]
    Refetch,
    /// Apply the known delta locally without a fetch.
    Merge,
}

/// Whether a verb touched the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Applied,
    #[serde(rename = "noop")]
    NoOp,
}

/// A pending edit of one coordinate, carrying the value it started from.
///
/// Nothing is written unless [`SlotCoordinator::confirm_edit`] is called;
/// dropping the intent cancels it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditIntent {
    pub key: SlotKey,
    pub existing: Option<String>,
}

enum Delta {
    Written(StoredSlot),
    Cleared(SlotKey),
}

/// What the snapshot can say about one coordinate.
enum Known {
    Booked(Booking),
    Empty,
    /// No installed fetch covers the coordinate.
    Unknown,
}

#[derive(Debug, Default)]
struct Snapshot {
    range: Option<DateRange>,
    slots: SlotMap,
    /// Sequence number of the fetch currently installed.
    installed: u64,
    /// A fetch of the active range has been installed.
    loaded: bool,
    last_error: Option<String>,
}

pub struct SlotCoordinator {
    store: Arc<dyn SlotStore>,
    policy: RefreshPolicy,
    state: Mutex<Snapshot>,
    fetch_seq: AtomicU64,
}

impl SlotCoordinator {
    pub fn new(store: Arc<dyn SlotStore>, policy: RefreshPolicy) -> Self {
        Self {
            store,
            policy,
            state: Mutex::new(Snapshot::default()),
            fetch_seq: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    // ========== Window ==========

    /// Makes `range` the active window and loads it.
    ///
    /// The previous snapshot is dropped immediately; reads return absent
    /// until the fetch completes.
    #[instrument(skip(self), fields(start = %range.start, end = %range.end))]
    pub async fn request_range(&self, range: DateRange) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.range = Some(range);
            state.slots.clear();
            state.loaded = false;
        }
        self.fetch(range).await
    }

    /// Re-fetches the active window. Does nothing before a range is requested.
    pub async fn refresh(&self) -> Result<()> {
        let range = self.state.lock().unwrap().range;
        match range {
            Some(range) => self.fetch(range).await,
            None => Ok(()),
        }
    }

    /// Alias of [`refresh`](Self::refresh) for focus/visibility triggers.
    pub async fn revalidate(&self) -> Result<()> {
        self.refresh().await
    }

    async fn fetch(&self, range: DateRange) -> Result<()> {
        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.store.fetch_range(&range).await;

        let mut state = self.state.lock().unwrap();
        let current = state.range == Some(range);
        match result {
            Ok(slots) => {
                if current && seq > state.installed {
                    debug!(seq, count = slots.len(), "snapshot installed");
                    state.slots = slots;
                    state.installed = seq;
                    state.loaded = true;
                    state.last_error = None;
                } else {
                    debug!(seq, "discarding stale fetch");
                }
                Ok(())
            }
            Err(source) => {
                let err = SlotError::Fetch(source);
                warn!(error = %err, store = self.store.name(), "range fetch failed");
                if current {
                    state.last_error = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    // ========== Reads ==========

    pub fn range(&self) -> Option<DateRange> {
        self.state.lock().unwrap().range
    }

    /// Booking text at `key`, or `None` when the slot is Empty.
    pub fn get(&self, key: &SlotKey) -> Option<String> {
        self.booking(key).map(String::from)
    }

    pub fn is_booked(&self, key: &SlotKey) -> bool {
        self.state.lock().unwrap().slots.contains_key(key)
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> SlotMap {
        self.state.lock().unwrap().slots.clone()
    }

    /// Message of the last failed fetch or mutation, until the next good fetch.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().unwrap().last_error.clone()
    }

    fn booking(&self, key: &SlotKey) -> Option<Booking> {
        self.state
            .lock()
            .unwrap()
            .slots
            .get(key)
            .map(|stored| stored.slot.value.clone())
    }

    fn lookup(&self, key: &SlotKey) -> Known {
        let state = self.state.lock().unwrap();
        if let Some(stored) = state.slots.get(key) {
            return Known::Booked(stored.slot.value.clone());
        }
        if state.loaded && state.range.is_some_and(|r| r.contains(key.date)) {
            Known::Empty
        } else {
            Known::Unknown
        }
    }

    /// Booking at a copy or move source; `None` when the source is known Empty.
    fn source_booking(&self, source: &SlotKey) -> Result<Option<Booking>> {
        match self.lookup(source) {
            Known::Booked(value) => Ok(Some(value)),
            Known::Empty => Ok(None),
            Known::Unknown => Err(SlotError::NotLoaded(source.storage_id())),
        }
    }

    // ========== Mutations ==========

    /// Books `key` with the trimmed `raw` text, or clears it when blank.
    ///
    /// Once the store call succeeds the verb is `Applied`; a failed refresh
    /// afterwards is only left in [`last_error`](Self::last_error).
    #[instrument(skip_all, fields(key = %key))]
    pub async fn set(&self, key: SlotKey, raw: &str) -> Result<MutationOutcome> {
        let delta = match Booking::new(raw) {
            Some(value) => Delta::Written(self.write(Slot::new(key, value)).await?),
            None => {
                if matches!(self.lookup(&key), Known::Empty) {
                    debug!("slot already empty");
                    return Ok(MutationOutcome::NoOp);
                }
                self.clear(&key).await?;
                Delta::Cleared(key)
            }
        };

        self.settle(vec![delta]).await;
        Ok(MutationOutcome::Applied)
    }

    /// Writes the source's booking to `target`, leaving the source intact.
    #[instrument(skip_all, fields(source = %source, target = %target))]
    pub async fn copy(&self, source: &SlotKey, target: SlotKey) -> Result<MutationOutcome> {
        if *source == target {
            debug!("copy onto itself");
            return Ok(MutationOutcome::NoOp);
        }
        let Some(value) = self.source_booking(source)? else {
            debug!("source is empty");
            return Ok(MutationOutcome::NoOp);
        };

        let written = self.write(Slot::new(target, value)).await?;
        info!("slot copied");
        self.settle(vec![Delta::Written(written)]).await;
        Ok(MutationOutcome::Applied)
    }

    /// Moves the source's booking to `target`.
    ///
    /// The target is written before the source is cleared, so a failure in
    /// between leaves the booking duplicated rather than lost.
    #[instrument(skip_all, fields(source = %source, target = %target))]
    pub async fn move_slot(&self, source: SlotKey, target: SlotKey) -> Result<MutationOutcome> {
        // Writing then clearing the same key would destroy the booking.
        if source == target {
            debug!("move onto itself");
            return Ok(MutationOutcome::NoOp);
        }
        let Some(value) = self.source_booking(&source)? else {
            debug!("source is empty");
            return Ok(MutationOutcome::NoOp);
        };

        let written = self.write(Slot::new(target, value)).await?;
        self.clear(&source).await?;
        info!("slot moved");
        self.settle(vec![Delta::Written(written), Delta::Cleared(source)])
            .await;
        Ok(MutationOutcome::Applied)
    }

    /// Opens an edit of `key`, capturing its current value.
    pub fn begin_edit(&self, key: SlotKey) -> EditIntent {
        let existing = self.get(&key);
        EditIntent { key, existing }
    }

    /// Applies a confirmed edit through [`set`](Self::set).
    pub async fn confirm_edit(&self, intent: EditIntent, raw: &str) -> Result<MutationOutcome> {
        self.set(intent.key, raw).await
    }

    // ========== Store steps ==========

    async fn write(&self, slot: Slot) -> Result<StoredSlot> {
        let key = slot.key();
        match self.store.write(&slot).await {
            Ok(stored) => {
                info!(id = %stored.id, "slot written");
                Ok(stored)
            }
            Err(source) => Err(self.record(SlotError::Write {
                key: key.storage_id(),
                source,
            })),
        }
    }

    async fn clear(&self, key: &SlotKey) -> Result<()> {
        match self.store.clear(key).await {
            Ok(()) => {
                info!(id = %key, "slot cleared");
                Ok(())
            }
            Err(source) => Err(self.record(SlotError::Delete {
                key: key.storage_id(),
                source,
            })),
        }
    }

    fn record(&self, err: SlotError) -> SlotError {
        warn!(error = %err, store = self.store.name(), "mutation failed");
        self.state.lock().unwrap().last_error = Some(err.to_string());
        err
    }

    async fn settle(&self, deltas: Vec<Delta>) {
        match self.policy {
            RefreshPolicy::Refetch => {
                // fetch has already logged and recorded the failure
                if self.refresh().await.is_err() {
                    debug!("snapshot is stale after mutation");
                }
            }
            RefreshPolicy::Merge => {
                let mut state = self.state.lock().unwrap();
                let Some(range) = state.range else {
                    return;
                };
                for delta in deltas {
                    match delta {
                        Delta::Written(stored) => {
                            if range.contains(stored.slot.date) {
                                state.slots.insert(stored.slot.key(), stored);
                            }
                        }
                        Delta::Cleared(key) => {
                            state.slots.remove(&key);
                        }
                    }
                }
            }
        }
    }
}
