//! `team-schedule` — employees × dates × half-day booking grid over a
//! document store.
//!
//! # Overview
//!
//! Each booked cell is one record in a slot collection, keyed
//! `date_period_employee`. A [`coordinator::SlotCoordinator`] caches the
//! records of the active date window and applies the `set`, `copy` and
//! `move` verbs through a [`store::SlotStore`] backend:
//!
//! | Backend     | Use                                   |
//! |-------------|---------------------------------------|
//! | `memory`    | tests and throwaway demos             |
//! | `file`      | single-user JSON document file        |
//! | `firestore` | hosted Firestore collection over REST |

pub mod config;
pub mod coordinator;
pub mod display;
pub mod error;
pub mod export;
pub mod roster;
pub mod slot;
pub mod store;
pub mod web;

pub use coordinator::{EditIntent, MutationOutcome, RefreshPolicy, SlotCoordinator};
pub use error::{Result, SlotError, StoreError};
pub use slot::{Booking, DateRange, Period, Slot, SlotKey, SlotMap, StoredSlot, WeekWindow};
