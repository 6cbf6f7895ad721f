use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::key::SlotKey;
use crate::error::SlotError;

/// Half-day segment of a calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    #[serde(rename = "AM")]
    Am,
    #[serde(rename = "PM")]
    Pm,
}

impl Period {
    /// All periods in display order.
    pub const ALL: [Period; 2] = [Period::Am, Period::Pm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Am => "AM",
            Period::Pm => "PM",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = SlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AM" => Ok(Period::Am),
            "PM" => Ok(Period::Pm),
            _ => Err(SlotError::InvalidPeriod(s.to_string())),
        }
    }
}

/// Booking details for a slot. Always trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Booking(String);

impl Booking {
    /// Trims `raw`; returns `None` when nothing is left.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Booking(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Booking {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Booking::new(&value).ok_or_else(|| "booking value is empty".to_string())
    }
}

impl From<Booking> for String {
    fn from(value: Booking) -> Self {
        value.0
    }
}

impl fmt::Display for Booking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A booked coordinate, in the shape of the durable record.
///
/// Every write carries all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub period: Period,
    pub employee: String,
    pub value: Booking,
}

impl Slot {
    pub fn new(key: SlotKey, value: Booking) -> Self {
        Slot {
            date: key.date,
            period: key.period,
            employee: key.employee,
            value,
        }
    }

    pub fn key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            period: self.period,
            employee: self.employee.clone(),
        }
    }
}

/// A slot as returned by the store, with its storage-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSlot {
    pub id: String,
    #[serde(flatten)]
    pub slot: Slot,
}

/// Slots keyed by coordinate, iterated in grid order.
pub type SlotMap = BTreeMap<SlotKey, StoredSlot>;
