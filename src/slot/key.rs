use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::types::Period;
use crate::error::{Result, SlotError};

/// ISO 8601 calendar date, as stored in the `date` field.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Composite identity of a slot: `(date, period, employee)`.
///
/// Serialized as `date_period_employee`, the primary key of the stored
/// record. Neither an ISO date nor a period contains `_`, so splitting on the
/// first two underscores recovers the key even when the employee name has
/// underscores of its own.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotKey {
    pub date: NaiveDate,
    pub period: Period,
    pub employee: String,
}

impl SlotKey {
    pub fn new(date: NaiveDate, period: Period, employee: impl Into<String>) -> Result<Self> {
        let employee = employee.into();
        validate_employee(&employee)?;
        Ok(SlotKey {
            date,
            period,
            employee,
        })
    }

    /// Storage primary key for this coordinate.
    pub fn storage_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.date.format(DATE_FORMAT),
            self.period,
            self.employee
        )
    }

    /// Inverse of [`SlotKey::storage_id`].
    pub fn parse(id: &str) -> Result<Self> {
        let mut parts = id.splitn(3, '_');
        let (Some(date), Some(period), Some(employee)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SlotError::InvalidKey(id.to_string()));
        };
        let date = parse_date(date)?;
        let period = period.parse::<Period>()?;
        SlotKey::new(date, period, employee)
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_id())
    }
}

impl TryFrom<String> for SlotKey {
    type Error = SlotError;

    fn try_from(value: String) -> Result<Self> {
        SlotKey::parse(&value)
    }
}

impl From<SlotKey> for String {
    fn from(value: SlotKey) -> Self {
        value.storage_id()
    }
}

/// Parses a strict `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|_| SlotError::InvalidDate(s.to_string()))
}

fn validate_employee(employee: &str) -> Result<()> {
    if employee.trim().is_empty() {
        return Err(SlotError::InvalidKey("employee name is empty".to_string()));
    }
    // Document ids are path segments in the remote store.
    if employee.contains('/') {
        return Err(SlotError::InvalidKey(format!(
            "employee name `{employee}` contains '/'"
        )));
    }
    Ok(())
}
