use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlotError};

/// Window sizes offered by the schedule view, in weeks.
pub const WEEK_OPTIONS: [u8; 3] = [1, 2, 4];

/// Inclusive date range `[start, end]`.
///
/// A range with `start > end` is allowed and contains no dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Every date in the range, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }
}

/// A run of whole weeks starting on the Monday of `anchor`'s week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    anchor: NaiveDate,
    weeks: u8,
}

impl WeekWindow {
    pub fn new(anchor: NaiveDate, weeks: u8) -> Result<Self> {
        if !WEEK_OPTIONS.contains(&weeks) {
            return Err(SlotError::InvalidWindow(format!(
                "weeks must be one of {WEEK_OPTIONS:?}, got {weeks}"
            )));
        }
        Ok(WeekWindow { anchor, weeks })
    }

    pub fn anchor(&self) -> NaiveDate {
        self.anchor
    }

    pub fn weeks(&self) -> u8 {
        self.weeks
    }

    pub fn start(&self) -> NaiveDate {
        start_of_week_monday(self.anchor)
    }

    pub fn end(&self) -> NaiveDate {
        self.start() + Duration::days(7 * i64::from(self.weeks) - 1)
    }

    pub fn range(&self) -> DateRange {
        DateRange::new(self.start(), self.end())
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.range().days()
    }

    /// Moves the anchor by whole weeks (negative goes back).
    pub fn shift(&self, delta_weeks: i64) -> Self {
        WeekWindow {
            anchor: self.anchor + Duration::days(7 * delta_weeks),
            weeks: self.weeks,
        }
    }
}

/// Monday of the week containing `date`. Sunday belongs to the preceding Monday.
pub fn start_of_week_monday(date: NaiveDate) -> NaiveDate {
    let back = i64::from(date.weekday().num_days_from_monday());
    date - Duration::days(back)
}
