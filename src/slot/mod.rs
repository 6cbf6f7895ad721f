pub mod types;
pub mod key;
pub mod window;

pub use types::{Booking, Period, Slot, SlotMap, StoredSlot};
pub use key::{parse_date, SlotKey, DATE_FORMAT};
pub use window::{start_of_week_monday, DateRange, WeekWindow, WEEK_OPTIONS};
