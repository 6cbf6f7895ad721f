use std::io::Write;

use csv::WriterBuilder;

use crate::roster::Roster;
use crate::slot::{DateRange, SlotKey, SlotMap};

/// Writes the window as CSV: `date,period,<employee...>`, one row per
/// date and period, cells holding the full booking text.
pub fn export_window_csv<W: Write>(
    writer: W,
    range: &DateRange,
    slots: &SlotMap,
    roster: &Roster,
) -> Result<(), csv::Error> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);

    let mut header = vec!["date".to_string(), "period".to_string()];
    header.extend(roster.employees().iter().cloned());
    wtr.write_record(&header)?;

    for date in range.days() {
        for period in roster.periods() {
            let mut record = vec![date.to_string(), period.to_string()];
            for employee in roster.employees() {
                let value = SlotKey::new(date, *period, employee.as_str())
                    .ok()
                    .and_then(|key| slots.get(&key))
                    .map(|stored| stored.slot.value.to_string())
                    .unwrap_or_default();
                record.push(value);
            }
            wtr.write_record(&record)?;
        }
    }

    wtr.flush()?;
    Ok(())
}

/// Same as [`export_window_csv`], collected into a string.
pub fn window_csv_string(
    range: &DateRange,
    slots: &SlotMap,
    roster: &Roster,
) -> Result<String, csv::Error> {
    let mut buf = Vec::new();
    export_window_csv(&mut buf, range, slots, roster)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
