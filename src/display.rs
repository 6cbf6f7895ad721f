use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use chrono::NaiveDate;

use crate::roster::Roster;
use crate::slot::{DateRange, SlotKey, SlotMap};

/// Cell preview width used by the grid.
pub const CELL_WIDTH: usize = 26;

/// Collapses whitespace and shortens `s` to at most `max` characters,
/// ending with `…` when cut.
pub fn truncate(s: &str, max: usize) -> String {
    let clean = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.chars().count() <= max {
        return clean;
    }
    let mut out: String = clean.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Short day label such as `Mon 06 Jan`.
pub fn pretty_day(date: NaiveDate) -> String {
    date.format("%a %d %b").to_string()
}

/// Renders the window as a DATE / PERIOD / employee grid.
pub fn render_window(range: &DateRange, slots: &SlotMap, roster: &Roster) -> String {
    let mut out = String::new();
    let header: Vec<String> = ["DATE".to_string(), "PERIOD".to_string()]
        .into_iter()
        .chain(roster.employees().iter().cloned())
        .collect();
    out.push_str(&format_row(&header));

    for date in range.days() {
        for (idx, period) in roster.periods().iter().enumerate() {
            let day = if idx == 0 {
                format!("{} {}", pretty_day(date), date)
            } else {
                String::new()
            };
            let mut row = vec![day, period.to_string()];
            for employee in roster.employees() {
                let cell = SlotKey::new(date, *period, employee.as_str())
                    .ok()
                    .and_then(|key| slots.get(&key))
                    .map(|stored| truncate(stored.slot.value.as_str(), CELL_WIDTH))
                    .unwrap_or_default();
                row.push(cell);
            }
            out.push_str(&format_row(&row));
        }
    }
    out
}

fn format_row(cells: &[String]) -> String {
    let mut line = String::new();
    for (i, cell) in cells.iter().enumerate() {
        // date column is wider than the rest
        let width = match i {
            0 => 26,
            1 => 6,
            _ => CELL_WIDTH,
        };
        let pad = width.saturating_sub(cell.chars().count());
        line.push_str(cell);
        line.push_str(&" ".repeat(pad));
        line.push_str(" | ");
    }
    line.truncate(line.trim_end_matches([' ', '|']).len());
    line.push('\n');
    line
}

/// Prints the window grid to stdout.
pub fn print_window(range: &DateRange, slots: &SlotMap, roster: &Roster) {
    println!("\n=== Schedule {} → {} ===", range.start, range.end);
    println!("Booked slots: {}", slots.len());
    print!("{}", render_window(range, slots, roster));
}

/// Writes the window grid to `path`.
pub fn write_window_to_file(
    range: &DateRange,
    slots: &SlotMap,
    roster: &Roster,
    path: &Path,
) -> io::Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "** Schedule {} → {} **", range.start, range.end)?;
    file.write_all(render_window(range, slots, roster).as_bytes())?;
    Ok(())
}
