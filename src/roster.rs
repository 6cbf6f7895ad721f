use crate::error::{Result, SlotError};
use crate::slot::{parse_date, Period, SlotKey};

/// The configured employees, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    employees: Vec<String>,
}

impl Roster {
    pub fn new<I, S>(employees: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            employees: employees.into_iter().map(Into::into).collect(),
        }
    }

    pub fn employees(&self) -> &[String] {
        &self.employees
    }

    pub fn periods(&self) -> &'static [Period] {
        &Period::ALL
    }

    pub fn contains(&self, employee: &str) -> bool {
        self.employees.iter().any(|e| e == employee)
    }

    /// Builds a key from raw coordinate strings, rejecting unknown employees.
    pub fn key(&self, date: &str, period: &str, employee: &str) -> Result<SlotKey> {
        let date = parse_date(date)?;
        let period = period.parse::<Period>()?;
        self.check(SlotKey::new(date, period, employee.trim())?)
    }

    /// Parses a storage id (`date_period_employee`) and checks the employee.
    pub fn parse_id(&self, id: &str) -> Result<SlotKey> {
        self.check(SlotKey::parse(id.trim())?)
    }

    fn check(&self, key: SlotKey) -> Result<SlotKey> {
        if !self.contains(&key.employee) {
            return Err(SlotError::UnknownEmployee(key.employee));
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster() -> Roster {
        Roster::new(["JOSH", "JOE", "ALEX", "FRANCES"])
    }

    #[test]
    fn key_accepts_roster_members() {
        let key = roster().key("2025-01-06", "am", "JOSH").unwrap();
        assert_eq!(key.storage_id(), "2025-01-06_AM_JOSH");
    }

    #[test]
    fn unknown_employee_is_rejected() {
        assert!(matches!(
            roster().key("2025-01-06", "AM", "MALLORY"),
            Err(SlotError::UnknownEmployee(name)) if name == "MALLORY"
        ));
        assert!(matches!(
            roster().parse_id("2025-01-06_AM_MALLORY"),
            Err(SlotError::UnknownEmployee(_))
        ));
    }

    #[test]
    fn bad_coordinates_report_which_part_failed() {
        assert!(matches!(roster().key("2025-13-01", "AM", "JOSH"), Err(SlotError::InvalidDate(_))));
        assert!(matches!(
            roster().key("2025-01-06", "EVE", "JOSH"),
            Err(SlotError::InvalidPeriod(_))
        ));
    }
}
