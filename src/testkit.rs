//! Roster builders shared by unit tests.

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::{EmployeeId, Rating};
use crate::roster::{LoadOptions, RosterStore, TabularData};

const HEADERS: [&str; 10] = [
    "Employee ID",
    "Worker",
    "Performance",
    "Potential",
    "Manager ID",
    "Job Function",
    "Location",
    "Job Level",
    "Tenure (Months)",
    "Flags",
];

pub fn id(value: &str) -> EmployeeId {
    EmployeeId::from(value)
}

/// A fixed instant plus `seconds`.
pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_767_225_600 + seconds, 0).unwrap()
}

pub fn load_options() -> LoadOptions {
    LoadOptions {
        reference_date: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
    }
}

#[derive(Debug, Clone)]
pub struct Person {
    id: String,
    performance: Rating,
    potential: Rating,
    manager: String,
    function: String,
    location: String,
    level: String,
    tenure: String,
    flags: String,
}

impl Person {
    pub fn new(id: &str, performance: Rating, potential: Rating) -> Self {
        Self {
            id: id.to_string(),
            performance,
            potential,
            manager: String::new(),
            function: String::new(),
            location: String::new(),
            level: String::new(),
            tenure: String::new(),
            flags: String::new(),
        }
    }

    pub fn manager(mut self, manager: &str) -> Self {
        self.manager = manager.to_string();
        self
    }

    pub fn function(mut self, function: &str) -> Self {
        self.function = function.to_string();
        self
    }

    pub fn location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn tenure(mut self, months: u32) -> Self {
        self.tenure = months.to_string();
        self
    }

    pub fn flags(mut self, flags: &str) -> Self {
        self.flags = flags.to_string();
        self
    }

    fn into_row(self) -> Vec<String> {
        vec![
            self.id.clone(),
            format!("Employee {}", self.id),
            self.performance.as_str().to_string(),
            self.potential.as_str().to_string(),
            self.manager,
            self.function,
            self.location,
            self.level,
            self.tenure,
            self.flags,
        ]
    }
}

pub fn table_of(people: Vec<Person>) -> TabularData {
    TabularData {
        headers: HEADERS.iter().map(|h| h.to_string()).collect(),
        rows: people
            .into_iter()
            .enumerate()
            .map(|(i, person)| (i + 2, person.into_row()))
            .collect(),
    }
}

pub fn roster(people: Vec<Person>) -> RosterStore {
    RosterStore::load(table_of(people), load_options()).unwrap()
}

/// Minimal roster of `(id, performance, potential)` rows.
pub fn roster_of(rows: &[(&str, Rating, Rating)]) -> RosterStore {
    roster(
        rows.iter()
            .map(|(id, performance, potential)| Person::new(id, *performance, *potential))
            .collect(),
    )
}
