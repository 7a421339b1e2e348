use std::fmt;

use thiserror::Error;

use crate::models::{EmployeeId, GridPosition};

/// What is wrong with a single imported row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowProblem {
    MissingValue { column: String },
    InvalidRating { column: String, value: String },
    InvalidNumber { column: String, value: String },
    InvalidDate { column: String, value: String },
    DuplicateId { id: String, first_line: usize },
    TooManyFields { expected: usize, found: usize },
}

impl fmt::Display for RowProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowProblem::MissingValue { column } => write!(f, "missing value for '{column}'"),
            RowProblem::InvalidRating { column, value } => write!(
                f,
                "'{value}' is not a valid {column} (expected Low, Medium or High)"
            ),
            RowProblem::InvalidNumber { column, value } => {
                write!(f, "'{value}' is not a whole number for '{column}'")
            }
            RowProblem::InvalidDate { column, value } => {
                write!(f, "'{value}' is not a YYYY-MM-DD date for '{column}'")
            }
            RowProblem::DuplicateId { id, first_line } => {
                write!(f, "employee id '{id}' already used on line {first_line}")
            }
            RowProblem::TooManyFields { expected, found } => {
                write!(f, "row has {found} fields, header has {expected}")
            }
        }
    }
}

/// A row problem located by its line in the source file (header is line 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: usize,
    pub problem: RowProblem,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.problem)
    }
}

fn describe_rows(rows: &[RowError]) -> String {
    const SHOWN: usize = 5;
    let mut shown: Vec<String> = rows.iter().take(SHOWN).map(ToString::to_string).collect();
    if rows.len() > SHOWN {
        shown.push(format!("and {} more", rows.len() - SHOWN));
    }
    shown.join("; ")
}

/// Import failures. Import is atomic, so one of these means nothing was loaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("file is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("file has more than the {limit} row limit")]
    TooManyRows { limit: usize },
    #[error("file has no header row")]
    MissingHeader,
    #[error("file contains no employee rows")]
    NoRows,
    #[error("missing required column(s): {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("column '{0}' appears more than once")]
    DuplicateColumn(String),
    #[error("malformed file: {0}")]
    Malformed(String),
    #[error("{} invalid row(s): {}", .0.len(), describe_rows(.0))]
    InvalidRows(Vec<RowError>),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("employee {0} is not in the roster")]
    UnknownEmployee(EmployeeId),
    #[error("employee {id} is currently {current}; donut placement needs the center box")]
    NotInCenterBox {
        id: EmployeeId,
        current: GridPosition,
    },
    #[error("employee {0} has no rating change to annotate")]
    NoRatingChange(EmployeeId),
    #[error("employee {0} has no active donut placement")]
    NoDonutPlacement(EmployeeId),
    #[error("no employee has a net rating change; nothing to export")]
    NothingToExport,
    #[error("no roster has been imported")]
    NoSession,
}

/// Non-fatal: the manager chain for `employee_id` loops back on itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleDetected {
    pub employee_id: EmployeeId,
    /// Managers walked before the repeat, ending with the repeated id.
    pub path: Vec<EmployeeId>,
}

impl fmt::Display for CycleDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<&str> = self.path.iter().map(EmployeeId::as_str).collect();
        write!(
            f,
            "manager chain for {} loops: {}",
            self.employee_id,
            path.join(" -> ")
        )
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export row: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to finish export: {0}")]
    Flush(String),
}

/// Anything a dispatched intent or session operation can fail with.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Export(#[from] ExportError),
}
