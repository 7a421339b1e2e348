//! Discrete calibration intents and the queue that feeds them to a session.
//!
//! Any input modality produces [`Intent`] values. Batch scripts are CSV files
//! with the header `action,employee_id,performance,potential,text`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::error::SessionError;
use crate::filter::FilterDimension;
use crate::models::{EmployeeId, GridPosition, LevelBucket, Rating};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    MoveEmployee { id: EmployeeId, target: GridPosition },
    MoveDonut { id: EmployeeId, target: GridPosition },
    SetNote { id: EmployeeId, text: String },
    SetDonutNote { id: EmployeeId, text: String },
    SetFilter { dimension: FilterDimension, values: Vec<String> },
    SetReportingChain(Option<EmployeeId>),
    ClearFilters,
    ToggleExclusion(Vec<EmployeeId>),
    Exclude(Vec<EmployeeId>),
    Include(Vec<EmployeeId>),
    IncludeAll,
    ExcludeLevelBucket(LevelBucket),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("failed to read intent script: {0}")]
    Malformed(String),
    #[error("line {line}: unknown action '{action}'")]
    UnknownAction { line: usize, action: String },
    #[error("line {line}: '{field}' is required for {action}")]
    MissingField {
        line: usize,
        action: String,
        field: &'static str,
    },
    #[error("line {line}: {message}")]
    Invalid { line: usize, message: String },
}

/// An intent that the session rejected. Rejection leaves the session as it
/// was before that intent.
#[derive(Debug)]
pub struct IntentFailure {
    pub line: usize,
    pub intent: Intent,
    pub error: SessionError,
}

#[derive(Debug, Default)]
pub struct IntentQueue {
    pending: VecDeque<(usize, Intent)>,
}

impl IntentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(bytes: &[u8]) -> Result<Self, ScriptError> {
        Ok(Self {
            pending: parse_script(bytes)?.into(),
        })
    }

    /// Queues an intent. `line` is only used to label failures.
    pub fn push(&mut self, line: usize, intent: Intent) {
        self.pending.push_back((line, intent));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drains the queue in order. A rejected intent is reported and the rest
    /// still run.
    pub fn run(&mut self, session: &mut Session, at: DateTime<Utc>) -> Vec<IntentFailure> {
        let mut failures = Vec::new();
        let mut applied = 0usize;
        while let Some((line, intent)) = self.pending.pop_front() {
            match session.apply(intent.clone(), at) {
                Ok(()) => applied += 1,
                Err(error) => {
                    tracing::warn!(line, error = %error, "intent rejected");
                    failures.push(IntentFailure {
                        line,
                        intent,
                        error,
                    });
                }
            }
        }
        tracing::info!(applied, rejected = failures.len(), "intent queue drained");
        failures
    }
}

#[derive(Debug, Deserialize)]
struct ScriptRow {
    action: String,
    #[serde(default)]
    employee_id: Option<String>,
    #[serde(default)]
    performance: Option<String>,
    #[serde(default)]
    potential: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Parses an intent script into `(line, intent)` pairs. Any bad line fails
/// the whole script.
pub fn parse_script(bytes: &[u8]) -> Result<Vec<(usize, Intent)>, ScriptError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);

    let malformed = |err: csv::Error| ScriptError::Malformed(err.to_string());
    let headers = reader.headers().map_err(malformed)?.clone();

    let mut intents = Vec::new();
    for result in reader.records() {
        let record = result.map_err(malformed)?;
        let line = record
            .position()
            .map(|position| position.line() as usize)
            .unwrap_or(intents.len() + 2);
        let row: ScriptRow = record.deserialize(Some(&headers)).map_err(malformed)?;
        intents.push((line, row_to_intent(line, row)?));
    }
    Ok(intents)
}

fn row_to_intent(line: usize, row: ScriptRow) -> Result<Intent, ScriptError> {
    let action = row.action.to_ascii_lowercase();
    let required = |value: Option<String>, field: &'static str| {
        value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ScriptError::MissingField {
                line,
                action: action.clone(),
                field,
            })
    };

    let intent = match action.as_str() {
        "move" | "donut" => {
            let id = EmployeeId::new(required(row.employee_id, "employee_id")?);
            let performance = rating(line, &required(row.performance, "performance")?)?;
            let potential = rating(line, &required(row.potential, "potential")?)?;
            let target = GridPosition::new(performance, potential);
            if action == "move" {
                Intent::MoveEmployee { id, target }
            } else {
                Intent::MoveDonut { id, target }
            }
        }
        "note" => Intent::SetNote {
            id: EmployeeId::new(required(row.employee_id, "employee_id")?),
            text: row.text.unwrap_or_default(),
        },
        "donut-note" => Intent::SetDonutNote {
            id: EmployeeId::new(required(row.employee_id, "employee_id")?),
            text: row.text.unwrap_or_default(),
        },
        "exclude" => Intent::Exclude(id_list(&required(row.employee_id, "employee_id")?)),
        "include" => Intent::Include(id_list(&required(row.employee_id, "employee_id")?)),
        "toggle" => Intent::ToggleExclusion(id_list(&required(row.employee_id, "employee_id")?)),
        "include-all" => Intent::IncludeAll,
        "exclude-bucket" => {
            let text = required(row.text, "text")?;
            let bucket = text
                .parse::<LevelBucket>()
                .map_err(|message| ScriptError::Invalid { line, message })?;
            Intent::ExcludeLevelBucket(bucket)
        }
        "filter" => {
            let text = required(row.text, "text")?;
            let (dimension, values) = text.split_once(':').ok_or_else(|| ScriptError::Invalid {
                line,
                message: format!("filter '{text}' must look like dimension:value|value"),
            })?;
            let dimension = dimension
                .trim()
                .parse::<FilterDimension>()
                .map_err(|message| ScriptError::Invalid { line, message })?;
            Intent::SetFilter {
                dimension,
                values: split_list(values).map(str::to_string).collect(),
            }
        }
        "reporting-chain" => {
            let root = row.employee_id.filter(|v| !v.is_empty());
            Intent::SetReportingChain(root.map(EmployeeId::new))
        }
        "clear-filters" => Intent::ClearFilters,
        _ => {
            return Err(ScriptError::UnknownAction {
                line,
                action: row.action,
            })
        }
    };
    Ok(intent)
}

fn rating(line: usize, value: &str) -> Result<Rating, ScriptError> {
    Rating::parse(value).ok_or_else(|| ScriptError::Invalid {
        line,
        message: format!("'{value}' is not one of Low, Medium, High"),
    })
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split('|').map(str::trim).filter(|v| !v.is_empty())
}

fn id_list(value: &str) -> Vec<EmployeeId> {
    split_list(value).map(EmployeeId::from).collect()
}
