//! 9-box talent calibration engine: roster import, dual change logs, filters,
//! distribution statistics, chi-square bias detection and annotated export.

pub mod changes;
pub mod config;
pub mod donut;
pub mod error;
pub mod export;
pub mod filter;
pub mod import;
pub mod intelligence;
pub mod intents;
pub mod jobs;
pub mod models;
pub mod report;
pub mod roster;
pub mod session;
pub mod stats;

#[cfg(test)]
mod testkit;
