//! Calibration settings loaded from TOML.
//!
//! Lookup order:
//! 1. `--config <path>` on the command line
//! 2. `NINEBOX_CONFIG` environment variable
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Dimension;

pub const CONFIG_ENV_VAR: &str = "NINEBOX_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub import: ImportConfig,
    pub analysis: AnalysisConfig,
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub max_bytes: usize,
    pub max_rows: usize,
    /// Date tenure is measured against when only `Hire Date` is present.
    /// Defaults to today.
    pub reference_date: Option<NaiveDate>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_rows: 10_000,
            reference_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub dimensions: Vec<Dimension>,
    pub min_group_size: usize,
    pub min_expected_cell: f64,
    pub critical_p: f64,
    pub moderate_p: f64,
    pub minor_p: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dimensions: Dimension::ALL.to_vec(),
            min_group_size: 2,
            min_expected_cell: 1.0,
            critical_p: 0.01,
            moderate_p: 0.05,
            minor_p: 0.10,
        }
    }
}

/// Penalty weights for the quality score.
///
/// Each anomaly costs `weight * (1 + coverage_factor * coverage)` points,
/// where coverage is the share of the analysed workforce it touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub critical_weight: f64,
    pub moderate_weight: f64,
    pub minor_weight: f64,
    pub coverage_factor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            critical_weight: 30.0,
            moderate_weight: 12.0,
            minor_weight: 5.0,
            coverage_factor: 4.0,
        }
    }
}

impl CalibrationConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CalibrationConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn resolve(cli_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = cli_path {
            tracing::debug!(path = %path.display(), "loading config from command line");
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            tracing::debug!(%path, "loading config from environment");
            return Self::load(Path::new(&path));
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.import.max_bytes == 0 || self.import.max_rows == 0 {
            return Err(ConfigError::Invalid(
                "import limits must be greater than zero".to_string(),
            ));
        }

        let analysis = &self.analysis;
        if analysis.dimensions.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one analysis dimension is required".to_string(),
            ));
        }
        let cutoffs_ordered = 0.0 < analysis.critical_p
            && analysis.critical_p < analysis.moderate_p
            && analysis.moderate_p < analysis.minor_p
            && analysis.minor_p <= 1.0;
        if !cutoffs_ordered {
            return Err(ConfigError::Invalid(format!(
                "p-value cut-offs must satisfy 0 < critical < moderate < minor <= 1, \
                 got {} / {} / {}",
                analysis.critical_p, analysis.moderate_p, analysis.minor_p
            )));
        }
        if analysis.min_expected_cell < 0.0 {
            return Err(ConfigError::Invalid(
                "min_expected_cell cannot be negative".to_string(),
            ));
        }

        let scoring = &self.scoring;
        let weights = [
            scoring.critical_weight,
            scoring.moderate_weight,
            scoring.minor_weight,
            scoring.coverage_factor,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::Invalid(
                "scoring weights must be finite and non-negative".to_string(),
            ));
        }

        Ok(())
    }
}
