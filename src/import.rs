use chrono::{NaiveDate, Utc};

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::roster::{LoadOptions, RosterStore, TabularData};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy)]
pub struct ImportSettings {
    pub max_bytes: usize,
    pub max_rows: usize,
    pub reference_date: NaiveDate,
}

impl ImportSettings {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            max_rows: config.max_rows,
            reference_date: config
                .reference_date
                .unwrap_or_else(|| Utc::now().date_naive()),
        }
    }
}

/// Parses a roster file. Size limits are checked before any row is read, and
/// nothing is returned unless every row is valid.
pub fn parse(bytes: &[u8], settings: &ImportSettings) -> Result<RosterStore, ImportError> {
    if bytes.len() > settings.max_bytes {
        return Err(ImportError::TooLarge {
            size: bytes.len(),
            limit: settings.max_bytes,
        });
    }

    let table = read_table(bytes, settings.max_rows)?;
    let row_count = table.rows.len();
    let roster = RosterStore::load(
        table,
        LoadOptions {
            reference_date: settings.reference_date,
        },
    )?;

    tracing::info!(
        rows = row_count,
        columns = roster.headers().len(),
        cycles = roster.cycle_warnings().len(),
        "roster imported"
    );
    Ok(roster)
}

/// Reads the header and data rows, skipping rows whose cells are all blank.
pub fn read_table(bytes: &[u8], max_rows: usize) -> Result<TabularData, ImportError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|err| ImportError::Malformed(err.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ImportError::MissingHeader);
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| ImportError::Malformed(err.to_string()))?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        if rows.len() == max_rows {
            return Err(ImportError::TooManyRows { limit: max_rows });
        }
        let line = record
            .position()
            .map(|position| position.line() as usize)
            .unwrap_or(rows.len() + 2);
        rows.push((line, record.iter().map(str::to_string).collect()));
    }

    Ok(TabularData { headers, rows })
}
