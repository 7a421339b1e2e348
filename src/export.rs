use crate::changes::RatingChangeLog;
use crate::donut::DonutChangeLog;
use crate::error::ExportError;
use crate::roster::RosterStore;

pub const MODIFIED_COLUMN: &str = "Modified in Session";
pub const CHANGE_NOTES_COLUMN: &str = "Modification Notes";
pub const DONUT_POSITION_COLUMN: &str = "Donut Position";
pub const DONUT_LABEL_COLUMN: &str = "Donut Label";
pub const DONUT_DESCRIPTION_COLUMN: &str = "Donut Change Description";
pub const DONUT_NOTES_COLUMN: &str = "Donut Notes";

/// Columns this module appends. When a previous export is re-imported these
/// are dropped from the pass-through set and written fresh.
pub const DERIVED_COLUMNS: [&str; 6] = [
    MODIFIED_COLUMN,
    CHANGE_NOTES_COLUMN,
    DONUT_POSITION_COLUMN,
    DONUT_LABEL_COLUMN,
    DONUT_DESCRIPTION_COLUMN,
    DONUT_NOTES_COLUMN,
];

/// Writes every roster employee, in import order, with current ratings in
/// the Performance/Potential columns and the session columns appended.
pub fn serialize(
    roster: &RosterStore,
    ratings: &RatingChangeLog,
    donuts: &DonutChangeLog,
) -> Result<Vec<u8>, ExportError> {
    let kept: Vec<usize> = roster
        .headers()
        .iter()
        .enumerate()
        .filter(|(_, header)| !DERIVED_COLUMNS.contains(&header.as_str()))
        .map(|(index, _)| index)
        .collect();
    let columns = roster.columns();

    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<&str> = kept.iter().map(|i| roster.headers()[*i].as_str()).collect();
    header.extend(DERIVED_COLUMNS);
    writer.write_record(&header)?;

    let mut modified = 0usize;
    for employee in roster.all() {
        let mut cells = employee.source_row.clone();
        if let Some(current) = ratings.current_rating(&employee.id) {
            cells[columns.performance] = current.performance.as_str().to_string();
            cells[columns.potential] = current.potential.as_str().to_string();
        }

        let mut row: Vec<String> = kept.iter().map(|i| std::mem::take(&mut cells[*i])).collect();

        let is_modified = ratings.is_net_changed(&employee.id);
        if is_modified {
            modified += 1;
        }
        row.push(is_modified.to_string());
        row.push(ratings.note(&employee.id).unwrap_or_default().to_string());

        match donuts.get(&employee.id) {
            Some(entry) => {
                row.push(entry.to.number().to_string());
                row.push(entry.to.label().to_string());
                row.push(entry.description());
                row.push(entry.note.clone().unwrap_or_default());
            }
            None => row.extend(std::iter::repeat(String::new()).take(4)),
        }

        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| ExportError::Flush(err.to_string()))?;

    tracing::info!(
        rows = roster.len(),
        modified,
        donuts = donuts.count(),
        bytes = bytes.len(),
        "export serialized"
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{parse, ImportSettings};
    use crate::models::EmployeeId;
    use crate::models::Rating::{High, Low, Medium};
    use crate::testkit::at;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn settings() -> ImportSettings {
        ImportSettings {
            max_bytes: 1 << 20,
            max_rows: 100,
            reference_date: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
        }
    }

    fn session_logs(csv: &str) -> (Arc<RosterStore>, RatingChangeLog, DonutChangeLog) {
        let roster = Arc::new(parse(csv.as_bytes(), &settings()).unwrap());
        (
            Arc::clone(&roster),
            RatingChangeLog::new(Arc::clone(&roster)),
            DonutChangeLog::new(roster),
        )
    }

    fn rows_by_id(bytes: &[u8]) -> (Vec<String>, HashMap<String, HashMap<String, String>>) {
        let mut reader = csv::Reader::from_reader(bytes);
        let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        let mut rows = HashMap::new();
        for record in reader.records() {
            let record = record.unwrap();
            let row: HashMap<String, String> = headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect();
            rows.insert(row["Employee ID"].clone(), row);
        }
        (headers, rows)
    }

    const ROSTER: &str = "Employee ID,Worker,Performance,Potential,Cost Center\n\
                          1,Avery Lee,Medium,Medium,CC-1\n\
                          2,Jules Moreno,Medium,Medium,CC-2\n\
                          3,Kiara Patel,Medium,Medium,CC-3\n";

    #[test]
    fn appends_session_columns_after_original_ones() {
        let (roster, ratings, donuts) = session_logs(ROSTER);
        let bytes = serialize(&roster, &ratings, &donuts).unwrap();
        let (headers, rows) = rows_by_id(&bytes);
        assert_eq!(
            headers,
            vec![
                "Employee ID",
                "Worker",
                "Performance",
                "Potential",
                "Cost Center",
                "Modified in Session",
                "Modification Notes",
                "Donut Position",
                "Donut Label",
                "Donut Change Description",
                "Donut Notes",
            ]
        );
        assert_eq!(rows.len(), 3);
        assert_eq!(rows["2"]["Cost Center"], "CC-2");
        assert_eq!(rows["2"]["Modified in Session"], "false");
    }

    #[test]
    fn writes_current_ratings_and_notes() {
        let (roster, mut ratings, donuts) = session_logs(ROSTER);
        ratings.apply_move(&EmployeeId::from("1"), High, High, at(1)).unwrap();
        ratings.set_note(&EmployeeId::from("1"), "led the migration").unwrap();

        let (_, rows) = rows_by_id(&serialize(&roster, &ratings, &donuts).unwrap());
        assert_eq!(rows["1"]["Performance"], "High");
        assert_eq!(rows["1"]["Potential"], "High");
        assert_eq!(rows["1"]["Modified in Session"], "true");
        assert_eq!(rows["1"]["Modification Notes"], "led the migration");
        assert_eq!(
            roster.get(&EmployeeId::from("1")).unwrap().base_performance,
            Medium
        );
    }

    #[test]
    fn donut_columns_are_all_or_nothing() {
        let (roster, ratings, mut donuts) = session_logs(ROSTER);
        donuts
            .apply_donut_move(&ratings, &EmployeeId::from("2"), High, High, at(1))
            .unwrap();

        let (_, rows) = rows_by_id(&serialize(&roster, &ratings, &donuts).unwrap());
        let donut = &rows["2"];
        assert_eq!(donut["Modified in Session"], "false");
        assert_eq!(donut["Donut Position"], "9");
        assert_eq!(donut["Donut Label"], "Star");
        assert_eq!(
            donut["Donut Change Description"],
            "Donut: Core Talent (Medium/Medium) -> Star (High/High)"
        );
        assert_eq!(donut["Donut Notes"], "");

        for column in [
            DONUT_POSITION_COLUMN,
            DONUT_LABEL_COLUMN,
            DONUT_DESCRIPTION_COLUMN,
            DONUT_NOTES_COLUMN,
        ] {
            assert_eq!(rows["3"][column], "");
        }
    }

    #[test]
    fn reexport_replaces_stale_session_columns() {
        let (roster, mut ratings, donuts) = session_logs(ROSTER);
        ratings.apply_move(&EmployeeId::from("3"), Low, Low, at(1)).unwrap();
        let first = serialize(&roster, &ratings, &donuts).unwrap();

        let reimported = Arc::new(parse(&first, &settings()).unwrap());
        let fresh_ratings = RatingChangeLog::new(Arc::clone(&reimported));
        let fresh_donuts = DonutChangeLog::new(Arc::clone(&reimported));
        let bytes = serialize(&reimported, &fresh_ratings, &fresh_donuts).unwrap();
        let (headers, rows) = rows_by_id(&bytes);

        assert_eq!(headers.len(), 11);
        assert_eq!(rows["3"]["Performance"], "Low");
        assert_eq!(rows["3"]["Modified in Session"], "false");
    }
}
