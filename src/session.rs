//! One calibration session: a roster, both change logs and the filter state.
//!
//! A [`Workspace`] owns at most one session. A successful import replaces it
//! wholesale; a failed import leaves it untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::changes::RatingChangeLog;
use crate::donut::DonutChangeLog;
use crate::error::{ImportError, PreconditionError, SessionError};
use crate::export;
use crate::filter::{FilterEngine, FilterState};
use crate::import::{self, ImportSettings};
use crate::intelligence::{AnalysisResult, IntelligenceEngine};
use crate::intents::Intent;
use crate::models::{Dimension, EmployeeId, GridPosition};
use crate::roster::RosterStore;
use crate::stats::{self, DistributionTable};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeTile {
    pub id: EmployeeId,
    pub name: String,
    pub position: GridPosition,
    pub donut_position: Option<GridPosition>,
    pub is_net_changed: bool,
    pub has_donut_entry: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total: usize,
    pub visible: usize,
    pub excluded: usize,
    pub net_changes: usize,
    pub active_donuts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridView {
    pub session_id: Uuid,
    pub tiles: Vec<EmployeeTile>,
    pub counters: Counters,
    pub statistics: DistributionTable,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub source: String,
    pub imported_at: DateTime<Utc>,
    pub roster: Arc<RosterStore>,
    pub ratings: RatingChangeLog,
    pub donuts: DonutChangeLog,
    pub visible: BTreeSet<EmployeeId>,
}

impl SessionSnapshot {
    pub fn export(&self) -> Result<Vec<u8>, SessionError> {
        export_changes(&self.roster, &self.ratings, &self.donuts)
    }

    pub fn analyze(
        &self,
        engine: &IntelligenceEngine,
        dimensions: &[Dimension],
    ) -> AnalysisResult {
        engine.analyze(&self.visible, &self.ratings, &self.roster, dimensions)
    }
}

fn export_changes(
    roster: &RosterStore,
    ratings: &RatingChangeLog,
    donuts: &DonutChangeLog,
) -> Result<Vec<u8>, SessionError> {
    if ratings.count() == 0 {
        return Err(PreconditionError::NothingToExport.into());
    }
    Ok(export::serialize(roster, ratings, donuts)?)
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    source: String,
    imported_at: DateTime<Utc>,
    roster: Arc<RosterStore>,
    ratings: RatingChangeLog,
    donuts: DonutChangeLog,
    filters: FilterState,
    engine: FilterEngine,
}

impl Session {
    pub fn new(
        roster: RosterStore,
        source: impl Into<String>,
        imported_at: DateTime<Utc>,
    ) -> Self {
        let roster = Arc::new(roster);
        let session = Self {
            id: Uuid::new_v4(),
            source: source.into(),
            imported_at,
            ratings: RatingChangeLog::new(Arc::clone(&roster)),
            donuts: DonutChangeLog::new(Arc::clone(&roster)),
            roster,
            filters: FilterState::default(),
            engine: FilterEngine::new(),
        };
        tracing::info!(
            session = %session.id,
            source = %session.source,
            employees = session.roster.len(),
            "session started"
        );
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn imported_at(&self) -> DateTime<Utc> {
        self.imported_at
    }

    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    pub fn ratings(&self) -> &RatingChangeLog {
        &self.ratings
    }

    pub fn donuts(&self) -> &DonutChangeLog {
        &self.donuts
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    /// Returns `false` for a drop onto the employee's current box, which
    /// logs nothing. Leaving the center box drops any donut placement.
    pub fn move_employee(
        &mut self,
        employee_id: &EmployeeId,
        target: GridPosition,
        at: DateTime<Utc>,
    ) -> Result<bool, PreconditionError> {
        let current = self
            .ratings
            .current_rating(employee_id)
            .ok_or_else(|| PreconditionError::UnknownEmployee(employee_id.clone()))?;
        if current == target {
            return Ok(false);
        }
        self.ratings
            .apply_move(employee_id, target.performance, target.potential, at)?;
        if !target.is_center() {
            self.donuts.clear(employee_id);
        }
        Ok(true)
    }

    pub fn move_donut(
        &mut self,
        employee_id: &EmployeeId,
        target: GridPosition,
        at: DateTime<Utc>,
    ) -> Result<(), PreconditionError> {
        self.donuts.apply_donut_move(
            &self.ratings,
            employee_id,
            target.performance,
            target.potential,
            at,
        )?;
        Ok(())
    }

    pub fn set_note(
        &mut self,
        employee_id: &EmployeeId,
        text: &str,
    ) -> Result<(), PreconditionError> {
        self.ratings.set_note(employee_id, text)
    }

    pub fn set_donut_note(
        &mut self,
        employee_id: &EmployeeId,
        text: &str,
    ) -> Result<(), PreconditionError> {
        self.donuts.set_note(employee_id, text)
    }

    pub fn filters_mut(&mut self) -> &mut FilterState {
        &mut self.filters
    }

    /// Applies one intent fully or not at all.
    pub fn apply(&mut self, intent: Intent, at: DateTime<Utc>) -> Result<(), SessionError> {
        tracing::debug!(session = %self.id, ?intent, "applying intent");
        match intent {
            Intent::MoveEmployee { id, target } => {
                self.move_employee(&id, target, at)?;
            }
            Intent::MoveDonut { id, target } => self.move_donut(&id, target, at)?,
            Intent::SetNote { id, text } => self.set_note(&id, &text)?,
            Intent::SetDonutNote { id, text } => self.set_donut_note(&id, &text)?,
            Intent::SetFilter { dimension, values } => {
                self.filters.set_criteria(dimension, values);
            }
            Intent::SetReportingChain(root) => {
                if let Some(root) = &root {
                    if !self.roster.contains(root) {
                        return Err(PreconditionError::UnknownEmployee(root.clone()).into());
                    }
                }
                self.filters.set_reporting_chain_root(root);
            }
            Intent::ClearFilters => self.filters.clear_filters(),
            Intent::ToggleExclusion(ids) => {
                self.require_known(&ids)?;
                self.filters.toggle_exclusion(ids);
            }
            Intent::Exclude(ids) => {
                self.require_known(&ids)?;
                self.filters.exclude(ids);
            }
            Intent::Include(ids) => {
                self.filters.include(&ids);
            }
            Intent::IncludeAll => self.filters.include_all(),
            Intent::ExcludeLevelBucket(bucket) => {
                let excluded = self.filters.exclude_by_level_bucket(&self.roster, bucket);
                tracing::debug!(bucket = bucket.as_str(), excluded, "level bucket excluded");
            }
        }
        Ok(())
    }

    fn require_known(&self, ids: &[EmployeeId]) -> Result<(), PreconditionError> {
        match ids.iter().find(|id| !self.roster.contains(id)) {
            Some(unknown) => Err(PreconditionError::UnknownEmployee(unknown.clone())),
            None => Ok(()),
        }
    }

    pub fn visible_ids(&mut self) -> BTreeSet<EmployeeId> {
        self.engine
            .compute_visible(&self.roster, &self.ratings, &self.filters)
    }

    pub fn statistics(&mut self) -> DistributionTable {
        let visible = self.visible_ids();
        stats::distribution(&visible, &self.ratings)
    }

    pub fn view(&mut self) -> GridView {
        let visible = self.visible_ids();
        let tiles: Vec<EmployeeTile> = self
            .roster
            .all()
            .iter()
            .filter(|employee| visible.contains(&employee.id))
            .map(|employee| {
                let donut_position = self.donuts.current_donut_position(&employee.id);
                EmployeeTile {
                    id: employee.id.clone(),
                    name: employee.name.clone(),
                    position: self
                        .ratings
                        .current_rating(&employee.id)
                        .unwrap_or_else(|| employee.base_position()),
                    donut_position,
                    is_net_changed: self.ratings.is_net_changed(&employee.id),
                    has_donut_entry: donut_position.is_some(),
                }
            })
            .collect();

        GridView {
            session_id: self.id,
            counters: Counters {
                total: self.roster.len(),
                visible: tiles.len(),
                excluded: self.filters.exclusions().len(),
                net_changes: self.ratings.count(),
                active_donuts: self.donuts.count(),
            },
            statistics: stats::distribution(&visible, &self.ratings),
            tiles,
        }
    }

    pub fn snapshot(&mut self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            source: self.source.clone(),
            imported_at: self.imported_at,
            roster: Arc::clone(&self.roster),
            ratings: self.ratings.clone(),
            donuts: self.donuts.clone(),
            visible: self.visible_ids(),
        }
    }

    pub fn export(&self) -> Result<Vec<u8>, SessionError> {
        export_changes(&self.roster, &self.ratings, &self.donuts)
    }
}

#[derive(Debug)]
pub struct Workspace {
    settings: ImportSettings,
    session: Option<Session>,
}

impl Workspace {
    pub fn new(settings: ImportSettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Parses `bytes` and, only on success, replaces the current session.
    pub fn import(
        &mut self,
        bytes: &[u8],
        source: &str,
        at: DateTime<Utc>,
    ) -> Result<&mut Session, ImportError> {
        let roster = import::parse(bytes, &self.settings).inspect_err(|err| {
            tracing::warn!(source, error = %err, "import rejected; keeping current session");
        })?;
        Ok(self.install(roster, source, at))
    }

    /// Starts a new session from an already-parsed roster, discarding the
    /// previous session's logs, filters and exclusions.
    pub fn install(
        &mut self,
        roster: RosterStore,
        source: &str,
        at: DateTime<Utc>,
    ) -> &mut Session {
        self.session.insert(Session::new(roster, source, at))
    }

    pub fn session(&self) -> Result<&Session, PreconditionError> {
        self.session.as_ref().ok_or(PreconditionError::NoSession)
    }

    pub fn session_mut(&mut self) -> Result<&mut Session, PreconditionError> {
        self.session.as_mut().ok_or(PreconditionError::NoSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterDimension;
    use crate::models::Rating::{High, Low, Medium};
    use crate::testkit::{at, id, roster, Person};
    use chrono::NaiveDate;

    fn session() -> Session {
        Session::new(
            roster(vec![
                Person::new("1", Medium, Medium).location("NYC"),
                Person::new("2", Medium, Medium).location("LDN"),
                Person::new("3", High, Low).location("NYC"),
            ]),
            "test.csv",
            at(0),
        )
    }

    fn workspace() -> Workspace {
        Workspace::new(ImportSettings {
            max_bytes: 1 << 16,
            max_rows: 100,
            reference_date: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
        })
    }

    #[test]
    fn drop_on_same_box_logs_nothing() {
        let mut session = session();
        assert!(!session.move_employee(&id("1"), GridPosition::CENTER, at(1)).unwrap());
        assert_eq!(session.ratings().total_entries(), 0);
        assert!(session.move_employee(&id("1"), GridPosition::new(High, High), at(2)).unwrap());
    }

    #[test]
    fn view_reports_flags_and_counters() {
        let mut session = session();
        session
            .apply(
                Intent::MoveEmployee {
                    id: id("1"),
                    target: GridPosition::new(High, High),
                },
                at(1),
            )
            .unwrap();
        session
            .apply(
                Intent::MoveDonut {
                    id: id("2"),
                    target: GridPosition::new(Low, High),
                },
                at(2),
            )
            .unwrap();
        session.apply(Intent::Exclude(vec![id("3")]), at(3)).unwrap();

        let view = session.view();
        assert_eq!(
            view.counters,
            Counters {
                total: 3,
                visible: 2,
                excluded: 1,
                net_changes: 1,
                active_donuts: 1
            }
        );
        let first = &view.tiles[0];
        assert!(first.is_net_changed && !first.has_donut_entry);
        assert_eq!(first.position, GridPosition::new(High, High));
        let second = &view.tiles[1];
        assert!(!second.is_net_changed && second.has_donut_entry);
        assert_eq!(second.position, GridPosition::CENTER);
        assert_eq!(view.statistics.total, 2);
    }

    #[test]
    fn failed_intent_changes_nothing() {
        let mut session = session();
        let err = session
            .apply(
                Intent::MoveDonut {
                    id: id("3"),
                    target: GridPosition::new(High, High),
                },
                at(1),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Precondition(PreconditionError::NotInCenterBox { .. })
        ));
        assert!(session
            .apply(Intent::Exclude(vec![id("1"), id("ghost")]), at(2))
            .is_err());
        assert!(session.filters().exclusions().is_empty());
        assert!(session
            .apply(Intent::SetReportingChain(Some(id("ghost"))), at(3))
            .is_err());
        assert_eq!(session.filters().reporting_chain_root(), None);
    }

    #[test]
    fn statistics_follow_visible_subset() {
        let mut session = session();
        session
            .apply(
                Intent::SetFilter {
                    dimension: FilterDimension::Location,
                    values: ["NYC".to_string()].into(),
                },
                at(1),
            )
            .unwrap();
        let table = session.statistics();
        assert_eq!(table.total, 2);
        assert_eq!(table.cell(GridPosition::CENTER).percentage, 50.0);
    }

    #[test]
    fn export_requires_a_net_change() {
        let mut session = session();
        assert!(matches!(
            session.export(),
            Err(SessionError::Precondition(PreconditionError::NothingToExport))
        ));
        assert!(matches!(
            session.snapshot().export(),
            Err(SessionError::Precondition(PreconditionError::NothingToExport))
        ));
        session.move_employee(&id("1"), GridPosition::new(Low, Low), at(1)).unwrap();
        assert!(session.export().is_ok());
        assert!(session.snapshot().export().is_ok());
    }

    #[test]
    fn leaving_center_drops_donut_placement() {
        let mut session = session();
        session
            .move_donut(&id("1"), GridPosition::new(High, High), at(1))
            .unwrap();
        session
            .move_employee(&id("1"), GridPosition::new(Low, Low), at(2))
            .unwrap();
        assert_eq!(session.donuts().current_donut_position(&id("1")), None);
        assert_eq!(session.view().counters.active_donuts, 0);

        let bytes = session.export().unwrap();
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let headers = reader.headers().unwrap().clone();
        let row = reader.records().next().unwrap().unwrap();
        for (header, value) in headers.iter().zip(row.iter()) {
            if header.starts_with("Donut") {
                assert_eq!(value, "", "{header}");
            }
        }
        assert_eq!(&row[2], "Low");
    }

    #[test]
    fn center_move_on_actual_rating_keeps_donut_placement() {
        let mut session = session();
        session
            .move_donut(&id("2"), GridPosition::new(High, High), at(1))
            .unwrap();
        session
            .move_employee(&id("2"), GridPosition::new(High, High), at(2))
            .unwrap();
        session
            .move_employee(&id("2"), GridPosition::CENTER, at(3))
            .unwrap();
        assert_eq!(session.donuts().current_donut_position(&id("2")), None);

        session
            .move_donut(&id("1"), GridPosition::new(Low, High), at(4))
            .unwrap();
        assert!(!session
            .move_employee(&id("1"), GridPosition::CENTER, at(5))
            .unwrap());
        assert_eq!(
            session.donuts().current_donut_position(&id("1")),
            Some(GridPosition::new(Low, High))
        );
    }

    #[test]
    fn import_resets_everything() {
        let mut workspace = workspace();
        assert_eq!(workspace.session().unwrap_err(), PreconditionError::NoSession);

        let csv = "Employee ID,Worker,Performance,Potential\n1,A,Medium,Medium\n2,B,Low,Low\n";
        let first_id = {
            let session = workspace.import(csv.as_bytes(), "first.csv", at(0)).unwrap();
            session.move_employee(&id("1"), GridPosition::new(High, High), at(1)).unwrap();
            session.move_donut(&id("1"), GridPosition::new(High, High), at(2)).unwrap_err();
            session.filters_mut().exclude([id("2")]);
            session.id()
        };

        let session = workspace.import(csv.as_bytes(), "second.csv", at(3)).unwrap();
        assert_ne!(session.id(), first_id);
        assert_eq!(session.ratings().total_entries(), 0);
        assert_eq!(session.donuts().count(), 0);
        assert!(session.filters().exclusions().is_empty());
        assert_eq!(session.source(), "second.csv");
    }

    #[test]
    fn failed_import_keeps_previous_session() {
        let mut workspace = workspace();
        let csv = "Employee ID,Worker,Performance,Potential\n1,A,Medium,Medium\n";
        let session_id = {
            let session = workspace.import(csv.as_bytes(), "good.csv", at(0)).unwrap();
            session.move_employee(&id("1"), GridPosition::new(High, High), at(1)).unwrap();
            session.id()
        };

        let bad = "Employee ID,Worker,Performance,Potential\n1,A,medium,Medium\n";
        assert!(workspace.import(bad.as_bytes(), "bad.csv", at(2)).is_err());

        let session = workspace.session().unwrap();
        assert_eq!(session.id(), session_id);
        assert_eq!(session.ratings().count(), 1);
    }
}
