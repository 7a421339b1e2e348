//! Ledger of actual rating moves.
//!
//! Entries are only ever appended. An employee's current rating is the `to`
//! of their latest entry, falling back to the roster's base rating.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::PreconditionError;
use crate::models::{
    ChangeDirection, EmployeeId, GridPosition, NetChange, Performance, Potential,
    RatingChangeEntry,
};
use crate::roster::RosterStore;

#[derive(Debug, Clone)]
pub struct RatingChangeLog {
    roster: Arc<RosterStore>,
    entries: HashMap<EmployeeId, Vec<RatingChangeEntry>>,
    next_sequence: u64,
}

impl RatingChangeLog {
    pub fn new(roster: Arc<RosterStore>) -> Self {
        Self {
            roster,
            entries: HashMap::new(),
            next_sequence: 1,
        }
    }

    pub fn roster(&self) -> &RosterStore {
        &self.roster
    }

    pub fn roster_handle(&self) -> Arc<RosterStore> {
        Arc::clone(&self.roster)
    }

    /// Appends a move, even one back to the base rating.
    pub fn apply_move(
        &mut self,
        employee_id: &EmployeeId,
        performance: Performance,
        potential: Potential,
        timestamp: DateTime<Utc>,
    ) -> Result<&RatingChangeEntry, PreconditionError> {
        let from = self
            .current_rating(employee_id)
            .ok_or_else(|| PreconditionError::UnknownEmployee(employee_id.clone()))?;
        let to = GridPosition::new(performance, potential);

        let entry = RatingChangeEntry {
            sequence: self.next_sequence,
            employee_id: employee_id.clone(),
            from,
            to,
            timestamp,
            note: None,
        };
        self.next_sequence += 1;

        tracing::debug!(employee = %employee_id, %from, %to, "rating move logged");

        let timeline = self.entries.entry(employee_id.clone()).or_default();
        timeline.push(entry);
        Ok(&timeline[timeline.len() - 1])
    }

    /// Latest logged position, else the base rating. `None` for unknown ids.
    pub fn current_rating(&self, employee_id: &EmployeeId) -> Option<GridPosition> {
        if let Some(latest) = self.latest(employee_id) {
            return Some(latest.to);
        }
        self.roster.get(employee_id).map(|e| e.base_position())
    }

    pub fn latest(&self, employee_id: &EmployeeId) -> Option<&RatingChangeEntry> {
        self.entries.get(employee_id).and_then(|timeline| timeline.last())
    }

    pub fn timeline(&self, employee_id: &EmployeeId) -> &[RatingChangeEntry] {
        self.entries
            .get(employee_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Sets the note on the latest entry. Blank text clears it.
    pub fn set_note(
        &mut self,
        employee_id: &EmployeeId,
        text: &str,
    ) -> Result<(), PreconditionError> {
        if !self.roster.contains(employee_id) {
            return Err(PreconditionError::UnknownEmployee(employee_id.clone()));
        }
        let latest = self
            .entries
            .get_mut(employee_id)
            .and_then(|timeline| timeline.last_mut())
            .ok_or_else(|| PreconditionError::NoRatingChange(employee_id.clone()))?;

        let text = text.trim();
        latest.note = (!text.is_empty()).then(|| text.to_string());
        Ok(())
    }

    pub fn note(&self, employee_id: &EmployeeId) -> Option<&str> {
        self.latest(employee_id).and_then(|entry| entry.note.as_deref())
    }

    pub fn is_net_changed(&self, employee_id: &EmployeeId) -> bool {
        match (self.latest(employee_id), self.roster.get(employee_id)) {
            (Some(latest), Some(employee)) => latest.to != employee.base_position(),
            _ => false,
        }
    }

    /// Employees whose current rating differs from their base rating.
    pub fn net_changed_ids(&self) -> BTreeSet<EmployeeId> {
        self.entries
            .keys()
            .filter(|id| self.is_net_changed(id))
            .cloned()
            .collect()
    }

    /// The "N changes" badge: net-changed employees, not logged entries.
    pub fn count(&self) -> usize {
        self.entries.keys().filter(|id| self.is_net_changed(id)).count()
    }

    pub fn total_entries(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Net changes for the change tracker, most recent first.
    pub fn net_changes(&self) -> Vec<NetChange> {
        let mut changes: Vec<NetChange> = self
            .entries
            .iter()
            .filter_map(|(id, timeline)| {
                let latest = timeline.last()?;
                let employee = self.roster.get(id)?;
                let base = employee.base_position();
                if latest.to == base {
                    return None;
                }
                Some(NetChange {
                    employee_id: id.clone(),
                    name: employee.name.clone(),
                    from: base,
                    to: latest.to,
                    direction: ChangeDirection::between(base, latest.to),
                    note: latest.note.clone(),
                    timestamp: latest.timestamp,
                    sequence: latest.sequence,
                })
            })
            .collect();

        changes.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        changes
    }
}
