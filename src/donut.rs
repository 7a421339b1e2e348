//! Exploratory "donut" placements for center-box employees.
//!
//! Kept apart from [`RatingChangeLog`]: a donut move never changes an actual
//! rating, and only the current placement per employee is retained.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::changes::RatingChangeLog;
use crate::error::PreconditionError;
use crate::models::{DonutChangeEntry, EmployeeId, GridPosition, Performance, Potential};
use crate::roster::RosterStore;

#[derive(Debug, Clone)]
pub struct DonutChangeLog {
    roster: Arc<RosterStore>,
    active: HashMap<EmployeeId, DonutChangeEntry>,
}

impl DonutChangeLog {
    pub fn new(roster: Arc<RosterStore>) -> Self {
        Self {
            roster,
            active: HashMap::new(),
        }
    }

    /// Places the employee's donut marker. Placing requires the employee's
    /// current actual rating to be the center box. A move to the center
    /// clears any placement regardless of the actual rating and returns `None`.
    pub fn apply_donut_move(
        &mut self,
        ratings: &RatingChangeLog,
        employee_id: &EmployeeId,
        performance: Performance,
        potential: Potential,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<&DonutChangeEntry>, PreconditionError> {
        let current = ratings
            .current_rating(employee_id)
            .ok_or_else(|| PreconditionError::UnknownEmployee(employee_id.clone()))?;

        let to = GridPosition::new(performance, potential);
        if to.is_center() {
            self.clear(employee_id);
            return Ok(None);
        }

        if !current.is_center() {
            return Err(PreconditionError::NotInCenterBox {
                id: employee_id.clone(),
                current,
            });
        }

        tracing::debug!(employee = %employee_id, %to, "donut placement set");

        let note = self.active.remove(employee_id).and_then(|previous| previous.note);
        let entry = self
            .active
            .entry(employee_id.clone())
            .or_insert(DonutChangeEntry {
                employee_id: employee_id.clone(),
                from: GridPosition::CENTER,
                to,
                timestamp,
                note,
            });
        Ok(Some(entry))
    }

    /// Removes any placement. Returns whether one existed.
    pub fn clear(&mut self, employee_id: &EmployeeId) -> bool {
        let removed = self.active.remove(employee_id).is_some();
        if removed {
            tracing::debug!(employee = %employee_id, "donut placement cleared");
        }
        removed
    }

    pub fn current_donut_position(&self, employee_id: &EmployeeId) -> Option<GridPosition> {
        self.active.get(employee_id).map(|entry| entry.to)
    }

    pub fn get(&self, employee_id: &EmployeeId) -> Option<&DonutChangeEntry> {
        self.active.get(employee_id)
    }

    pub fn set_note(
        &mut self,
        employee_id: &EmployeeId,
        text: &str,
    ) -> Result<(), PreconditionError> {
        let entry = self
            .active
            .get_mut(employee_id)
            .ok_or_else(|| PreconditionError::NoDonutPlacement(employee_id.clone()))?;
        let text = text.trim();
        entry.note = (!text.is_empty()).then(|| text.to_string());
        Ok(())
    }

    /// Active placements in roster order.
    pub fn all_active(&self) -> Vec<&DonutChangeEntry> {
        let mut entries: Vec<&DonutChangeEntry> = self.active.values().collect();
        entries.sort_by_key(|entry| self.roster.position_of(&entry.employee_id));
        entries
    }

    pub fn count(&self) -> usize {
        self.active.len()
    }
}
