//! 3x3 distribution tables over arbitrary employee subsets.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::changes::RatingChangeLog;
use crate::models::{Dimension, EmployeeId, GridPosition};

/// Group key for employees without a value in the grouping dimension.
pub const UNASSIGNED_GROUP: &str = "(unassigned)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CellStat {
    pub count: usize,
    pub percentage: f64,
}

/// Counts per box, indexed by [`GridPosition::index`]. Percentages are
/// relative to the table's own total.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DistributionTable {
    pub total: usize,
    pub cells: [CellStat; 9],
}

impl DistributionTable {
    pub fn from_counts(counts: [usize; 9]) -> Self {
        let total: usize = counts.iter().sum();
        let mut cells = [CellStat::default(); 9];
        for (cell, count) in cells.iter_mut().zip(counts) {
            cell.count = count;
            cell.percentage = if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            };
        }
        Self { total, cells }
    }

    pub fn cell(&self, position: GridPosition) -> CellStat {
        self.cells[position.index()]
    }

    pub fn counts(&self) -> [usize; 9] {
        self.cells.map(|cell| cell.count)
    }

    pub fn proportions(&self) -> [f64; 9] {
        self.cells.map(|cell| cell.percentage / 100.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (GridPosition, CellStat)> + '_ {
        GridPosition::all().map(|position| (position, self.cell(position)))
    }
}

/// Distribution of `employee_ids` by current rating. Ids not in the roster
/// are ignored and repeated ids count once.
pub fn distribution<'a, I>(employee_ids: I, ratings: &RatingChangeLog) -> DistributionTable
where
    I: IntoIterator<Item = &'a EmployeeId>,
{
    let mut seen = HashSet::new();
    let mut counts = [0usize; 9];
    for id in employee_ids {
        if !seen.insert(id) {
            continue;
        }
        if let Some(position) = ratings.current_rating(id) {
            counts[position.index()] += 1;
        }
    }
    DistributionTable::from_counts(counts)
}

/// One table per group. Employees with no value for `dimension` land in
/// [`UNASSIGNED_GROUP`].
pub fn distribution_grouped_by<'a, I>(
    employee_ids: I,
    ratings: &RatingChangeLog,
    dimension: Dimension,
) -> BTreeMap<String, DistributionTable>
where
    I: IntoIterator<Item = &'a EmployeeId>,
{
    group_members(employee_ids, ratings, dimension)
        .into_iter()
        .map(|(key, members)| (key, distribution(&members, ratings)))
        .collect()
}

/// Ids per group key, in input order with repeats dropped.
pub fn group_members<'a, I>(
    employee_ids: I,
    ratings: &RatingChangeLog,
    dimension: Dimension,
) -> BTreeMap<String, Vec<EmployeeId>>
where
    I: IntoIterator<Item = &'a EmployeeId>,
{
    let roster = ratings.roster();
    let mut seen = HashSet::new();
    let mut groups: BTreeMap<String, Vec<EmployeeId>> = BTreeMap::new();
    for id in employee_ids {
        if !seen.insert(id) {
            continue;
        }
        let Some(employee) = roster.get(id) else {
            continue;
        };
        let key = dimension
            .group_key(employee)
            .unwrap_or_else(|| UNASSIGNED_GROUP.to_string());
        groups.entry(key).or_default().push(id.clone());
    }
    groups
}
