//! Visible-subset computation. Values within a dimension are OR-ed and
//! dimensions are AND-ed. Exclusions are subtracted last.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::changes::RatingChangeLog;
use crate::models::{Employee, EmployeeId, GridPosition, LevelBucket};
use crate::roster::RosterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterDimension {
    JobLevel,
    JobFunction,
    Location,
    Manager,
    Flag,
    TenureBucket,
    GridPosition,
}

impl FilterDimension {
    pub const ALL: [FilterDimension; 7] = [
        FilterDimension::JobLevel,
        FilterDimension::JobFunction,
        FilterDimension::Location,
        FilterDimension::Manager,
        FilterDimension::Flag,
        FilterDimension::TenureBucket,
        FilterDimension::GridPosition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FilterDimension::JobLevel => "job-level",
            FilterDimension::JobFunction => "job-function",
            FilterDimension::Location => "location",
            FilterDimension::Manager => "manager",
            FilterDimension::Flag => "flag",
            FilterDimension::TenureBucket => "tenure-bucket",
            FilterDimension::GridPosition => "grid-position",
        }
    }

    fn matches(
        self,
        employee: &Employee,
        current: GridPosition,
        accepted: &HashSet<String>,
    ) -> bool {
        let accepts = |value: Option<&str>| value.is_some_and(|v| accepted.contains(v));
        match self {
            FilterDimension::JobLevel => accepts(employee.job_level.as_deref()),
            FilterDimension::JobFunction => accepts(employee.job_function.as_deref()),
            FilterDimension::Location => accepts(employee.location.as_deref()),
            FilterDimension::Manager => {
                accepts(employee.manager_id.as_ref().map(EmployeeId::as_str))
            }
            FilterDimension::Flag => employee.flags.iter().any(|flag| accepted.contains(flag)),
            FilterDimension::TenureBucket => accepts(employee.tenure_bucket().map(|b| b.label())),
            FilterDimension::GridPosition => accepted.contains(&current.number().to_string()),
        }
    }
}

impl fmt::Display for FilterDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterDimension {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        FilterDimension::ALL
            .into_iter()
            .find(|dimension| dimension.as_str() == value)
            .ok_or_else(|| format!("unknown filter dimension '{value}'"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    inclusion_criteria: BTreeMap<FilterDimension, HashSet<String>>,
    reporting_chain_root: Option<EmployeeId>,
    exclusions: BTreeSet<EmployeeId>,
}

impl FilterState {
    /// Replaces the accepted values for one dimension. An empty set removes
    /// the constraint.
    pub fn set_criteria<I, S>(&mut self, dimension: FilterDimension, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: HashSet<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            self.inclusion_criteria.remove(&dimension);
        } else {
            self.inclusion_criteria.insert(dimension, values);
        }
    }

    pub fn criteria(&self, dimension: FilterDimension) -> Option<&HashSet<String>> {
        self.inclusion_criteria.get(&dimension)
    }

    pub fn set_reporting_chain_root(&mut self, root: Option<EmployeeId>) {
        self.reporting_chain_root = root;
    }

    pub fn reporting_chain_root(&self) -> Option<&EmployeeId> {
        self.reporting_chain_root.as_ref()
    }

    pub fn has_active_filters(&self) -> bool {
        !self.inclusion_criteria.is_empty() || self.reporting_chain_root.is_some()
    }

    /// Resets criteria and the chain root. Exclusions are kept.
    pub fn clear_filters(&mut self) {
        self.inclusion_criteria.clear();
        self.reporting_chain_root = None;
    }

    pub fn exclude<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = EmployeeId>,
    {
        ids.into_iter().filter(|id| self.exclusions.insert(id.clone())).count()
    }

    pub fn include<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a EmployeeId>,
    {
        ids.into_iter().filter(|id| self.exclusions.remove(*id)).count()
    }

    pub fn include_all(&mut self) {
        self.exclusions.clear();
    }

    pub fn toggle_exclusion<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = EmployeeId>,
    {
        for id in ids {
            if !self.exclusions.remove(&id) {
                self.exclusions.insert(id);
            }
        }
    }

    /// Quick-exclusion button: resolves the bucket to ids once and excludes
    /// them like any manual exclusion.
    pub fn exclude_by_level_bucket(&mut self, roster: &RosterStore, bucket: LevelBucket) -> usize {
        let ids: Vec<EmployeeId> = roster
            .all()
            .iter()
            .filter(|e| e.level_bucket() == Some(bucket))
            .map(|e| e.id.clone())
            .collect();
        self.exclude(ids)
    }

    pub fn is_excluded(&self, id: &EmployeeId) -> bool {
        self.exclusions.contains(id)
    }

    pub fn exclusions(&self) -> &BTreeSet<EmployeeId> {
        &self.exclusions
    }
}

/// Computes visible subsets and memoizes reporting-chain closures.
///
/// The memo is tied to one roster; build a new engine when the roster is
/// replaced.
#[derive(Debug, Clone, Default)]
pub struct FilterEngine {
    chains: HashMap<EmployeeId, Arc<HashSet<EmployeeId>>>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute_visible(
        &mut self,
        roster: &RosterStore,
        ratings: &RatingChangeLog,
        state: &FilterState,
    ) -> BTreeSet<EmployeeId> {
        let mut visible: BTreeSet<EmployeeId> = roster.ids().cloned().collect();

        for (dimension, accepted) in &state.inclusion_criteria {
            visible.retain(|id| {
                let (Some(employee), Some(current)) = (roster.get(id), ratings.current_rating(id))
                else {
                    return false;
                };
                dimension.matches(employee, current, accepted)
            });
        }

        if let Some(root) = &state.reporting_chain_root {
            let members = self.reporting_chain(roster, root);
            visible.retain(|id| members.contains(id));
        }

        visible.retain(|id| !state.exclusions.contains(id));
        visible
    }

    pub fn reporting_chain(
        &mut self,
        roster: &RosterStore,
        root: &EmployeeId,
    ) -> Arc<HashSet<EmployeeId>> {
        let members = self
            .chains
            .entry(root.clone())
            .or_insert_with(|| Arc::new(roster.reporting_tree(root)));
        Arc::clone(members)
    }

    pub fn cached_roots(&self) -> usize {
        self.chains.len()
    }
}
