//! The imported employee roster and its lookup indices.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::{CycleDetected, ImportError, RowError, RowProblem};
use crate::models::{Employee, EmployeeId, Rating};

pub const EMPLOYEE_ID: &str = "Employee ID";
pub const WORKER: &str = "Worker";
pub const PERFORMANCE: &str = "Performance";
pub const POTENTIAL: &str = "Potential";
pub const JOB_LEVEL: &str = "Job Level";
pub const JOB_FUNCTION: &str = "Job Function";
pub const LOCATION: &str = "Location";
pub const MANAGER_ID: &str = "Manager ID";
pub const TENURE_MONTHS: &str = "Tenure (Months)";
pub const HIRE_DATE: &str = "Hire Date";
pub const FLAGS: &str = "Flags";

const REQUIRED_COLUMNS: [&str; 4] = [EMPLOYEE_ID, WORKER, PERFORMANCE, POTENTIAL];
const KNOWN_COLUMNS: [&str; 11] = [
    EMPLOYEE_ID,
    WORKER,
    PERFORMANCE,
    POTENTIAL,
    JOB_LEVEL,
    JOB_FUNCTION,
    LOCATION,
    MANAGER_ID,
    TENURE_MONTHS,
    HIRE_DATE,
    FLAGS,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularData {
    pub headers: Vec<String>,
    /// Each row paired with its line number in the source (header is line 1).
    pub rows: Vec<(usize, Vec<String>)>,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    pub reference_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub employee_id: usize,
    pub worker: usize,
    pub performance: usize,
    pub potential: usize,
    pub job_level: Option<usize>,
    pub job_function: Option<usize>,
    pub location: Option<usize>,
    pub manager_id: Option<usize>,
    pub tenure_months: Option<usize>,
    pub hire_date: Option<usize>,
    pub flags: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &[String]) -> Result<Self, ImportError> {
        for known in KNOWN_COLUMNS {
            if headers.iter().filter(|h| h.as_str() == known).count() > 1 {
                return Err(ImportError::DuplicateColumn(known.to_string()));
            }
        }

        let find = |name: &str| headers.iter().position(|h| h == name);
        let missing: Vec<String> = REQUIRED_COLUMNS
            .into_iter()
            .filter(|&name| find(name).is_none())
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns(missing));
        }

        let required = |name: &str| {
            find(name).ok_or_else(|| ImportError::MissingColumns(vec![name.to_string()]))
        };
        Ok(Self {
            employee_id: required(EMPLOYEE_ID)?,
            worker: required(WORKER)?,
            performance: required(PERFORMANCE)?,
            potential: required(POTENTIAL)?,
            job_level: find(JOB_LEVEL),
            job_function: find(JOB_FUNCTION),
            location: find(LOCATION),
            manager_id: find(MANAGER_ID),
            tenure_months: find(TENURE_MONTHS),
            hire_date: find(HIRE_DATE),
            flags: find(FLAGS),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ManagerChain {
    /// Direct manager first, root last. Stops at the first manager id that is
    /// not in the roster.
    Resolved(Vec<EmployeeId>),
    /// The chain loops; see the roster's cycle warnings.
    Unresolved,
}

#[derive(Debug, Clone)]
pub struct RosterStore {
    headers: Vec<String>,
    columns: ColumnMap,
    employees: Vec<Employee>,
    by_id: HashMap<EmployeeId, usize>,
    reports: HashMap<EmployeeId, Vec<EmployeeId>>,
    chains: HashMap<EmployeeId, ManagerChain>,
    cycle_warnings: Vec<CycleDetected>,
}

impl RosterStore {
    /// Validates every row and builds the roster. Any invalid row fails the
    /// whole load and every offending row is reported.
    pub fn load(table: TabularData, options: LoadOptions) -> Result<Self, ImportError> {
        let columns = ColumnMap::resolve(&table.headers)?;
        if table.rows.is_empty() {
            return Err(ImportError::NoRows);
        }

        let width = table.headers.len();
        let mut employees = Vec::with_capacity(table.rows.len());
        let mut by_id: HashMap<EmployeeId, usize> = HashMap::new();
        let mut first_lines: HashMap<String, usize> = HashMap::new();
        let mut errors = Vec::new();

        for (line, mut cells) in table.rows {
            if cells.len() > width {
                errors.push(RowError {
                    line,
                    problem: RowProblem::TooManyFields {
                        expected: width,
                        found: cells.len(),
                    },
                });
                continue;
            }
            cells.resize(width, String::new());

            match parse_employee(&columns, &table.headers, cells, options) {
                Ok(employee) => {
                    if let Some(first_line) = first_lines.get(employee.id.as_str()) {
                        errors.push(RowError {
                            line,
                            problem: RowProblem::DuplicateId {
                                id: employee.id.to_string(),
                                first_line: *first_line,
                            },
                        });
                        continue;
                    }
                    first_lines.insert(employee.id.to_string(), line);
                    by_id.insert(employee.id.clone(), employees.len());
                    employees.push(employee);
                }
                Err(problems) => {
                    errors.extend(problems.into_iter().map(|problem| RowError { line, problem }));
                }
            }
        }

        if !errors.is_empty() {
            return Err(ImportError::InvalidRows(errors));
        }

        let mut reports: HashMap<EmployeeId, Vec<EmployeeId>> = HashMap::new();
        for employee in &employees {
            if let Some(manager_id) = &employee.manager_id {
                reports
                    .entry(manager_id.clone())
                    .or_default()
                    .push(employee.id.clone());
            }
        }

        let mut roster = Self {
            headers: table.headers,
            columns,
            employees,
            by_id,
            reports,
            chains: HashMap::new(),
            cycle_warnings: Vec::new(),
        };
        roster.resolve_chains();
        Ok(roster)
    }

    fn resolve_chains(&mut self) {
        let mut chains = HashMap::with_capacity(self.employees.len());
        let mut warnings = Vec::new();

        for employee in &self.employees {
            match self.walk_chain(employee) {
                Ok(chain) => {
                    chains.insert(employee.id.clone(), ManagerChain::Resolved(chain));
                }
                Err(path) => {
                    chains.insert(employee.id.clone(), ManagerChain::Unresolved);
                    warnings.push(CycleDetected {
                        employee_id: employee.id.clone(),
                        path,
                    });
                }
            }
        }

        if !warnings.is_empty() {
            tracing::warn!(
                employees = warnings.len(),
                "manager chains contain cycles; those chains are marked unresolved"
            );
        }

        self.chains = chains;
        self.cycle_warnings = warnings;
    }

    fn walk_chain(&self, employee: &Employee) -> Result<Vec<EmployeeId>, Vec<EmployeeId>> {
        let mut chain = Vec::new();
        let mut seen: HashSet<&EmployeeId> = HashSet::from([&employee.id]);
        let mut cursor = employee.manager_id.as_ref();

        while let Some(manager_id) = cursor {
            let Some(manager) = self.get(manager_id) else {
                break;
            };
            chain.push(manager.id.clone());
            if !seen.insert(&manager.id) {
                return Err(chain);
            }
            cursor = manager.manager_id.as_ref();
        }

        Ok(chain)
    }

    pub fn get(&self, id: &EmployeeId) -> Option<&Employee> {
        self.by_id.get(id).map(|index| &self.employees[*index])
    }

    pub fn contains(&self, id: &EmployeeId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn position_of(&self, id: &EmployeeId) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    pub fn all(&self) -> &[Employee] {
        &self.employees
    }

    pub fn ids(&self) -> impl Iterator<Item = &EmployeeId> {
        self.employees.iter().map(|e| &e.id)
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    pub fn cycle_warnings(&self) -> &[CycleDetected] {
        &self.cycle_warnings
    }

    pub fn chain_status(&self, id: &EmployeeId) -> Option<&ManagerChain> {
        self.chains.get(id)
    }

    /// Managers above `id`, nearest first. `None` when the id is unknown or
    /// its chain loops.
    pub fn resolve_manager_chain(&self, id: &EmployeeId) -> Option<Vec<&Employee>> {
        match self.chains.get(id)? {
            ManagerChain::Resolved(chain) => {
                Some(chain.iter().filter_map(|manager| self.get(manager)).collect())
            }
            ManagerChain::Unresolved => None,
        }
    }

    pub fn direct_reports(&self, manager_id: &EmployeeId) -> &[EmployeeId] {
        self.reports
            .get(manager_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Everyone reporting to `root` directly or indirectly, excluding `root`.
    pub fn reporting_tree(&self, root: &EmployeeId) -> HashSet<EmployeeId> {
        let mut members = HashSet::new();
        let mut queue: VecDeque<&EmployeeId> = VecDeque::from([root]);

        while let Some(manager) = queue.pop_front() {
            for report in self.direct_reports(manager) {
                if report != root && members.insert(report.clone()) {
                    queue.push_back(report);
                }
            }
        }

        members
    }

    /// Distinct values present for a categorical attribute, for filter pickers.
    pub fn distinct_values<F>(&self, attribute: F) -> BTreeSet<String>
    where
        F: Fn(&Employee) -> Option<&str>,
    {
        self.employees
            .iter()
            .filter_map(|e| attribute(e).map(str::to_string))
            .collect()
    }
}

fn parse_employee(
    columns: &ColumnMap,
    headers: &[String],
    cells: Vec<String>,
    options: LoadOptions,
) -> Result<Employee, Vec<RowProblem>> {
    let mut problems = Vec::new();

    let mut required_text = |index: usize| {
        let value = &cells[index];
        if value.trim().is_empty() {
            problems.push(RowProblem::MissingValue {
                column: headers[index].clone(),
            });
        }
        value.clone()
    };
    let id = required_text(columns.employee_id).trim().to_string();
    let name = required_text(columns.worker);

    let performance = parse_rating(&cells, headers, columns.performance, &mut problems);
    let potential = parse_rating(&cells, headers, columns.potential, &mut problems);

    let optional = |index: Option<usize>| {
        index
            .map(|i| cells[i].trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let tenure_months = match optional(columns.tenure_months) {
        Some(value) => match value.parse::<u32>() {
            Ok(months) => Some(months),
            Err(_) => {
                problems.push(RowProblem::InvalidNumber {
                    column: TENURE_MONTHS.to_string(),
                    value,
                });
                None
            }
        },
        None => match optional(columns.hire_date) {
            Some(value) => match NaiveDate::parse_from_str(&value, "%Y-%m-%d") {
                Ok(hired) => Some(months_between(hired, options.reference_date)),
                Err(_) => {
                    problems.push(RowProblem::InvalidDate {
                        column: HIRE_DATE.to_string(),
                        value,
                    });
                    None
                }
            },
            None => None,
        },
    };

    let flags: BTreeSet<String> = optional(columns.flags)
        .map(|value| {
            value
                .split([';', ','])
                .map(str::trim)
                .filter(|flag| !flag.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let job_level = optional(columns.job_level);
    let job_function = optional(columns.job_function);
    let location = optional(columns.location);
    let manager_id = optional(columns.manager_id).map(EmployeeId::from);

    match (performance, potential) {
        (Some(base_performance), Some(base_potential)) if problems.is_empty() => Ok(Employee {
            id: EmployeeId::from(id),
            name,
            base_performance,
            base_potential,
            job_level,
            job_function,
            location,
            manager_id,
            tenure_months,
            flags,
            source_row: cells,
        }),
        _ => Err(problems),
    }
}

fn parse_rating(
    cells: &[String],
    headers: &[String],
    index: usize,
    problems: &mut Vec<RowProblem>,
) -> Option<Rating> {
    let value = &cells[index];
    if value.is_empty() {
        problems.push(RowProblem::MissingValue {
            column: headers[index].clone(),
        });
        return None;
    }
    let rating = Rating::parse(value);
    if rating.is_none() {
        problems.push(RowProblem::InvalidRating {
            column: headers[index].clone(),
            value: value.clone(),
        });
    }
    rating
}

/// Whole months from `start` to `end`; zero if `start` is in the future.
fn months_between(start: NaiveDate, end: NaiveDate) -> u32 {
    let mut months =
        (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32;
    if end.day() < start.day() {
        months -= 1;
    }
    months.max(0) as u32
}
