use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One axis value on the calibration grid. Used for both performance and
/// potential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rating {
    Low,
    Medium,
    High,
}

pub type Performance = Rating;
pub type Potential = Rating;

impl Rating {
    pub const ALL: [Rating; 3] = [Rating::Low, Rating::Medium, Rating::High];

    pub fn index(self) -> usize {
        match self {
            Rating::Low => 0,
            Rating::Medium => 1,
            Rating::High => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Low => "Low",
            Rating::Medium => "Medium",
            Rating::High => "High",
        }
    }

    /// Exact, case-sensitive match against `Low`, `Medium`, `High`.
    pub fn parse(value: &str) -> Option<Rating> {
        match value {
            "Low" => Some(Rating::Low),
            "Medium" => Some(Rating::Medium),
            "High" => Some(Rating::High),
            _ => None,
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A box on the 3x3 grid.
///
/// Boxes are numbered 1-9 row by row from the bottom-left:
/// `number = potential_index * 3 + performance_index + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub performance: Performance,
    pub potential: Potential,
}

impl GridPosition {
    pub const CENTER: GridPosition = GridPosition {
        performance: Rating::Medium,
        potential: Rating::Medium,
    };

    pub fn new(performance: Performance, potential: Potential) -> Self {
        Self {
            performance,
            potential,
        }
    }

    pub fn index(self) -> usize {
        self.potential.index() * 3 + self.performance.index()
    }

    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn from_index(index: usize) -> Option<Self> {
        if index >= 9 {
            return None;
        }
        Some(Self::new(Rating::ALL[index % 3], Rating::ALL[index / 3]))
    }

    pub fn from_number(number: u8) -> Option<Self> {
        if number == 0 {
            return None;
        }
        Self::from_index(number as usize - 1)
    }

    pub fn all() -> impl Iterator<Item = GridPosition> {
        (0..9).filter_map(GridPosition::from_index)
    }

    pub fn is_center(self) -> bool {
        self == Self::CENTER
    }

    pub fn label(self) -> &'static str {
        match self.number() {
            1 => "Underperformer",
            2 => "Effective",
            3 => "Workhorse",
            4 => "Inconsistent",
            5 => "Core Talent",
            6 => "High Impact",
            7 => "Enigma",
            8 => "Growth",
            _ => "Star",
        }
    }

    /// Sum of both axis indices; used to decide whether a move is an upgrade.
    pub fn weight(self) -> usize {
        self.performance.index() + self.potential.index()
    }
}

impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.performance, self.potential)
    }
}

/// External employee identifier as imported. Opaque, compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmployeeId(String);

impl EmployeeId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EmployeeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EmployeeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TenureBucket {
    UnderOneYear,
    OneToThreeYears,
    ThreeToFiveYears,
    FivePlusYears,
}

impl TenureBucket {
    pub const ALL: [TenureBucket; 4] = [
        TenureBucket::UnderOneYear,
        TenureBucket::OneToThreeYears,
        TenureBucket::ThreeToFiveYears,
        TenureBucket::FivePlusYears,
    ];

    pub fn from_months(months: u32) -> Self {
        match months {
            0..=11 => TenureBucket::UnderOneYear,
            12..=35 => TenureBucket::OneToThreeYears,
            36..=59 => TenureBucket::ThreeToFiveYears,
            _ => TenureBucket::FivePlusYears,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TenureBucket::UnderOneYear => "< 1 year",
            TenureBucket::OneToThreeYears => "1-3 years",
            TenureBucket::ThreeToFiveYears => "3-5 years",
            TenureBucket::FivePlusYears => "5+ years",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LevelBucket {
    IndividualContributor,
    Manager,
    Director,
    Executive,
}

impl LevelBucket {
    /// Buckets a job level by its trailing number, e.g. `MT4` is a manager.
    pub fn from_level(level: &str) -> Option<Self> {
        let number = level_number(level)?;
        Some(match number {
            0..=3 => LevelBucket::IndividualContributor,
            4..=5 => LevelBucket::Manager,
            6 => LevelBucket::Director,
            _ => LevelBucket::Executive,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LevelBucket::IndividualContributor => "individual-contributor",
            LevelBucket::Manager => "manager",
            LevelBucket::Director => "director",
            LevelBucket::Executive => "executive",
        }
    }
}

impl FromStr for LevelBucket {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "individual-contributor" | "ic" => Ok(LevelBucket::IndividualContributor),
            "manager" | "managers" => Ok(LevelBucket::Manager),
            "director" | "directors" => Ok(LevelBucket::Director),
            "executive" | "executives" | "vp" => Ok(LevelBucket::Executive),
            other => Err(format!("unknown level bucket '{other}'")),
        }
    }
}

fn level_number(level: &str) -> Option<u32> {
    let digits: String = level
        .trim()
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub name: String,
    pub base_performance: Performance,
    pub base_potential: Potential,
    pub job_level: Option<String>,
    pub job_function: Option<String>,
    pub location: Option<String>,
    pub manager_id: Option<EmployeeId>,
    pub tenure_months: Option<u32>,
    pub flags: BTreeSet<String>,
    /// Every cell of the imported row, aligned with the roster headers.
    #[serde(skip)]
    pub source_row: Vec<String>,
}

impl Employee {
    pub fn base_position(&self) -> GridPosition {
        GridPosition::new(self.base_performance, self.base_potential)
    }

    pub fn tenure_bucket(&self) -> Option<TenureBucket> {
        self.tenure_months.map(TenureBucket::from_months)
    }

    pub fn level_bucket(&self) -> Option<LevelBucket> {
        self.job_level.as_deref().and_then(LevelBucket::from_level)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatingChangeEntry {
    /// Position in the session-wide move order.
    pub sequence: u64,
    pub employee_id: EmployeeId,
    pub from: GridPosition,
    pub to: GridPosition,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

/// The single active exploratory placement for a center-box employee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DonutChangeEntry {
    pub employee_id: EmployeeId,
    pub from: GridPosition,
    pub to: GridPosition,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

impl DonutChangeEntry {
    pub fn description(&self) -> String {
        format!(
            "Donut: {} ({}) -> {} ({})",
            self.from.label(),
            self.from,
            self.to.label(),
            self.to
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeDirection {
    Upgrade,
    Downgrade,
    Lateral,
}

impl ChangeDirection {
    pub fn between(from: GridPosition, to: GridPosition) -> Self {
        match to.weight().cmp(&from.weight()) {
            std::cmp::Ordering::Greater => ChangeDirection::Upgrade,
            std::cmp::Ordering::Less => ChangeDirection::Downgrade,
            std::cmp::Ordering::Equal => ChangeDirection::Lateral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeDirection::Upgrade => "upgrade",
            ChangeDirection::Downgrade => "downgrade",
            ChangeDirection::Lateral => "lateral",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetChange {
    pub employee_id: EmployeeId,
    pub name: String,
    pub from: GridPosition,
    pub to: GridPosition,
    pub direction: ChangeDirection,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dimension {
    Manager,
    Function,
    Location,
    Level,
    TenureBucket,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Manager,
        Dimension::Function,
        Dimension::Location,
        Dimension::Level,
        Dimension::TenureBucket,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Manager => "manager",
            Dimension::Function => "function",
            Dimension::Location => "location",
            Dimension::Level => "level",
            Dimension::TenureBucket => "tenure-bucket",
        }
    }

    /// The employee's group under this dimension, if the attribute is set.
    pub fn group_key(self, employee: &Employee) -> Option<String> {
        match self {
            Dimension::Manager => employee.manager_id.as_ref().map(|id| id.to_string()),
            Dimension::Function => employee.job_function.clone(),
            Dimension::Location => employee.location.clone(),
            Dimension::Level => employee.job_level.clone(),
            Dimension::TenureBucket => employee.tenure_bucket().map(|b| b.label().to_string()),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dimension {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Dimension::ALL
            .into_iter()
            .find(|dimension| dimension.as_str() == value)
            .ok_or_else(|| format!("unknown dimension '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Critical,
    Moderate,
    Minor,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Moderate => "moderate",
            Severity::Minor => "minor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub dimension: Dimension,
    pub group_key: String,
    pub group_size: usize,
    /// The cell that deviates most from expectation.
    pub focus_position: GridPosition,
    pub expected_count: f64,
    pub actual_count: usize,
    pub chi_square: f64,
    pub p_value: f64,
    pub severity: Severity,
    pub affected_employee_ids: Vec<EmployeeId>,
    pub actual: [usize; 9],
    pub expected: [f64; 9],
}
