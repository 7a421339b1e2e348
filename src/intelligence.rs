//! Rating-bias detection.
//!
//! For each grouping dimension every group's box distribution is compared to
//! what it would be if the group matched the population proportionally. The
//! comparison itself is a [`BiasTest`]; the default is a chi-square
//! goodness-of-fit test with 8 degrees of freedom.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::changes::RatingChangeLog;
use crate::config::{AnalysisConfig, ScoringConfig};
use crate::models::{AnomalyRecord, Dimension, EmployeeId, GridPosition, Severity};
use crate::roster::RosterStore;
use crate::stats::{self, UNASSIGNED_GROUP};

const GRID_CELLS: usize = 9;

/// Observed and expected box counts for one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSample<'a> {
    pub dimension: Dimension,
    pub group_key: &'a str,
    pub actual: [usize; 9],
    pub expected: [f64; 9],
}

impl GroupSample<'_> {
    pub fn size(&self) -> usize {
        self.actual.iter().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupVerdict {
    Tested { statistic: f64, p_value: f64 },
    InsufficientData { reason: String },
}

/// A significance test run on one group at a time.
pub trait BiasTest: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, sample: &GroupSample<'_>) -> GroupVerdict;
}

#[derive(Debug, Clone)]
pub struct ChiSquareTest {
    pub min_group_size: usize,
    pub min_expected_cell: f64,
}

impl ChiSquareTest {
    pub const DEGREES_OF_FREEDOM: u32 = (GRID_CELLS - 1) as u32;
}

impl Default for ChiSquareTest {
    fn default() -> Self {
        Self {
            min_group_size: 2,
            min_expected_cell: 1.0,
        }
    }
}

impl BiasTest for ChiSquareTest {
    fn name(&self) -> &'static str {
        "chi-square"
    }

    fn evaluate(&self, sample: &GroupSample<'_>) -> GroupVerdict {
        let size = sample.size();
        if size < self.min_group_size {
            return GroupVerdict::InsufficientData {
                reason: format!(
                    "{size} employee(s), at least {} needed",
                    self.min_group_size
                ),
            };
        }

        // Boxes empty across the whole population carry no information.
        if let Some(smallest) = sample
            .expected
            .iter()
            .copied()
            .filter(|e| *e > 0.0)
            .reduce(f64::min)
        {
            if smallest < self.min_expected_cell {
                return GroupVerdict::InsufficientData {
                    reason: format!(
                        "smallest expected box count {smallest:.2} is below {}",
                        self.min_expected_cell
                    ),
                };
            }
        }

        let statistic = chi_square_statistic(&sample.actual, &sample.expected);
        GroupVerdict::Tested {
            statistic,
            p_value: chi_square_survival(statistic, Self::DEGREES_OF_FREEDOM),
        }
    }
}

pub fn chi_square_statistic(actual: &[usize; 9], expected: &[f64; 9]) -> f64 {
    actual
        .iter()
        .zip(expected)
        .filter(|(_, e)| **e > 0.0)
        .map(|(a, e)| {
            let diff = *a as f64 - e;
            diff * diff / e
        })
        .sum()
}

/// P(X >= statistic) for a chi-square distribution.
pub fn chi_square_survival(statistic: f64, degrees_of_freedom: u32) -> f64 {
    if degrees_of_freedom == 0 {
        return 0.0;
    }
    if statistic <= 0.0 {
        return 1.0;
    }
    regularized_upper_gamma(degrees_of_freedom as f64 / 2.0, statistic / 2.0).clamp(0.0, 1.0)
}

const GAMMA_EPSILON: f64 = 1e-14;
const GAMMA_MAX_ITERATIONS: usize = 500;

/// Q(s, x), series expansion below `s + 1`, continued fraction above.
fn regularized_upper_gamma(s: f64, x: f64) -> f64 {
    if x < s + 1.0 {
        1.0 - lower_gamma_series(s, x)
    } else {
        upper_gamma_fraction(s, x)
    }
}

fn lower_gamma_series(s: f64, x: f64) -> f64 {
    let mut denominator = s;
    let mut term = 1.0 / s;
    let mut sum = term;
    for _ in 0..GAMMA_MAX_ITERATIONS {
        denominator += 1.0;
        term *= x / denominator;
        sum += term;
        if term.abs() < sum.abs() * GAMMA_EPSILON {
            break;
        }
    }
    sum * (-x + s * x.ln() - ln_gamma(s)).exp()
}

// Modified Lentz evaluation.
fn upper_gamma_fraction(s: f64, x: f64) -> f64 {
    const TINY: f64 = 1e-300;
    let mut b = x + 1.0 - s;
    let mut c = 1.0 / TINY;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..GAMMA_MAX_ITERATIONS {
        let i = i as f64;
        let an = -i * (i - s);
        b += 2.0;
        d = an * d + b;
        if d.abs() < TINY {
            d = TINY;
        }
        c = b + an / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < GAMMA_EPSILON {
            break;
        }
    }
    (-x + s * x.ln() - ln_gamma(s)).exp() * h
}

// Lanczos approximation, g = 7.
fn ln_gamma(x: f64) -> f64 {
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut series = COEFFICIENTS[0];
    for (i, coefficient) in COEFFICIENTS.iter().enumerate().skip(1) {
        series += coefficient / (x + i as f64);
    }
    let t = x + 7.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityThresholds {
    pub critical: f64,
    pub moderate: f64,
    pub minor: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            critical: 0.01,
            moderate: 0.05,
            minor: 0.10,
        }
    }
}

impl SeverityThresholds {
    /// `None` when the p-value is not significant enough to report.
    pub fn classify(&self, p_value: f64) -> Option<Severity> {
        if p_value < self.critical {
            Some(Severity::Critical)
        } else if p_value < self.moderate {
            Some(Severity::Moderate)
        } else if p_value < self.minor {
            Some(Severity::Minor)
        } else {
            None
        }
    }
}

/// A group skipped because it was too small to test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsufficientData {
    pub dimension: Dimension,
    pub group_key: String,
    pub group_size: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub quality_score: f64,
    pub population: usize,
    pub groups_tested: usize,
    pub anomalies: Vec<AnomalyRecord>,
    pub insufficient_data: Vec<InsufficientData>,
}

impl AnalysisResult {
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.anomalies.iter().filter(|a| a.severity == severity).count()
    }
}

pub struct IntelligenceEngine {
    test: Box<dyn BiasTest>,
    thresholds: SeverityThresholds,
    scoring: ScoringConfig,
}

impl IntelligenceEngine {
    pub fn new(
        test: Box<dyn BiasTest>,
        thresholds: SeverityThresholds,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            test,
            thresholds,
            scoring,
        }
    }

    pub fn chi_square(analysis: &AnalysisConfig, scoring: &ScoringConfig) -> Self {
        Self::new(
            Box::new(ChiSquareTest {
                min_group_size: analysis.min_group_size,
                min_expected_cell: analysis.min_expected_cell,
            }),
            SeverityThresholds {
                critical: analysis.critical_p,
                moderate: analysis.moderate_p,
                minor: analysis.minor_p,
            },
            scoring.clone(),
        )
    }

    pub fn test_name(&self) -> &'static str {
        self.test.name()
    }

    pub fn analyze(
        &self,
        employee_ids: &BTreeSet<EmployeeId>,
        ratings: &RatingChangeLog,
        roster: &RosterStore,
        dimensions: &[Dimension],
    ) -> AnalysisResult {
        let members: Vec<&EmployeeId> = employee_ids
            .iter()
            .filter(|id| roster.contains(id))
            .collect();
        let overall = stats::distribution(members.iter().copied(), ratings);
        let proportions = overall.proportions();

        let mut anomalies = Vec::new();
        let mut insufficient_data = Vec::new();
        let mut groups_tested = 0;

        for &dimension in dimensions {
            let groups = stats::group_members(members.iter().copied(), ratings, dimension);
            for (group_key, group_ids) in groups {
                if group_key == UNASSIGNED_GROUP {
                    continue;
                }
                let actual = stats::distribution(&group_ids, ratings).counts();
                let size = group_ids.len() as f64;
                let expected = proportions.map(|share| share * size);
                let sample = GroupSample {
                    dimension,
                    group_key: &group_key,
                    actual,
                    expected,
                };

                match self.test.evaluate(&sample) {
                    GroupVerdict::InsufficientData { reason } => {
                        insufficient_data.push(InsufficientData {
                            dimension,
                            group_key: group_key.clone(),
                            group_size: group_ids.len(),
                            reason,
                        });
                    }
                    GroupVerdict::Tested { statistic, p_value } => {
                        groups_tested += 1;
                        let Some(severity) = self.thresholds.classify(p_value) else {
                            continue;
                        };
                        let focus = focus_cell(&actual, &expected);
                        anomalies.push(AnomalyRecord {
                            dimension,
                            group_key: group_key.clone(),
                            group_size: group_ids.len(),
                            focus_position: focus,
                            expected_count: expected[focus.index()],
                            actual_count: actual[focus.index()],
                            chi_square: statistic,
                            p_value,
                            severity,
                            affected_employee_ids: group_ids,
                            actual,
                            expected,
                        });
                    }
                }
            }
        }

        anomalies.sort_by(|a, b| {
            a.p_value
                .total_cmp(&b.p_value)
                .then_with(|| a.dimension.cmp(&b.dimension))
                .then_with(|| a.group_key.cmp(&b.group_key))
        });

        let population = members.len();
        let quality_score = quality_score(&anomalies, population, &self.scoring);

        tracing::info!(
            test = self.test.name(),
            population,
            groups_tested,
            anomalies = anomalies.len(),
            skipped = insufficient_data.len(),
            quality_score,
            "bias analysis complete"
        );

        AnalysisResult {
            quality_score,
            population,
            groups_tested,
            anomalies,
            insufficient_data,
        }
    }
}

/// The box with the largest standardized residual.
fn focus_cell(actual: &[usize; 9], expected: &[f64; 9]) -> GridPosition {
    let mut best_index = 0;
    let mut best_residual = f64::NEG_INFINITY;
    for (index, (a, e)) in actual.iter().zip(expected).enumerate() {
        if *e <= 0.0 {
            continue;
        }
        let residual = ((*a as f64 - e) / e.sqrt()).abs();
        if residual > best_residual {
            best_residual = residual;
            best_index = index;
        }
    }
    GridPosition::from_index(best_index).unwrap_or(GridPosition::CENTER)
}

/// 100 minus the summed anomaly penalties, floored at 0.
pub fn quality_score(
    anomalies: &[AnomalyRecord],
    population: usize,
    scoring: &ScoringConfig,
) -> f64 {
    if population == 0 {
        return 100.0;
    }
    let penalty: f64 = anomalies
        .iter()
        .map(|anomaly| {
            let weight = match anomaly.severity {
                Severity::Critical => scoring.critical_weight,
                Severity::Moderate => scoring.moderate_weight,
                Severity::Minor => scoring.minor_weight,
            };
            let coverage = anomaly.affected_employee_ids.len() as f64 / population as f64;
            weight * (1.0 + scoring.coverage_factor * coverage.min(1.0))
        })
        .sum();
    (100.0 - penalty).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating::{self, High, Low, Medium};
    use crate::testkit::{id, roster, Person};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn default_engine() -> IntelligenceEngine {
        IntelligenceEngine::chi_square(&AnalysisConfig::default(), &ScoringConfig::default())
    }

    fn close(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() < tolerance
    }

    /// Closed form for even degrees of freedom.
    fn even_df_survival(x: f64, df: u32) -> f64 {
        let half = x / 2.0;
        let mut term = 1.0;
        let mut sum = 1.0;
        for k in 1..(df / 2) {
            term *= half / k as f64;
            sum += term;
        }
        (-half).exp() * sum
    }

    #[test]
    fn survival_matches_critical_values_for_eight_df() {
        assert!(close(chi_square_survival(13.362, 8), 0.10, 1e-3));
        assert!(close(chi_square_survival(15.507, 8), 0.05, 1e-3));
        assert!(close(chi_square_survival(20.090, 8), 0.01, 1e-3));
        assert_eq!(chi_square_survival(0.0, 8), 1.0);
    }

    #[test]
    fn survival_matches_closed_form() {
        for x in [0.5, 3.0, 7.9, 8.0, 12.5, 30.0, 80.0] {
            for df in [2, 4, 8] {
                let expected = even_df_survival(x, df);
                let got = chi_square_survival(x, df);
                assert!(close(got, expected, 1e-9), "x={x} df={df}: {got} vs {expected}");
            }
        }
    }

    #[test]
    fn severity_cutoffs_are_half_open() {
        let thresholds = SeverityThresholds::default();
        assert_eq!(thresholds.classify(0.0099), Some(Severity::Critical));
        assert_eq!(thresholds.classify(0.01), Some(Severity::Moderate));
        assert_eq!(thresholds.classify(0.0499), Some(Severity::Moderate));
        assert_eq!(thresholds.classify(0.05), Some(Severity::Minor));
        assert_eq!(thresholds.classify(0.0999), Some(Severity::Minor));
        assert_eq!(thresholds.classify(0.10), None);
    }

    #[test]
    fn tiny_groups_are_insufficient() {
        let test = ChiSquareTest::default();
        let mut actual = [0; 9];
        actual[4] = 1;
        let verdict = test.evaluate(&GroupSample {
            dimension: Dimension::Manager,
            group_key: "m",
            actual,
            expected: [1.0 / 9.0; 9],
        });
        assert!(matches!(verdict, GroupVerdict::InsufficientData { .. }));
    }

    #[test]
    fn low_expected_cells_are_insufficient() {
        let test = ChiSquareTest::default();
        let mut actual = [0; 9];
        actual[8] = 4;
        let verdict = test.evaluate(&GroupSample {
            dimension: Dimension::Manager,
            group_key: "m",
            actual,
            expected: [4.0 / 9.0; 9],
        });
        assert!(matches!(verdict, GroupVerdict::InsufficientData { .. }));
    }

    fn anomaly(severity: Severity, affected: usize) -> AnomalyRecord {
        AnomalyRecord {
            dimension: Dimension::Manager,
            group_key: "m".to_string(),
            group_size: affected,
            focus_position: GridPosition::CENTER,
            expected_count: 1.0,
            actual_count: 3,
            chi_square: 30.0,
            p_value: 0.001,
            severity,
            affected_employee_ids: (0..affected).map(|i| id(&i.to_string())).collect(),
            actual: [0; 9],
            expected: [0.0; 9],
        }
    }

    #[test]
    fn quality_score_boundaries() {
        let scoring = ScoringConfig::default();
        assert_eq!(quality_score(&[], 200, &scoring), 100.0);
        assert!(quality_score(&[], 200, &scoring) >= 90.0);

        let quarter = quality_score(&[anomaly(Severity::Critical, 50)], 200, &scoring);
        assert!(close(quarter, 40.0, 1e-9));
        assert!(quarter < 50.0);

        let minor = quality_score(&[anomaly(Severity::Minor, 4)], 200, &scoring);
        assert!(close(minor, 94.6, 1e-9));
    }

    #[test]
    fn broad_anomalies_cost_more_than_narrow_ones() {
        let scoring = ScoringConfig::default();
        let narrow = quality_score(&[anomaly(Severity::Moderate, 4)], 200, &scoring);
        let broad = quality_score(&[anomaly(Severity::Moderate, 100)], 200, &scoring);
        assert!(broad < narrow);

        let one = quality_score(&[anomaly(Severity::Minor, 4)], 200, &scoring);
        let two = quality_score(
            &[anomaly(Severity::Minor, 4), anomaly(Severity::Minor, 4)],
            200,
            &scoring,
        );
        assert!(two < one);
        assert_eq!(
            quality_score(&vec![anomaly(Severity::Critical, 200); 5], 200, &scoring),
            0.0
        );
    }

    /// 9 employees per box under "pool" plus a manager "m" with one per box
    /// and `extra_stars` taken from the pool's High/High box.
    fn skewed_org(extra_stars: usize) -> RatingChangeLog {
        let mut people = Vec::new();
        let mut next = 0;
        let mut push =
            |people: &mut Vec<Person>, performance: Rating, potential: Rating, manager: &str| {
                let person = Person::new(&format!("e{next}"), performance, potential);
                people.push(person.manager(manager));
                next += 1;
            };
        for position in GridPosition::all() {
            push(&mut people, position.performance, position.potential, "m");
            let pool_count = if position == GridPosition::new(High, High) {
                10 - extra_stars
            } else {
                10
            };
            for _ in 0..pool_count {
                push(&mut people, position.performance, position.potential, "pool");
            }
        }
        for _ in 0..extra_stars {
            push(&mut people, High, High, "m");
        }
        RatingChangeLog::new(Arc::new(roster(people)))
    }

    fn manager_p_value(extra_stars: usize) -> f64 {
        let ratings = skewed_org(extra_stars);
        let roster = ratings.roster_handle();
        let ids: BTreeSet<EmployeeId> = roster.ids().cloned().collect();
        let engine = default_engine();
        let sample_ids = stats::group_members(&ids, &ratings, Dimension::Manager);
        let group = &sample_ids["m"];
        let actual = stats::distribution(group, &ratings).counts();
        let proportions = stats::distribution(&ids, &ratings).proportions();
        let expected = proportions.map(|share| share * group.len() as f64);
        match engine.test.evaluate(&GroupSample {
            dimension: Dimension::Manager,
            group_key: "m",
            actual,
            expected,
        }) {
            GroupVerdict::Tested { p_value, .. } => p_value,
            GroupVerdict::InsufficientData { reason } => panic!("unexpectedly skipped: {reason}"),
        }
    }

    #[test]
    fn stacked_manager_is_flagged() {
        let ratings = skewed_org(10);
        let roster = ratings.roster_handle();
        let ids: BTreeSet<EmployeeId> = roster.ids().cloned().collect();
        let engine = default_engine();
        let result = engine.analyze(&ids, &ratings, &roster, &[Dimension::Manager]);

        assert_eq!(result.population, 99);
        let flagged = result
            .anomalies
            .iter()
            .find(|a| a.group_key == "m")
            .expect("manager m should be flagged");
        assert_eq!(flagged.severity, Severity::Critical);
        assert_eq!(flagged.focus_position, GridPosition::new(High, High));
        assert_eq!(flagged.actual_count, 11);
        assert_eq!(flagged.affected_employee_ids.len(), 19);
        assert!(result.quality_score < 100.0);
    }

    #[test]
    fn proportional_groups_are_not_reported() {
        let ratings = skewed_org(0);
        let roster = ratings.roster_handle();
        let ids: BTreeSet<EmployeeId> = roster.ids().cloned().collect();
        let engine = default_engine();
        let dimensions = [Dimension::Manager, Dimension::Location];
        let result = engine.analyze(&ids, &ratings, &roster, &dimensions);
        assert!(result.anomalies.is_empty());
        assert_eq!(result.groups_tested, 2);
        assert_eq!(result.quality_score, 100.0);
    }

    #[test]
    fn small_groups_are_reported_as_insufficient_not_anomalous() {
        let ratings = RatingChangeLog::new(Arc::new(roster(vec![
            Person::new("1", High, High).location("NYC"),
            Person::new("2", Low, Low).location("LDN"),
            Person::new("3", Low, Low).location("LDN"),
            Person::new("4", Medium, Medium).location("LDN"),
        ])));
        let roster = ratings.roster_handle();
        let ids: BTreeSet<EmployeeId> = roster.ids().cloned().collect();
        let engine = default_engine();
        let result = engine.analyze(&ids, &ratings, &roster, &[Dimension::Location]);
        assert!(result.anomalies.is_empty());
        assert_eq!(result.insufficient_data.len(), 2);
        assert_eq!(result.groups_tested, 0);
    }

    #[test]
    fn empty_population_scores_perfectly() {
        let ratings = skewed_org(0);
        let roster = ratings.roster_handle();
        let engine = default_engine();
        let result = engine.analyze(&BTreeSet::new(), &ratings, &roster, &Dimension::ALL);
        assert_eq!(result.population, 0);
        assert!(result.anomalies.is_empty());
        assert_eq!(result.quality_score, 100.0);
    }

    proptest! {
        /// Moving more High/High employees under one manager, with the org-wide
        /// distribution unchanged, never makes that manager look less biased.
        #[test]
        fn stacking_stars_never_lowers_significance(a in 0usize..=10, b in 0usize..=10) {
            let (fewer, more) = if a <= b { (a, b) } else { (b, a) };
            let p_fewer = manager_p_value(fewer);
            let p_more = manager_p_value(more);
            prop_assert!(p_more <= p_fewer + 1e-12, "p({more})={p_more} > p({fewer})={p_fewer}");
            let thresholds = SeverityThresholds::default();
            let rank = |p: f64| thresholds.classify(p).map(|s| 3 - s as u8).unwrap_or(0);
            prop_assert!(rank(p_more) >= rank(p_fewer));
        }
    }
}
