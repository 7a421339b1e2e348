use std::fmt::Write;

use crate::intelligence::AnalysisResult;
use crate::models::{ChangeDirection, GridPosition, NetChange, Severity};
use crate::session::SessionSnapshot;
use crate::stats;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectionSummary {
    pub direction: ChangeDirection,
    pub count: usize,
    pub with_notes: usize,
}

pub fn summarize_by_direction(changes: &[NetChange]) -> Vec<DirectionSummary> {
    let mut map: std::collections::HashMap<ChangeDirection, (usize, usize)> =
        std::collections::HashMap::new();

    for change in changes {
        let entry = map.entry(change.direction).or_insert((0, 0));
        entry.0 += 1;
        if change.note.is_some() {
            entry.1 += 1;
        }
    }

    let mut summaries: Vec<DirectionSummary> = map
        .into_iter()
        .map(|(direction, (count, with_notes))| DirectionSummary {
            direction,
            count,
            with_notes,
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.direction.as_str().cmp(b.direction.as_str()))
    });
    summaries
}

pub fn build_report(snapshot: &SessionSnapshot, analysis: &AnalysisResult) -> String {
    let table = stats::distribution(&snapshot.visible, &snapshot.ratings);
    let changes = snapshot.ratings.net_changes();
    let summaries = summarize_by_direction(&changes);

    let mut output = String::new();

    let _ = writeln!(output, "# Talent Calibration Report");
    let _ = writeln!(
        output,
        "Source {} imported {} ({} of {} employees in view)",
        snapshot.source,
        snapshot.imported_at.format("%Y-%m-%d %H:%M UTC"),
        snapshot.visible.len(),
        snapshot.roster.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Distribution");

    if table.total == 0 {
        let _ = writeln!(output, "No employees in view.");
    } else {
        let _ = writeln!(output, "| Box | Label | Count | Share |");
        let _ = writeln!(output, "|---|---|---|---|");
        for number in (1..=9).rev() {
            let Some(position) = GridPosition::from_number(number) else {
                continue;
            };
            let cell = table.cell(position);
            let _ = writeln!(
                output,
                "| {} ({}) | {} | {} | {:.1}% |",
                number,
                position,
                position.label(),
                cell.count,
                cell.percentage
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rating Changes");

    if changes.is_empty() {
        let _ = writeln!(output, "No net rating changes this session.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} employees ({} with notes)",
                summary.direction.as_str(),
                summary.count,
                summary.with_notes
            );
        }
        let _ = writeln!(output);
        let _ = writeln!(output, "### Most Recent");
        for change in changes.iter().take(10) {
            let _ = write!(
                output,
                "- {} ({}) {} -> {}",
                change.name,
                change.employee_id,
                change.from.label(),
                change.to.label()
            );
            match &change.note {
                Some(note) => {
                    let _ = writeln!(output, ": {note}");
                }
                None => {
                    let _ = writeln!(output);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Donut Exploration");

    let donuts = snapshot.donuts.all_active();
    if donuts.is_empty() {
        let _ = writeln!(output, "No active donut placements.");
    } else {
        for entry in donuts {
            let name = snapshot
                .roster
                .get(&entry.employee_id)
                .map(|e| e.name.as_str())
                .unwrap_or("unknown");
            let _ = write!(output, "- {} ({}) {}", name, entry.employee_id, entry.description());
            match &entry.note {
                Some(note) => {
                    let _ = writeln!(output, ": {note}");
                }
                None => {
                    let _ = writeln!(output);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Calibration Quality");
    let _ = writeln!(
        output,
        "Quality score {:.1} across {} employees \
         ({} groups tested; {} critical, {} moderate, {} minor)",
        analysis.quality_score,
        analysis.population,
        analysis.groups_tested,
        analysis.count_by_severity(Severity::Critical),
        analysis.count_by_severity(Severity::Moderate),
        analysis.count_by_severity(Severity::Minor)
    );

    if analysis.anomalies.is_empty() {
        let _ = writeln!(output, "No distribution anomalies detected.");
    } else {
        for anomaly in analysis.anomalies.iter() {
            let _ = writeln!(
                output,
                "- [{}] {} {}: {} of {} in {} vs {:.1} expected (chi-square {:.2}, p={:.4})",
                anomaly.severity.as_str(),
                anomaly.dimension,
                anomaly.group_key,
                anomaly.actual_count,
                anomaly.group_size,
                anomaly.focus_position.label(),
                anomaly.expected_count,
                anomaly.chi_square,
                anomaly.p_value
            );
        }
    }

    if !analysis.insufficient_data.is_empty() {
        let _ = writeln!(
            output,
            "{} groups were too small to test.",
            analysis.insufficient_data.len()
        );
    }

    output
}
