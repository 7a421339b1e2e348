use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ninebox_calibration::config::CalibrationConfig;
use ninebox_calibration::import::{self, ImportSettings};
use ninebox_calibration::intelligence::IntelligenceEngine;
use ninebox_calibration::intents::IntentQueue;
use ninebox_calibration::jobs::JobQueue;
use ninebox_calibration::models::{Dimension, GridPosition};
use ninebox_calibration::report;
use ninebox_calibration::session::{Session, Workspace};

#[derive(Parser)]
#[command(name = "ninebox")]
#[command(
    about = "9-box talent calibration: distribution, bias analysis and annotated export",
    long_about = None
)]
struct Cli {
    /// TOML settings file (falls back to NINEBOX_CONFIG, then defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the 9-box distribution of a roster
    Summary {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run the chi-square bias analysis
    Analyze {
        #[arg(long)]
        input: PathBuf,
        /// Intent script replayed before analysis
        #[arg(long)]
        moves: Option<PathBuf>,
        /// Grouping dimensions (defaults to the configured set)
        #[arg(long = "dimension")]
        dimensions: Vec<Dimension>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Replay an intent script and write the annotated roster
    Apply {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        moves: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Generate a markdown calibration report
    Report {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        moves: Option<PathBuf>,
        #[arg(long, default_value = "calibration-report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ninebox=info,ninebox_calibration=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = CalibrationConfig::resolve(cli.config.as_deref())
        .context("failed to load configuration")?;
    let jobs = JobQueue::new();
    let mut workspace = Workspace::new(ImportSettings::from_config(&config.import));

    match cli.command {
        Commands::Summary { input, json } => {
            let session = open_session(&mut workspace, &jobs, &input, None).await?;
            let view = session.view();

            if json {
                println!("{}", serde_json::to_string_pretty(&view.statistics)?);
                return Ok(());
            }

            println!("{} employees from {}:", view.counters.total, input.display());
            for number in (1..=9).rev() {
                let Some(position) = GridPosition::from_number(number) else {
                    continue;
                };
                let cell = view.statistics.cell(position);
                println!(
                    "- {} {} ({}): {} ({:.1}%)",
                    number,
                    position.label(),
                    position,
                    cell.count,
                    cell.percentage
                );
            }
        }
        Commands::Analyze {
            input,
            moves,
            dimensions,
            limit,
            json,
        } => {
            let session = open_session(&mut workspace, &jobs, &input, moves.as_deref()).await?;
            let snapshot = session.snapshot();
            let dimensions = if dimensions.is_empty() {
                config.analysis.dimensions.clone()
            } else {
                dimensions
            };
            let analysis_config = config.analysis.clone();
            let scoring = config.scoring.clone();
            let analysis = jobs
                .run("analyze", move || {
                    let engine = IntelligenceEngine::chi_square(&analysis_config, &scoring);
                    snapshot.analyze(&engine, &dimensions)
                })
                .await?
                .completed()
                .context("analysis was superseded")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
                return Ok(());
            }

            println!(
                "Quality score {:.1} across {} employees ({} groups tested, {} too small).",
                analysis.quality_score,
                analysis.population,
                analysis.groups_tested,
                analysis.insufficient_data.len()
            );
            if analysis.anomalies.is_empty() {
                println!("No distribution anomalies detected.");
                return Ok(());
            }

            println!("Most significant anomalies:");
            for anomaly in analysis.anomalies.iter().take(limit) {
                println!(
                    "- [{}] {} {}: {} of {} in {} vs {:.1} expected (p={:.4})",
                    anomaly.severity.as_str(),
                    anomaly.dimension,
                    anomaly.group_key,
                    anomaly.actual_count,
                    anomaly.group_size,
                    anomaly.focus_position.label(),
                    anomaly.expected_count,
                    anomaly.p_value
                );
            }
        }
        Commands::Apply { input, moves, out } => {
            let session =
                open_session(&mut workspace, &jobs, &input, Some(moves.as_path())).await?;
            let net_changes = session.ratings().count();
            let donuts = session.donuts().count();
            let snapshot = session.snapshot();
            let bytes = jobs
                .run("export", move || snapshot.export())
                .await?
                .completed()
                .context("export was superseded")?
                .context("failed to export session")?;
            std::fs::write(&out, bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Export written to {} ({net_changes} net changes, {donuts} donut placements).",
                out.display()
            );
        }
        Commands::Report { input, moves, out } => {
            let session = open_session(&mut workspace, &jobs, &input, moves.as_deref()).await?;
            let snapshot = session.snapshot();
            let dimensions = config.analysis.dimensions.clone();
            let analysis_config = config.analysis.clone();
            let scoring = config.scoring.clone();
            let report = jobs
                .run("report", move || {
                    let engine = IntelligenceEngine::chi_square(&analysis_config, &scoring);
                    let analysis = snapshot.analyze(&engine, &dimensions);
                    report::build_report(&snapshot, &analysis)
                })
                .await?
                .completed()
                .context("report was superseded")?;
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

/// Imports `input` on the blocking pool, installs it as the workspace session
/// and replays `moves` if given.
async fn open_session<'w>(
    workspace: &'w mut Workspace,
    jobs: &JobQueue,
    input: &Path,
    moves: Option<&Path>,
) -> anyhow::Result<&'w mut Session> {
    let bytes =
        std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let settings = *workspace.settings();
    let roster = jobs
        .run("import", move || import::parse(&bytes, &settings))
        .await?
        .completed()
        .context("import was superseded")?
        .with_context(|| format!("failed to import {}", input.display()))?;

    for warning in roster.cycle_warnings() {
        eprintln!("warning: {warning}");
    }

    let session = workspace.install(roster, &input.display().to_string(), Utc::now());

    if let Some(moves) = moves {
        let script = std::fs::read(moves)
            .with_context(|| format!("failed to read {}", moves.display()))?;
        let mut queue = IntentQueue::from_script(&script)
            .with_context(|| format!("failed to parse intent script {}", moves.display()))?;
        let total = queue.len();
        let failures = queue.run(session, Utc::now());
        for failure in &failures {
            eprintln!("line {}: {}", failure.line, failure.error);
        }
        println!(
            "Applied {} of {} intents from {}.",
            total - failures.len(),
            total,
            moves.display()
        );
    }

    Ok(session)
}
