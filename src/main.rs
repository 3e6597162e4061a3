use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};

use hrrs::config::AnalysisConfig;
use hrrs::database::Database;
use hrrs::import::import_csv;
use hrrs::logging::{init_logging, LogConfig, LogLevel};
use hrrs::models::{BatchReport, RecoveryInterval, SessionReport};
use hrrs::pipeline::{analyze_sessions, SessionAnalysis};

/// hrrs - Heart Rate Recovery Analysis CLI
///
/// Detects and classifies heart-rate-recovery intervals in recorded
/// exercise sessions: prominence-based peak detection plus valley
/// backtracking, deterministic deduplication, bounded exponential-decay
/// fitting, and a configurable quality gate.
#[derive(Parser)]
#[command(name = "hrrs")]
#[command(version = "0.1.0")]
#[command(about = "Heart Rate Recovery Analysis CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file
    #[arg(long, value_name = "FILE", default_value = "hrrs.db")]
    db: PathBuf,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import heart-rate samples from a CSV file
    Import {
        /// CSV file with session_id,offset_seconds,heart_rate[,source] rows
        #[arg(short, long)]
        file: PathBuf,

        /// Calendar date to attach to the imported sessions (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Detect and classify recovery intervals for one session
    Process {
        /// Session identifier
        #[arg(short, long)]
        session: String,

        /// Classify and report without persisting anything
        #[arg(short, long)]
        preview: bool,
    },

    /// Process a range of sessions
    Batch {
        /// Date range start (YYYY-MM-DD)
        #[arg(short, long)]
        from: Option<NaiveDate>,

        /// Date range end (YYYY-MM-DD)
        #[arg(short, long)]
        to: Option<NaiveDate>,

        /// Reprocess sessions already classified under the current config
        #[arg(long)]
        force: bool,
    },

    /// Manage analysis configuration
    Config {
        /// Write a default configuration file
        #[arg(long)]
        init: bool,

        /// Print the active configuration
        #[arg(long)]
        show: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        level: LogLevel::from_verbosity(cli.verbose),
        ..LogConfig::default()
    };
    init_logging(&log_config)?;

    let config = load_config(cli.config.as_deref())?;
    // Any threshold problem is fatal before a single session is touched
    config.validate().map_err(|e| anyhow!("Invalid configuration: {e}"))?;

    match cli.command {
        Commands::Import { file, date } => {
            println!("{}", "Importing heart-rate samples...".green().bold());
            let mut db = Database::new(&cli.db)?;
            let summary = import_csv(&mut db, &file, date)?;
            println!(
                "{}",
                format!(
                    "✓ Imported {} samples across {} sessions",
                    summary.samples, summary.sessions
                )
                .green()
            );
        }

        Commands::Process { session, preview } => {
            let mut db = Database::new(&cli.db)?;
            run_single(&mut db, &config, &session, preview)?;
        }

        Commands::Batch { from, to, force } => {
            let mut db = Database::new(&cli.db)?;
            run_batch(&mut db, &config, from, to, force)?;
        }

        Commands::Config { init, show } => {
            if init {
                let path = cli
                    .config
                    .clone()
                    .unwrap_or_else(AnalysisConfig::default_config_path);
                let mut fresh = AnalysisConfig::default();
                fresh.save_to_file(&path)?;
                println!("{}", format!("✓ Wrote default config to {}", path.display()).green());
            }
            if show || !init {
                let rendered = toml::to_string_pretty(&config)
                    .context("Failed to render configuration")?;
                println!("{}", format!("# config version {}", config.version_hash()).dimmed());
                println!("{rendered}");
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => AnalysisConfig::load_from_file(path),
        None => {
            let default_path = AnalysisConfig::default_config_path();
            if default_path.exists() {
                AnalysisConfig::load_from_file(default_path)
            } else {
                Ok(AnalysisConfig::default())
            }
        }
    }
}

fn run_single(db: &mut Database, config: &AnalysisConfig, session: &str, preview: bool) -> Result<()> {
    let banner = if preview {
        "Classifying session (preview)..."
    } else {
        "Classifying session..."
    };
    println!("{}", banner.blue().bold());

    let samples = db.load_samples(session)?;
    let worker = worker_id();

    if !preview && !db.try_claim(session, &worker)? {
        bail!("Session {session} is claimed by another worker");
    }

    match hrrs::pipeline::analyze_session(session, &samples, config) {
        Ok(analysis) => {
            render_intervals(&analysis.intervals);
            render_session_report(&analysis.report);

            if preview {
                println!("{}", "Preview only: nothing was persisted".yellow());
            } else {
                db.replace_intervals(session, &analysis.intervals, &config.version_hash())?;
                db.release_claim(session, &worker)?;
                println!("{}", "✓ Session results committed".blue());
            }
        }
        Err(err) => {
            if !preview {
                db.mark_failed(session, &err.to_string())?;
                db.release_claim(session, &worker)?;
            }
            bail!("Session {session} skipped: {err}");
        }
    }

    Ok(())
}

fn run_batch(
    db: &mut Database,
    config: &AnalysisConfig,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    force: bool,
) -> Result<()> {
    println!("{}", "Processing session batch...".blue().bold());

    let config_version = config.version_hash();
    let worker = worker_id();
    let sessions = db.list_sessions(from, to)?;
    let mut report = BatchReport::default();

    // Claim and load up front; analysis itself is pure and runs in parallel
    let mut workload: Vec<(String, Vec<hrrs::models::Sample>)> = Vec::new();
    for session in &sessions {
        if !force && session.processed_config_version.as_deref() == Some(config_version.as_str()) {
            tracing::debug!(session_id = %session.id, "Already processed under this config");
            report.sessions_skipped += 1;
            continue;
        }
        if !db.try_claim(&session.id, &worker)? {
            tracing::warn!(session_id = %session.id, "Claimed by another worker, skipping");
            report.sessions_skipped += 1;
            continue;
        }
        workload.push((session.id.clone(), db.load_samples(&session.id)?));
    }

    let outcomes = analyze_sessions(&workload, config);

    let progress = ProgressBar::new(outcomes.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    for (session_id, outcome) in outcomes {
        progress.set_message(session_id.clone());
        match outcome {
            Ok(SessionAnalysis { intervals, report: session_report }) => {
                db.replace_intervals(&session_id, &intervals, &config_version)?;
                report.absorb(&session_report);
            }
            Err(err) => {
                tracing::warn!(session_id = %session_id, error = %err, "Session skipped");
                db.mark_failed(&session_id, &err.to_string())?;
                report.sessions_failed += 1;
            }
        }
        db.release_claim(&session_id, &worker)?;
        progress.inc(1);
    }
    progress.finish_and_clear();

    render_batch_report(&report);
    println!("{}", "✓ Batch completed".blue());
    Ok(())
}

fn worker_id() -> String {
    format!("hrrs-{}", uuid::Uuid::new_v4())
}

#[derive(Tabled)]
struct IntervalRow {
    #[tabled(rename = "Seq")]
    sequence: u32,
    #[tabled(rename = "Start (s)")]
    start: u32,
    #[tabled(rename = "Duration (s)")]
    duration: u32,
    #[tabled(rename = "Peak HR")]
    peak_hr: u16,
    #[tabled(rename = "Origin")]
    origin: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn render_intervals(intervals: &[RecoveryInterval]) {
    if intervals.is_empty() {
        println!("{}", "No recovery candidates detected".dimmed());
        return;
    }

    let rows: Vec<IntervalRow> = intervals
        .iter()
        .map(|interval| IntervalRow {
            sequence: interval.sequence,
            start: interval.start_offset,
            duration: interval.duration_seconds,
            peak_hr: interval.peak_hr,
            origin: interval.origin.to_string(),
            status: interval.status.to_string(),
            reason: interval
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

#[derive(Tabled)]
struct CountRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Count")]
    count: usize,
}

fn count_rows(
    found: usize,
    passed: usize,
    flagged: usize,
    rejected: usize,
    by_reason: &BTreeMap<String, usize>,
) -> Vec<CountRow> {
    let mut rows = vec![
        CountRow { metric: "Candidates found".to_string(), count: found },
        CountRow { metric: "Passed".to_string(), count: passed },
        CountRow { metric: "Flagged".to_string(), count: flagged },
        CountRow { metric: "Rejected".to_string(), count: rejected },
    ];
    for (reason, count) in by_reason {
        rows.push(CountRow {
            metric: format!("  rejected: {reason}"),
            count: *count,
        });
    }
    rows
}

fn render_session_report(report: &SessionReport) {
    let rows = count_rows(
        report.candidates_found,
        report.passed,
        report.flagged,
        report.rejected,
        &report.rejected_by_reason,
    );
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn render_batch_report(report: &BatchReport) {
    println!(
        "{}",
        format!(
            "Sessions: {} processed, {} skipped, {} failed",
            report.sessions_processed, report.sessions_skipped, report.sessions_failed
        )
        .bold()
    );
    let rows = count_rows(
        report.candidates_found,
        report.passed,
        report.flagged,
        report.rejected,
        &report.rejected_by_reason,
    );
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
