//! CSV sample import
//!
//! Loads `(session_id, offset_seconds, heart_rate[, source])` rows into the
//! sink, grouped per session. Rows are stored in file order: ordering and
//! plausibility problems are input errors surfaced at analysis time, where
//! the offending session is skipped without aborting the batch.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::database::Database;
use crate::models::Sample;

#[derive(Debug, Deserialize)]
struct CsvRow {
    session_id: String,
    offset_seconds: u32,
    heart_rate: u16,
    #[serde(default)]
    source: Option<String>,
}

/// Outcome of one import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub sessions: usize,
    pub samples: usize,
}

/// Import a CSV file of heart-rate samples.
///
/// An optional calendar date is attached to every imported session so the
/// batch command can select them by range.
pub fn import_csv(db: &mut Database, path: &Path, date: Option<NaiveDate>) -> Result<ImportSummary> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let mut by_session: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    let mut total_samples = 0usize;

    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.with_context(|| format!("Malformed CSV row {}", line + 2))?;
        by_session.entry(row.session_id).or_default().push(Sample {
            offset_seconds: row.offset_seconds,
            heart_rate: row.heart_rate,
            source: row.source,
        });
        total_samples += 1;

        if total_samples % 1000 == 0 {
            progress.set_message(format!("{} samples read", total_samples));
            progress.tick();
        }
    }

    let session_count = by_session.len();
    for (session_id, samples) in &by_session {
        db.store_session(session_id, date, samples)
            .with_context(|| format!("Failed to store session {}", session_id))?;
        tracing::info!(session_id, samples = samples.len(), "Session imported");
    }

    progress.finish_and_clear();
    Ok(ImportSummary {
        sessions: session_count,
        samples: total_samples,
    })
}
