//! Per-session orchestration
//!
//! Runs the full pipeline for one session as a chain of pure
//! transformations: validate → detect (both detectors, concurrently) →
//! merge → adjust onsets → extract features → gate. Each stage produces a
//! new immutable sequence, so any stage can be replayed in isolation.
//!
//! The pipeline performs no IO and consults no clock or randomness:
//! identical samples and config always reproduce identical records.

use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::detect::{Detect, PeakDetector, ValleyDetector};
use crate::error::SessionError;
use crate::features::{extract_features, ExtractedInterval};
use crate::fit::{DecaySolver, LmDecaySolver};
use crate::gate::QualityGate;
use crate::merge::{adjust_onsets, merge_candidates};
use crate::models::{
    Candidate, QualityStatus, ReasonCode, RecoveryInterval, Sample, SessionReport,
};

/// Heart rates outside this range mark a sample stream as malformed.
const MIN_PLAUSIBLE_HR: u16 = 25;
const MAX_PLAUSIBLE_HR: u16 = 250;

/// The classified output of one session run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionAnalysis {
    pub intervals: Vec<RecoveryInterval>,
    pub report: SessionReport,
}

/// Run the full pipeline for one session with the default solver.
pub fn analyze_session(
    session_id: &str,
    samples: &[Sample],
    config: &AnalysisConfig,
) -> Result<SessionAnalysis, SessionError> {
    analyze_session_with(session_id, samples, config, &LmDecaySolver)
}

/// Run the full pipeline for one session with an explicit solver.
pub fn analyze_session_with(
    session_id: &str,
    samples: &[Sample],
    config: &AnalysisConfig,
    solver: &dyn DecaySolver,
) -> Result<SessionAnalysis, SessionError> {
    validate_samples(session_id, samples)?;

    // The detectors are independent and order-free
    let (peaks, valleys) = rayon::join(
        || PeakDetector.detect(samples, config),
        || ValleyDetector.detect(samples, config),
    );

    tracing::debug!(
        session_id,
        peak_candidates = peaks.len(),
        valley_candidates = valleys.len(),
        "Detection complete"
    );

    let merged = merge_candidates(samples, peaks, valleys, config.merge.dedup_tolerance_seconds);
    let adjusted = adjust_onsets(samples, &merged.kept);
    let extracted = extract_features(samples, &adjusted, config, solver);
    let verdicts = QualityGate::new(config).classify(&extracted);

    let config_version = config.version_hash();
    let intervals = assemble_records(
        session_id,
        samples,
        extracted,
        verdicts,
        merged.superseded,
        &config_version,
    );

    let report = SessionReport::tally(session_id, &intervals);
    tracing::info!(
        session_id,
        candidates = report.candidates_found,
        passed = report.passed,
        flagged = report.flagged,
        rejected = report.rejected,
        "Session classified"
    );

    Ok(SessionAnalysis { intervals, report })
}

/// Analyze many sessions in parallel; each result stands alone.
pub fn analyze_sessions(
    sessions: &[(String, Vec<Sample>)],
    config: &AnalysisConfig,
) -> Vec<(String, Result<SessionAnalysis, SessionError>)> {
    sessions
        .par_iter()
        .map(|(session_id, samples)| {
            let analysis = analyze_session(session_id, samples, config);
            (session_id.clone(), analysis)
        })
        .collect()
}

/// Reject streams the pipeline cannot reason about: empty, non-monotonic,
/// or with implausible values. The caller skips the session and continues.
pub fn validate_samples(session_id: &str, samples: &[Sample]) -> Result<(), SessionError> {
    if samples.is_empty() {
        return Err(SessionError::Empty {
            session_id: session_id.to_string(),
        });
    }

    for (index, pair) in samples.windows(2).enumerate() {
        if pair[1].offset_seconds <= pair[0].offset_seconds {
            return Err(SessionError::NonMonotonic {
                session_id: session_id.to_string(),
                index: index + 1,
            });
        }
    }

    for (index, sample) in samples.iter().enumerate() {
        if sample.heart_rate < MIN_PLAUSIBLE_HR || sample.heart_rate > MAX_PLAUSIBLE_HR {
            return Err(SessionError::Malformed {
                session_id: session_id.to_string(),
                index,
                reason: format!("heart rate {} bpm out of range", sample.heart_rate),
            });
        }
    }

    Ok(())
}

/// Turn gated intervals and superseded duplicates into the session's final
/// records, sequence-numbered over every candidate in onset order.
fn assemble_records(
    session_id: &str,
    samples: &[Sample],
    extracted: Vec<ExtractedInterval>,
    verdicts: Vec<(QualityStatus, Option<ReasonCode>)>,
    superseded: Vec<Candidate>,
    config_version: &str,
) -> Vec<RecoveryInterval> {
    let mut records: Vec<RecoveryInterval> = extracted
        .into_iter()
        .zip(verdicts)
        .map(|(interval, (status, reason))| RecoveryInterval {
            session_id: session_id.to_string(),
            sequence: 0,
            start_offset: interval.start_offset,
            end_offset: interval.end_offset,
            duration_seconds: interval.duration_seconds(),
            peak_hr: interval.candidate.peak_hr,
            checkpoints: interval.checkpoints,
            fits: interval.fits,
            status,
            reason,
            onset_delay_seconds: interval.onset_delay_seconds,
            origin: interval.candidate.origin,
            config_version: config_version.to_string(),
        })
        .collect();

    // Superseded duplicates keep their identity for audit but carry no
    // features: they never reached extraction.
    for candidate in superseded {
        let onset_offset = samples[candidate.onset_index].offset_seconds;
        records.push(RecoveryInterval {
            session_id: session_id.to_string(),
            sequence: 0,
            start_offset: onset_offset,
            end_offset: onset_offset,
            duration_seconds: 0,
            peak_hr: candidate.peak_hr,
            checkpoints: Vec::new(),
            fits: Vec::new(),
            status: QualityStatus::Rejected,
            reason: Some(ReasonCode::OverlapDuplicate),
            onset_delay_seconds: 0,
            origin: candidate.origin,
            config_version: config_version.to_string(),
        });
    }

    records.sort_by_key(|r| (r.start_offset, r.status == QualityStatus::Rejected, r.peak_hr));
    for (i, record) in records.iter_mut().enumerate() {
        record.sequence = (i + 1) as u32;
    }
    records
}
