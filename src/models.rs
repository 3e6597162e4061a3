//! Core data model for heart-rate-recovery analysis
//!
//! A session is an ordered stream of [`Sample`]s. Detection produces
//! ephemeral [`Candidate`]s; the pipeline turns the surviving candidates
//! into [`RecoveryInterval`] records, which are the unit persisted to the
//! result sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed post-onset delays (seconds) at which HR drop is reported.
pub const CHECKPOINT_DELAYS: [u32; 5] = [60, 120, 180, 240, 300];

/// A single heart-rate sample within one session.
///
/// Offsets are seconds from session start and must be strictly increasing;
/// the stream is immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds from session start
    pub offset_seconds: u32,

    /// Heart rate in beats per minute
    pub heart_rate: u16,

    /// Recording device or export tag, when known
    pub source: Option<String>,
}

impl Sample {
    pub fn new(offset_seconds: u32, heart_rate: u16) -> Self {
        Sample {
            offset_seconds,
            heart_rate,
            source: None,
        }
    }
}

/// Which detection strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorOrigin {
    /// Prominence-based sharp local maximum
    Peak,
    /// Valley scan with backtracking to the most recent elevated maximum
    Valley,
}

impl DetectorOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorOrigin::Peak => "peak",
            DetectorOrigin::Valley => "valley",
        }
    }
}

impl fmt::Display for DetectorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DetectorOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "peak" => Ok(DetectorOrigin::Peak),
            "valley" => Ok(DetectorOrigin::Valley),
            _ => Err(format!("Invalid detector origin: {}", s)),
        }
    }
}

/// A detected recovery onset, produced and consumed within one run.
///
/// `onset_index` points at the first sample of the local maximum (for a
/// flat-topped maximum, the first sample of the plateau). Onset adjustment
/// later moves the start to the end of that plateau.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Index into the session's sample slice
    pub onset_index: usize,

    /// Heart rate at the local maximum
    pub peak_hr: u16,

    /// Detection strategy that found this candidate
    pub origin: DetectorOrigin,
}

/// HR drop at one fixed post-onset delay.
///
/// All value fields are `None` when the checkpoint lies beyond the interval
/// or no sample lands close enough to it — never fabricated as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Seconds after the adjusted onset
    pub delay_seconds: u32,

    /// Heart rate at the checkpoint
    pub heart_rate: Option<u16>,

    /// Drop from peak HR in bpm (negative if HR rose back above peak)
    pub absolute_drop: Option<i32>,

    /// Drop from peak HR as a percentage of peak
    pub percent_drop: Option<f64>,
}

impl Checkpoint {
    /// A checkpoint with no value, recorded for delays the interval
    /// cannot cover.
    pub fn unavailable(delay_seconds: u32) -> Self {
        Checkpoint {
            delay_seconds,
            heart_rate: None,
            absolute_drop: None,
            percent_drop: None,
        }
    }
}

/// Exponential-decay fit outcome for one configured sub-window.
///
/// `tau` and `r_squared` are `None` when the window does not fit inside the
/// interval, holds too few samples, or the solver failed to converge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFit {
    /// Configured window name (e.g. "0-30")
    pub window: String,

    /// Window start, seconds after adjusted onset
    pub start_offset: u32,

    /// Window end, seconds after adjusted onset
    pub end_offset: u32,

    /// Samples that fell inside the window
    pub sample_count: usize,

    /// Decay time constant in seconds, bounded to the configured range
    pub tau: Option<f64>,

    /// Coefficient of determination for the fit
    pub r_squared: Option<f64>,

    /// Whether the solver reported convergence
    pub converged: bool,
}

impl WindowFit {
    pub fn unavailable(window: &str, start_offset: u32, end_offset: u32, sample_count: usize) -> Self {
        WindowFit {
            window: window.to_string(),
            start_offset,
            end_offset,
            sample_count,
            tau: None,
            r_squared: None,
            converged: false,
        }
    }

    /// True when the window produced a usable R² value.
    pub fn is_computed(&self) -> bool {
        self.r_squared.is_some()
    }
}

/// Quality disposition for an interval, terminal per config version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    Pass,
    Flagged,
    Rejected,
}

impl QualityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityStatus::Pass => "pass",
            QualityStatus::Flagged => "flagged",
            QualityStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QualityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pass" => Ok(QualityStatus::Pass),
            "flagged" => Ok(QualityStatus::Flagged),
            "rejected" => Ok(QualityStatus::Rejected),
            _ => Err(format!("Invalid quality status: {}", s)),
        }
    }
}

/// Closed enumeration of reasons attached to non-pass intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// A required fit window's R² fell below its configured minimum
    LowR2Window,
    /// No fit window could be computed at all
    NoValidR2Windows,
    /// Adjusted start did not strictly follow the previous surviving
    /// interval, or the candidate lost a dedup collision
    OverlapDuplicate,
    /// Onset plateau exceeded the review threshold
    OnsetDelayReview,
    /// Earliest window's fit is poor while later windows pass
    EarlyWindowPoorFit,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::LowR2Window => "low_r2_window",
            ReasonCode::NoValidR2Windows => "no_valid_r2_windows",
            ReasonCode::OverlapDuplicate => "overlap_duplicate",
            ReasonCode::OnsetDelayReview => "onset_delay_review",
            ReasonCode::EarlyWindowPoorFit => "early_window_poor_fit",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_r2_window" => Ok(ReasonCode::LowR2Window),
            "no_valid_r2_windows" => Ok(ReasonCode::NoValidR2Windows),
            "overlap_duplicate" => Ok(ReasonCode::OverlapDuplicate),
            "onset_delay_review" => Ok(ReasonCode::OnsetDelayReview),
            "early_window_poor_fit" => Ok(ReasonCode::EarlyWindowPoorFit),
            _ => Err(format!("Invalid reason code: {}", s)),
        }
    }
}

/// One classified recovery interval — the output unit of the pipeline.
///
/// Created once, written once. Reclassification requires a full session
/// reprocess; records are never partially mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryInterval {
    /// Opaque session identifier
    pub session_id: String,

    /// 1-based position among the session's candidates, ordered by onset
    pub sequence: u32,

    /// Onset-adjusted start, seconds from session start
    pub start_offset: u32,

    /// Interval end, seconds from session start
    pub end_offset: u32,

    /// `end_offset - start_offset`
    pub duration_seconds: u32,

    /// Local-maximum heart rate at onset
    pub peak_hr: u16,

    /// HR drop at each fixed delay checkpoint
    pub checkpoints: Vec<Checkpoint>,

    /// Decay fits for each configured sub-window
    pub fits: Vec<WindowFit>,

    /// Quality disposition
    pub status: QualityStatus,

    /// Reason code when status is not `pass`
    pub reason: Option<ReasonCode>,

    /// Seconds the onset moved forward during plateau adjustment
    pub onset_delay_seconds: u32,

    /// Detection strategy that found the underlying candidate
    pub origin: DetectorOrigin,

    /// Hash of the configuration that produced this classification
    pub config_version: String,
}

/// Per-session classification counts for end-of-run reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: String,
    pub candidates_found: usize,
    pub passed: usize,
    pub flagged: usize,
    pub rejected: usize,
    pub rejected_by_reason: BTreeMap<String, usize>,
}

impl SessionReport {
    /// Tally counts from a session's final interval records.
    pub fn tally(session_id: &str, intervals: &[RecoveryInterval]) -> Self {
        let mut report = SessionReport {
            session_id: session_id.to_string(),
            candidates_found: intervals.len(),
            passed: 0,
            flagged: 0,
            rejected: 0,
            rejected_by_reason: BTreeMap::new(),
        };

        for interval in intervals {
            match interval.status {
                QualityStatus::Pass => report.passed += 1,
                QualityStatus::Flagged => report.flagged += 1,
                QualityStatus::Rejected => {
                    report.rejected += 1;
                    let reason = interval
                        .reason
                        .map(|r| r.as_str().to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    *report.rejected_by_reason.entry(reason).or_insert(0) += 1;
                }
            }
        }

        report
    }
}

/// Aggregated counts across a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub sessions_processed: usize,
    pub sessions_skipped: usize,
    pub sessions_failed: usize,
    pub candidates_found: usize,
    pub passed: usize,
    pub flagged: usize,
    pub rejected: usize,
    pub rejected_by_reason: BTreeMap<String, usize>,
}

impl BatchReport {
    pub fn absorb(&mut self, session: &SessionReport) {
        self.sessions_processed += 1;
        self.candidates_found += session.candidates_found;
        self.passed += session.passed;
        self.flagged += session.flagged;
        self.rejected += session.rejected;
        for (reason, count) in &session.rejected_by_reason {
            *self.rejected_by_reason.entry(reason.clone()).or_insert(0) += count;
        }
    }
}
