//! Quality gate
//!
//! Classifies each feature-extracted interval as pass, flagged, or rejected
//! by walking a declarative, ordered rule list. Reject rules run before
//! flag rules; the first decisive rule supplies the reason code. The strict
//! ordering rule is cross-candidate and therefore evaluated against the
//! previous surviving interval while walking the session in onset order.
//!
//! A poor fit in the earliest window while every later window passes is
//! flagged rather than rejected: it historically marks genuine secondary
//! exertion at least as often as a detection artifact, and the ambiguity is
//! preserved as its own reason code instead of being resolved here.

use crate::config::AnalysisConfig;
use crate::features::ExtractedInterval;
use crate::models::{QualityStatus, ReasonCode};

/// One classification verdict.
pub type Verdict = (QualityStatus, Option<ReasonCode>);

/// Ordered rule list applied to every interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRule {
    /// Reject when a required window's R² misses its minimum
    RequiredWindowFit,
    /// Reject when no window could be computed at all
    NoComputableWindow,
    /// Reject when the adjusted start does not strictly follow the
    /// previous surviving interval's adjusted start
    StrictOrdering,
    /// Flag a poor earliest-window fit when later windows pass
    EarlyWindowReview,
    /// Flag onset delays beyond the review threshold
    OnsetDelayReview,
}

/// The configured gate for one run.
pub struct QualityGate<'a> {
    config: &'a AnalysisConfig,
    rules: Vec<GateRule>,
}

impl<'a> QualityGate<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        QualityGate {
            config,
            rules: vec![
                GateRule::RequiredWindowFit,
                GateRule::NoComputableWindow,
                GateRule::StrictOrdering,
                GateRule::EarlyWindowReview,
                GateRule::OnsetDelayReview,
            ],
        }
    }

    /// Classify a session's intervals, in onset order.
    ///
    /// Returns one verdict per interval. Pass and flagged intervals count
    /// as surviving for the ordering rule; rejected ones do not.
    pub fn classify(&self, intervals: &[ExtractedInterval]) -> Vec<Verdict> {
        let mut verdicts = Vec::with_capacity(intervals.len());
        let mut last_surviving_start: Option<u32> = None;

        for interval in intervals {
            let verdict = self
                .rules
                .iter()
                .find_map(|rule| self.apply(*rule, interval, last_surviving_start))
                .unwrap_or((QualityStatus::Pass, None));

            if verdict.0 != QualityStatus::Rejected {
                last_surviving_start = Some(interval.start_offset);
            }
            verdicts.push(verdict);
        }

        verdicts
    }

    fn apply(
        &self,
        rule: GateRule,
        interval: &ExtractedInterval,
        last_surviving_start: Option<u32>,
    ) -> Option<Verdict> {
        match rule {
            GateRule::RequiredWindowFit => {
                if self.only_earliest_window_failed(interval) {
                    // Deferred to EarlyWindowReview
                    return None;
                }
                let any_required_below = interval.fits.iter().any(|fit| {
                    self.window_required(&fit.window)
                        && fit
                            .r_squared
                            .is_some_and(|r2| r2 < self.window_minimum(&fit.window))
                });
                any_required_below
                    .then_some((QualityStatus::Rejected, Some(ReasonCode::LowR2Window)))
            }
            GateRule::NoComputableWindow => {
                let none_computed = !interval.fits.iter().any(|fit| fit.is_computed());
                none_computed
                    .then_some((QualityStatus::Rejected, Some(ReasonCode::NoValidR2Windows)))
            }
            GateRule::StrictOrdering => {
                let out_of_order = last_surviving_start
                    .is_some_and(|previous| interval.start_offset <= previous);
                out_of_order
                    .then_some((QualityStatus::Rejected, Some(ReasonCode::OverlapDuplicate)))
            }
            GateRule::EarlyWindowReview => self
                .only_earliest_window_failed(interval)
                .then_some((QualityStatus::Flagged, Some(ReasonCode::EarlyWindowPoorFit))),
            GateRule::OnsetDelayReview => {
                let beyond = interval.onset_delay_seconds > self.config.onset.review_threshold_seconds;
                beyond.then_some((QualityStatus::Flagged, Some(ReasonCode::OnsetDelayReview)))
            }
        }
    }

    /// True when the earliest window's computed R² misses its minimum while
    /// at least one other window is computed and every other computed
    /// window clears its own minimum.
    fn only_earliest_window_failed(&self, interval: &ExtractedInterval) -> bool {
        let Some(earliest) = self.config.earliest_window() else {
            return false;
        };

        let earliest_failed = interval.fits.iter().any(|fit| {
            fit.window == earliest.name
                && fit.r_squared.is_some_and(|r2| r2 < earliest.min_r_squared)
        });
        if !earliest_failed {
            return false;
        }

        let later_computed: Vec<_> = interval
            .fits
            .iter()
            .filter(|fit| fit.window != earliest.name && fit.is_computed())
            .collect();

        !later_computed.is_empty()
            && later_computed
                .iter()
                .all(|fit| fit.r_squared.is_some_and(|r2| r2 >= self.window_minimum(&fit.window)))
    }

    fn window_minimum(&self, name: &str) -> f64 {
        self.config
            .fit
            .windows
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.min_r_squared)
            .unwrap_or(0.0)
    }

    fn window_required(&self, name: &str) -> bool {
        self.config
            .fit
            .windows
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.required)
            .unwrap_or(false)
    }
}
