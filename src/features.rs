//! Feature extraction for adjusted candidates
//!
//! Each candidate is extended forward to the lesser of the configured
//! ceiling and the next candidate's adjusted onset, then measured: HR drop
//! at each fixed delay checkpoint, and a bounded exponential-decay fit per
//! configured sub-window. Checkpoints and windows the interval cannot cover
//! are recorded as unavailable — null, never zero.
//!
//! All window clocks start at the adjusted onset; fitting from the raw
//! detection point instead skews the earliest window's fit badly enough to
//! misclassify clean recoveries as double peaks.

use crate::config::AnalysisConfig;
use crate::fit::{DecaySolver, TauBounds};
use crate::merge::AdjustedCandidate;
use crate::models::{Candidate, Checkpoint, Sample, WindowFit, CHECKPOINT_DELAYS};

/// Checkpoints farther than this from any sample report no value.
const CHECKPOINT_MATCH_TOLERANCE_SECONDS: u32 = 5;

/// A candidate with its measured span, checkpoints, and window fits,
/// ready for the quality gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedInterval {
    pub candidate: Candidate,

    /// Index of the adjusted onset sample
    pub start_index: usize,

    /// Index of the last sample inside the interval
    pub end_index: usize,

    /// Adjusted onset, seconds from session start
    pub start_offset: u32,

    /// Interval end, seconds from session start
    pub end_offset: u32,

    pub onset_delay_seconds: u32,
    pub checkpoints: Vec<Checkpoint>,
    pub fits: Vec<WindowFit>,
}

impl ExtractedInterval {
    pub fn duration_seconds(&self) -> u32 {
        self.end_offset - self.start_offset
    }
}

/// Extract features for every adjusted candidate, in onset order.
///
/// The next candidate's onset caps each interval, enforcing non-overlap;
/// a capped window may leave every fit unavailable, in which case the gate
/// rejects the interval rather than this stage dropping it silently.
pub fn extract_features(
    samples: &[Sample],
    adjusted: &[AdjustedCandidate],
    config: &AnalysisConfig,
    solver: &dyn DecaySolver,
) -> Vec<ExtractedInterval> {
    let bounds = TauBounds {
        min: config.fit.tau_min_seconds,
        max: config.fit.tau_max_seconds,
    };

    adjusted
        .iter()
        .enumerate()
        .map(|(i, current)| {
            let next_start_offset = adjusted
                .get(i + 1)
                .map(|next| samples[next.adjusted_index].offset_seconds);
            extract_one(samples, current, next_start_offset, config, solver, bounds)
        })
        .collect()
}

fn extract_one(
    samples: &[Sample],
    adjusted: &AdjustedCandidate,
    next_start_offset: Option<u32>,
    config: &AnalysisConfig,
    solver: &dyn DecaySolver,
    bounds: TauBounds,
) -> ExtractedInterval {
    let start_index = adjusted.adjusted_index;
    let start_offset = samples[start_index].offset_seconds;
    let peak_hr = f64::from(adjusted.candidate.peak_hr);

    let mut limit_offset = start_offset.saturating_add(config.extension.ceiling_seconds);
    if let Some(next) = next_start_offset {
        // Stay strictly before the next onset
        limit_offset = limit_offset.min(next.saturating_sub(1));
    }
    let limit_offset = limit_offset.max(start_offset);

    let mut end_index = start_index;
    while end_index + 1 < samples.len() && samples[end_index + 1].offset_seconds <= limit_offset {
        end_index += 1;
    }
    let end_offset = samples[end_index].offset_seconds;
    let duration = end_offset - start_offset;

    let checkpoints = CHECKPOINT_DELAYS
        .iter()
        .map(|&delay| checkpoint_at(samples, start_index, end_index, delay, adjusted.candidate.peak_hr))
        .collect();

    let fits = config
        .fit
        .windows
        .iter()
        .map(|window| {
            if window.end_offset > duration {
                return WindowFit::unavailable(&window.name, window.start_offset, window.end_offset, 0);
            }

            let window_start = start_offset + window.start_offset;
            let window_end = start_offset + window.end_offset;
            let in_window: Vec<&Sample> = samples[start_index..=end_index]
                .iter()
                .filter(|s| s.offset_seconds >= window_start && s.offset_seconds <= window_end)
                .collect();

            if in_window.len() < window.min_samples {
                return WindowFit::unavailable(
                    &window.name,
                    window.start_offset,
                    window.end_offset,
                    in_window.len(),
                );
            }

            let times: Vec<f64> = in_window
                .iter()
                .map(|s| f64::from(s.offset_seconds - start_offset))
                .collect();
            let values: Vec<f64> = in_window.iter().map(|s| f64::from(s.heart_rate)).collect();

            let fit = solver.fit(&times, &values, peak_hr, bounds);
            if fit.converged {
                WindowFit {
                    window: window.name.clone(),
                    start_offset: window.start_offset,
                    end_offset: window.end_offset,
                    sample_count: in_window.len(),
                    tau: Some(fit.tau),
                    r_squared: Some(fit.r_squared),
                    converged: true,
                }
            } else {
                // Numerical failure marks only this window unavailable
                WindowFit::unavailable(
                    &window.name,
                    window.start_offset,
                    window.end_offset,
                    in_window.len(),
                )
            }
        })
        .collect();

    ExtractedInterval {
        candidate: adjusted.candidate.clone(),
        start_index,
        end_index,
        start_offset,
        end_offset,
        onset_delay_seconds: adjusted.onset_delay_seconds,
        checkpoints,
        fits,
    }
}

fn checkpoint_at(
    samples: &[Sample],
    start_index: usize,
    end_index: usize,
    delay: u32,
    peak_hr: u16,
) -> Checkpoint {
    let start_offset = samples[start_index].offset_seconds;
    let end_offset = samples[end_index].offset_seconds;
    let duration = end_offset - start_offset;

    if delay > duration {
        return Checkpoint::unavailable(delay);
    }

    let target = start_offset + delay;
    let nearest = samples[start_index..=end_index]
        .iter()
        .min_by_key(|s| s.offset_seconds.abs_diff(target));

    match nearest {
        Some(sample) if sample.offset_seconds.abs_diff(target) <= CHECKPOINT_MATCH_TOLERANCE_SECONDS => {
            let hr = sample.heart_rate;
            let absolute_drop = i32::from(peak_hr) - i32::from(hr);
            let percent_drop = if peak_hr > 0 {
                f64::from(absolute_drop) / f64::from(peak_hr) * 100.0
            } else {
                0.0
            };
            Checkpoint {
                delay_seconds: delay,
                heart_rate: Some(hr),
                absolute_drop: Some(absolute_drop),
                percent_drop: Some(percent_drop),
            }
        }
        _ => Checkpoint::unavailable(delay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::LmDecaySolver;
    use crate::merge::AdjustedCandidate;
    use crate::models::{Candidate, DetectorOrigin};

    fn decay_session(peak: f64, baseline: f64, tau: f64, onset: usize, total: usize) -> Vec<Sample> {
        (0..total)
            .map(|i| {
                let hr = if i < onset {
                    baseline + (peak - baseline) * (i as f64 / onset as f64)
                } else {
                    let t = (i - onset) as f64;
                    baseline + (peak - baseline) * (-t / tau).exp()
                };
                Sample::new(i as u32, hr.round() as u16)
            })
            .collect()
    }

    fn adjusted_at(index: usize, samples: &[Sample]) -> AdjustedCandidate {
        AdjustedCandidate {
            candidate: Candidate {
                onset_index: index,
                peak_hr: samples[index].heart_rate,
                origin: DetectorOrigin::Peak,
            },
            adjusted_index: index,
            onset_delay_seconds: 0,
        }
    }

    #[test]
    fn test_extension_respects_ceiling() {
        let samples = decay_session(170.0, 100.0, 60.0, 100, 600);
        let adjusted = vec![adjusted_at(100, &samples)];
        let config = AnalysisConfig::default();

        let extracted = extract_features(&samples, &adjusted, &config, &LmDecaySolver);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].duration_seconds(), 300);
    }

    #[test]
    fn test_extension_stops_before_next_onset() {
        let samples = decay_session(170.0, 100.0, 60.0, 100, 600);
        let adjusted = vec![adjusted_at(100, &samples), adjusted_at(250, &samples)];
        let config = AnalysisConfig::default();

        let extracted = extract_features(&samples, &adjusted, &config, &LmDecaySolver);
        assert_eq!(extracted[0].end_offset, 249);
        assert!(extracted[0].end_offset < extracted[1].start_offset);
    }

    #[test]
    fn test_checkpoints_beyond_duration_are_null() {
        // Interval capped at 90s: 60s checkpoint exists, later ones are null
        let samples = decay_session(170.0, 100.0, 60.0, 100, 600);
        let adjusted = vec![adjusted_at(100, &samples), adjusted_at(191, &samples)];
        let config = AnalysisConfig::default();

        let extracted = extract_features(&samples, &adjusted, &config, &LmDecaySolver);
        let checkpoints = &extracted[0].checkpoints;
        assert_eq!(checkpoints.len(), CHECKPOINT_DELAYS.len());
        assert!(checkpoints[0].heart_rate.is_some()); // 60s
        assert!(checkpoints[1].heart_rate.is_none()); // 120s
        assert!(checkpoints[1].absolute_drop.is_none());
        assert!(checkpoints[4].heart_rate.is_none()); // 300s
    }

    #[test]
    fn test_checkpoint_values_measure_drop_from_peak() {
        let samples = decay_session(170.0, 100.0, 60.0, 100, 600);
        let adjusted = vec![adjusted_at(100, &samples)];
        let config = AnalysisConfig::default();

        let extracted = extract_features(&samples, &adjusted, &config, &LmDecaySolver);
        let checkpoint = &extracted[0].checkpoints[0];
        let hr = checkpoint.heart_rate.unwrap();
        // After one tau (60s), decay has shed ~63% of the 70 bpm excess
        assert!(hr >= 120 && hr <= 130, "hr at 60s was {}", hr);
        assert_eq!(checkpoint.absolute_drop.unwrap(), 170 - i32::from(hr));
    }

    #[test]
    fn test_windows_longer_than_interval_are_unavailable() {
        let samples = decay_session(170.0, 100.0, 60.0, 100, 600);
        // Next onset 61s after this one caps the interval at 60s
        let adjusted = vec![adjusted_at(100, &samples), adjusted_at(161, &samples)];
        let config = AnalysisConfig::default();

        let extracted = extract_features(&samples, &adjusted, &config, &LmDecaySolver);
        let fits = &extracted[0].fits;

        let by_name = |name: &str| fits.iter().find(|f| f.window == name).unwrap();
        assert!(by_name("0-30").is_computed());
        assert!(by_name("30-60").is_computed());
        assert!(!by_name("30-90").is_computed());
        assert!(by_name("30-90").tau.is_none());
        assert!(!by_name("full").is_computed());
    }

    #[test]
    fn test_clean_decay_fits_every_covered_window() {
        let samples = decay_session(170.0, 100.0, 55.0, 100, 600);
        let adjusted = vec![adjusted_at(100, &samples)];
        let config = AnalysisConfig::default();

        let extracted = extract_features(&samples, &adjusted, &config, &LmDecaySolver);
        for fit in &extracted[0].fits {
            assert!(fit.is_computed(), "window {} not computed", fit.window);
            assert!(fit.r_squared.unwrap() > 0.9, "window {} poor", fit.window);
            let tau = fit.tau.unwrap();
            assert!(tau > 30.0 && tau < 90.0, "window {} tau {}", fit.window, tau);
        }
    }
}
