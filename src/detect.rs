//! Candidate detection
//!
//! Two independent, side-effect-free strategies feed the merger:
//! [`PeakDetector`] finds sharp rise-then-fall maxima by prominence, and
//! [`ValleyDetector`] recovers plateau-then-decline recoveries that lack a
//! sharp peak by scanning for local minima and backtracking to the most
//! recent elevated local maximum before each one.
//!
//! Flat-topped maxima are reported at the first sample of the plateau; the
//! onset adjuster later relocates the start to the plateau's end.

use std::cmp::Ordering;

use crate::config::AnalysisConfig;
use crate::models::{Candidate, DetectorOrigin, Sample};

/// Detection capability: turn a sample stream into candidate onsets.
pub trait Detect {
    fn detect(&self, samples: &[Sample], config: &AnalysisConfig) -> Vec<Candidate>;
}

/// Prominence-based sharp-peak detection.
pub struct PeakDetector;

impl Detect for PeakDetector {
    fn detect(&self, samples: &[Sample], config: &AnalysisConfig) -> Vec<Candidate> {
        let values = heart_rates(samples);
        let offsets = offsets(samples);

        find_peaks(
            &values,
            &offsets,
            config.peak.min_prominence,
            config.peak.min_distance_seconds,
        )
        .into_iter()
        .map(|index| Candidate {
            onset_index: index,
            peak_hr: samples[index].heart_rate,
            origin: DetectorOrigin::Peak,
        })
        .collect()
    }
}

/// Valley detection with bounded backtracking.
///
/// For each local minimum, the lookback window immediately before it is
/// scanned for local maxima at a lower prominence, and the most recent one
/// is taken as the onset. The window's absolute maximum is deliberately not
/// used: it can anchor to an unrelated, older peak from a prior interval.
pub struct ValleyDetector;

impl Detect for ValleyDetector {
    fn detect(&self, samples: &[Sample], config: &AnalysisConfig) -> Vec<Candidate> {
        let values = heart_rates(samples);
        let offs = offsets(samples);
        let negated: Vec<f64> = values.iter().map(|v| -v).collect();

        let valleys = find_peaks(
            &negated,
            &offs,
            config.valley.min_prominence,
            config.valley.min_distance_seconds,
        );

        let elevation_floor = config.valley.resting_hr + config.valley.min_elevation_above_rest;
        let mut candidates = Vec::new();

        for valley in valleys {
            let valley_time = offs[valley];
            let window_start_time = valley_time.saturating_sub(config.valley.lookback_seconds);
            let window_start = offs.partition_point(|&t| t < window_start_time);
            if window_start >= valley {
                continue;
            }

            let window_values = &values[window_start..valley];
            let window_offsets = &offs[window_start..valley];
            let local = find_peaks(
                window_values,
                window_offsets,
                config.valley.local_peak_prominence,
                config.valley.local_peak_distance_seconds,
            );

            // Most recent local maximum, not the window's absolute maximum
            let Some(&relative) = local.last() else {
                continue;
            };
            let onset_index = window_start + relative;
            let peak_hr = values[onset_index];

            if peak_hr < elevation_floor {
                continue;
            }
            if peak_hr - values[valley] < config.valley.min_drop {
                continue;
            }

            candidates.push(Candidate {
                onset_index,
                peak_hr: samples[onset_index].heart_rate,
                origin: DetectorOrigin::Valley,
            });
        }

        candidates
    }
}

fn heart_rates(samples: &[Sample]) -> Vec<f64> {
    samples.iter().map(|s| f64::from(s.heart_rate)).collect()
}

fn offsets(samples: &[Sample]) -> Vec<u32> {
    samples.iter().map(|s| s.offset_seconds).collect()
}

/// Indices of local maxima standing out by at least `min_prominence`,
/// thinned so no two survivors are closer than `min_distance_seconds`.
///
/// Short or flat series yield no peaks, never an error.
pub(crate) fn find_peaks(
    values: &[f64],
    offsets: &[u32],
    min_prominence: f64,
    min_distance_seconds: u32,
) -> Vec<usize> {
    let candidates: Vec<usize> = local_maxima(values)
        .into_iter()
        .filter(|&peak| prominence(values, peak) >= min_prominence)
        .collect();

    enforce_distance(candidates, values, offsets, min_distance_seconds)
}

/// Local maxima, reporting flat-topped runs at their first sample.
/// Series edges never qualify.
fn local_maxima(values: &[f64]) -> Vec<usize> {
    let n = values.len();
    if n < 3 {
        return Vec::new();
    }

    let mut peaks = Vec::new();
    let mut i = 1;
    while i < n - 1 {
        if values[i] > values[i - 1] {
            let plateau_start = i;
            let mut j = i;
            while j + 1 < n && values[j + 1] == values[j] {
                j += 1;
            }
            if j + 1 < n && values[j + 1] < values[j] {
                peaks.push(plateau_start);
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }
    peaks
}

/// How much a peak stands out: its height above the higher of the two
/// minima separating it from the nearest higher ground on each side.
fn prominence(values: &[f64], peak: usize) -> f64 {
    let peak_value = values[peak];

    let mut left_min = peak_value;
    let mut i = peak;
    while i > 0 {
        i -= 1;
        if values[i] > peak_value {
            break;
        }
        if values[i] < left_min {
            left_min = values[i];
        }
    }

    let mut right_min = peak_value;
    let mut j = peak;
    while j + 1 < values.len() {
        j += 1;
        if values[j] > peak_value {
            break;
        }
        if values[j] < right_min {
            right_min = values[j];
        }
    }

    peak_value - left_min.max(right_min)
}

/// Keep the highest peaks first, discarding any peak within
/// `min_distance_seconds` of one already kept.
fn enforce_distance(
    mut peaks: Vec<usize>,
    values: &[f64],
    offsets: &[u32],
    min_distance_seconds: u32,
) -> Vec<usize> {
    if min_distance_seconds == 0 || peaks.len() <= 1 {
        return peaks;
    }

    peaks.sort_by(|&a, &b| match values[b].total_cmp(&values[a]) {
        Ordering::Equal => a.cmp(&b),
        other => other,
    });

    let mut kept: Vec<usize> = Vec::new();
    for peak in peaks {
        let far_enough = kept
            .iter()
            .all(|&k| offsets[peak].abs_diff(offsets[k]) >= min_distance_seconds);
        if far_enough {
            kept.push(peak);
        }
    }

    kept.sort_unstable();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;

    fn one_hz(values: &[u16]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &hr)| Sample::new(i as u32, hr))
            .collect()
    }

    #[test]
    fn test_local_maxima_sharp_peak() {
        let values = [100.0, 110.0, 150.0, 120.0, 100.0];
        assert_eq!(local_maxima(&values), vec![2]);
    }

    #[test]
    fn test_local_maxima_flat_top_reports_first_sample() {
        let values = [100.0, 150.0, 150.0, 150.0, 120.0];
        assert_eq!(local_maxima(&values), vec![1]);
    }

    #[test]
    fn test_local_maxima_edge_plateau_is_not_a_peak() {
        let values = [100.0, 120.0, 150.0, 150.0];
        assert!(local_maxima(&values).is_empty());
    }

    #[test]
    fn test_prominence_uses_higher_base() {
        // Peak at 150 between a valley at 120 and a valley at 100 before
        // higher ground: prominence is measured from the 120 side.
        let values = [100.0, 160.0, 120.0, 150.0, 110.0, 100.0, 170.0];
        let p = prominence(&values, 3);
        assert!((p - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_enforce_distance_keeps_highest() {
        let values = [100.0, 140.0, 100.0, 145.0, 100.0];
        let offsets = [0, 10, 20, 30, 40];
        let kept = enforce_distance(vec![1, 3], &values, &offsets, 30);
        assert_eq!(kept, vec![3]);
    }

    #[test]
    fn test_flat_session_yields_no_candidates() {
        let samples = one_hz(&[120; 300]);
        let config = AnalysisConfig::default();
        assert!(PeakDetector.detect(&samples, &config).is_empty());
        assert!(ValleyDetector.detect(&samples, &config).is_empty());
    }

    #[test]
    fn test_peak_detector_finds_prominent_peak() {
        let mut hr = Vec::new();
        hr.extend(std::iter::repeat(100u16).take(60));
        hr.extend((100..=170).step_by(2).map(|v| v as u16)); // rise
        hr.extend((100..=168).rev().step_by(2).map(|v| v as u16)); // fall
        hr.extend(std::iter::repeat(100u16).take(60));
        let samples = one_hz(&hr);

        let config = AnalysisConfig::default();
        let candidates = PeakDetector.detect(&samples, &config);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].peak_hr, 170);
        assert_eq!(candidates[0].origin, DetectorOrigin::Peak);
    }

    #[test]
    fn test_valley_backtracking_selects_most_recent_maximum() {
        // An older, higher local maximum followed by a more recent, lower
        // one inside the same lookback window: the recent one wins.
        let mut hr: Vec<u16> = Vec::new();
        hr.extend(std::iter::repeat(120u16).take(30));
        hr.extend((120..=170).map(|v| v as u16)); // rise to older peak (idx 80)
        hr.extend((150..170).rev().map(|v| v as u16)); // drop to 150
        hr.extend((150..=160).map(|v| v as u16)); // recent lower peak (ends idx 111)
        hr.extend((130..=160).rev().map(|v| v as u16)); // decline to valley
        hr.extend((131..=140).map(|v| v as u16)); // drift back up past the valley
        hr.extend(std::iter::repeat(140u16).take(40));
        let samples = one_hz(&hr);

        let mut config = AnalysisConfig::default();
        config.valley.lookback_seconds = 80;
        config.valley.min_drop = 5.0;

        let candidates = ValleyDetector.detect(&samples, &config);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].peak_hr, 160);
        assert_eq!(candidates[0].origin, DetectorOrigin::Valley);
    }

    #[test]
    fn test_valley_detector_respects_elevation_guard() {
        // Gentle bump that never clears resting + elevation floor
        let mut hr: Vec<u16> = Vec::new();
        hr.extend(std::iter::repeat(70u16).take(60));
        hr.extend((70..=90).map(|v| v as u16));
        hr.extend((70..=90).rev().map(|v| v as u16));
        hr.extend((71..=75).map(|v| v as u16));
        hr.extend(std::iter::repeat(75u16).take(60));
        let samples = one_hz(&hr);

        let config = AnalysisConfig::default();
        assert!(ValleyDetector.detect(&samples, &config).is_empty());
    }

    #[test]
    fn test_short_session_yields_no_candidates() {
        let samples = one_hz(&[100, 150]);
        let config = AnalysisConfig::default();
        assert!(PeakDetector.detect(&samples, &config).is_empty());
        assert!(ValleyDetector.detect(&samples, &config).is_empty());
    }
}
