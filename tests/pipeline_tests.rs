//! End-to-end pipeline scenarios
//!
//! Synthetic one-hertz sessions exercising the full detect → merge →
//! adjust → extract → gate chain, including the plateau/double-detection
//! and valley-only recovery shapes the detectors exist for.

use hrrs::config::AnalysisConfig;
use hrrs::database::Database;
use hrrs::models::{DetectorOrigin, QualityStatus, ReasonCode, Sample};
use hrrs::pipeline::analyze_session;

fn one_hz(values: &[u16]) -> Vec<Sample> {
    values
        .iter()
        .enumerate()
        .map(|(i, &hr)| Sample::new(i as u32, hr))
        .collect()
}

fn exp_decay(baseline: f64, amplitude: f64, tau: f64, t: f64) -> u16 {
    (baseline + amplitude * (-t / tau).exp()).round() as u16
}

/// Thresholds relaxed enough that piecewise-synthetic declines still clear
/// them; the scenarios below test detection and dedup, not fit quality.
fn relaxed_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    for window in &mut config.fit.windows {
        window.min_r_squared = 0.6;
    }
    config
}

/// HR rises to 169 at t=1213, holds through t=1215, then declines; the
/// valley path re-detects the same peak. One interval survives with its
/// onset moved to the end of the plateau; the duplicate detection is
/// retained as an overlap_duplicate rejection, not silently dropped.
fn plateau_double_detection_session() -> Vec<Sample> {
    let mut hr: Vec<u16> = Vec::new();
    hr.extend(std::iter::repeat(115u16).take(1100)); // 0..1099
    for t in 1100..1213 {
        hr.push(115 + ((t - 1100) as f64 * 53.0 / 112.0).round() as u16);
    }
    hr.extend([169, 169, 169]); // 1213..1215
    for t in 1216..1276 {
        hr.push(exp_decay(110.0, 59.0, 93.0, (t - 1215) as f64));
    }
    hr.extend(std::iter::repeat(141u16).take(30)); // 1276..1305
    hr.extend([142, 143, 144, 145, 146, 147]); // 1306..1311
    hr.extend(std::iter::repeat(147u16).take(189)); // 1312..1500
    one_hz(&hr)
}

#[test]
fn test_plateau_double_detection_keeps_one_interval() {
    let samples = plateau_double_detection_session();
    let config = relaxed_config();

    let analysis = analyze_session("plateau", &samples, &config).unwrap();

    let surviving: Vec<_> = analysis
        .intervals
        .iter()
        .filter(|i| i.status != QualityStatus::Rejected)
        .collect();
    let rejected: Vec<_> = analysis
        .intervals
        .iter()
        .filter(|i| i.status == QualityStatus::Rejected)
        .collect();

    assert_eq!(surviving.len(), 1);
    assert_eq!(surviving[0].start_offset, 1215);
    assert_eq!(surviving[0].peak_hr, 169);
    assert_eq!(surviving[0].origin, DetectorOrigin::Peak);
    assert_eq!(surviving[0].onset_delay_seconds, 2);

    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].reason, Some(ReasonCode::OverlapDuplicate));
    assert_eq!(rejected[0].origin, DetectorOrigin::Valley);
}

/// HR drifts up to a 165 plateau peak with no sharp rise anywhere, then
/// declines 24 bpm. Only the valley path can see it.
fn valley_only_session() -> Vec<Sample> {
    let mut hr: Vec<u16> = Vec::new();
    hr.extend(std::iter::repeat(158u16).take(1700)); // 0..1699
    for t in 1700..1800 {
        hr.push(158 + (t % 2) as u16); // low-amplitude ripple
    }
    for t in 1800..1849 {
        hr.push(159 + ((t - 1800) as f64 * 6.0 / 48.0).round() as u16); // drift to 165
    }
    for t in 1849..1921 {
        hr.push(exp_decay(140.0, 25.0, 22.4, (t - 1848) as f64));
    }
    hr.extend(std::iter::repeat(141u16).take(60)); // 1921..1980
    hr.extend([142, 143, 144, 145, 146, 147]); // 1981..1986
    hr.extend(std::iter::repeat(147u16).take(174)); // 1987..2160
    one_hz(&hr)
}

#[test]
fn test_valley_only_recovery_is_detected_and_passes() {
    let samples = valley_only_session();
    let config = AnalysisConfig::default();

    let analysis = analyze_session("steady", &samples, &config).unwrap();

    assert_eq!(analysis.intervals.len(), 1);
    let interval = &analysis.intervals[0];
    assert_eq!(interval.origin, DetectorOrigin::Valley);
    assert_eq!(interval.start_offset, 1848);
    assert_eq!(interval.peak_hr, 165);
    assert_eq!(interval.status, QualityStatus::Pass);
}

#[test]
fn test_flat_session_produces_nothing() {
    let samples = one_hz(&[120; 600]);
    let config = AnalysisConfig::default();

    let analysis = analyze_session("flat", &samples, &config).unwrap();
    assert!(analysis.intervals.is_empty());
    assert_eq!(analysis.report.candidates_found, 0);
}

/// Interval ends 95s after onset: checkpoints and windows past that span
/// report null values, never zero.
fn short_recovery_session() -> Vec<Sample> {
    let mut hr: Vec<u16> = Vec::new();
    hr.extend(std::iter::repeat(110u16).take(120)); // 0..119
    for t in 120..=180 {
        hr.push(110 + (t - 120) as u16); // rise to 170
    }
    for t in 181..276 {
        hr.push(exp_decay(105.0, 65.0, 50.0, (t - 180) as f64));
    }
    one_hz(&hr)
}

#[test]
fn test_short_interval_reports_null_not_zero() {
    let samples = short_recovery_session();
    let config = AnalysisConfig::default();

    let analysis = analyze_session("short", &samples, &config).unwrap();
    assert_eq!(analysis.intervals.len(), 1);
    let interval = &analysis.intervals[0];
    assert_eq!(interval.duration_seconds, 95);

    // 60s checkpoint exists; everything later is null
    assert!(interval.checkpoints[0].heart_rate.is_some());
    for checkpoint in &interval.checkpoints[1..] {
        assert!(checkpoint.heart_rate.is_none());
        assert!(checkpoint.absolute_drop.is_none());
        assert!(checkpoint.percent_drop.is_none());
    }

    // The 300s window cannot fit inside a 95s interval
    let full = interval.fits.iter().find(|f| f.window == "full").unwrap();
    assert!(full.tau.is_none());
    assert!(full.r_squared.is_none());
    assert!(!full.converged);

    // The covered windows are computed and the interval passes
    assert!(interval.fits.iter().filter(|f| f.r_squared.is_some()).count() >= 3);
    assert_eq!(interval.status, QualityStatus::Pass);
}

/// Three clean recovery episodes back to back.
fn multi_episode_session() -> Vec<Sample> {
    let mut hr: Vec<u16> = Vec::new();
    for _ in 0..3 {
        hr.extend(std::iter::repeat(110u16).take(60));
        for step in 1..=60 {
            hr.push(110 + step as u16); // rise to 170
        }
        for t in 1..=300 {
            hr.push(exp_decay(105.0, 65.0, 60.0, t as f64));
        }
    }
    one_hz(&hr)
}

#[test]
fn test_surviving_intervals_never_overlap() {
    let samples = multi_episode_session();
    let config = AnalysisConfig::default();

    let analysis = analyze_session("multi", &samples, &config).unwrap();
    let surviving: Vec<_> = analysis
        .intervals
        .iter()
        .filter(|i| i.status != QualityStatus::Rejected)
        .collect();

    assert_eq!(surviving.len(), 3);
    for pair in surviving.windows(2) {
        assert!(pair[1].start_offset > pair[0].start_offset);
        assert!(pair[1].start_offset > pair[0].end_offset);
    }
}

#[test]
fn test_identical_inputs_reproduce_identical_records() {
    let samples = multi_episode_session();
    let config = AnalysisConfig::default();

    let first = analyze_session("same", &samples, &config).unwrap();
    let second = analyze_session("same", &samples, &config).unwrap();
    assert_eq!(first.intervals, second.intervals);
    assert_eq!(first.report, second.report);
}

#[test]
fn test_raising_a_window_minimum_never_promotes_intervals() {
    let samples = plateau_double_detection_session();

    let lenient = relaxed_config();
    let mut strict = relaxed_config();
    for window in &mut strict.fit.windows {
        if window.name == "30-90" {
            window.min_r_squared = 0.999;
        }
    }

    let before = analyze_session("tune", &samples, &lenient).unwrap();
    let after = analyze_session("tune", &samples, &strict).unwrap();

    assert_eq!(before.intervals.len(), after.intervals.len());
    let rank = |status: QualityStatus| match status {
        QualityStatus::Pass => 0,
        QualityStatus::Flagged => 1,
        QualityStatus::Rejected => 2,
    };
    let mut saw_demotion = false;
    for (b, a) in before.intervals.iter().zip(&after.intervals) {
        assert!(rank(a.status) >= rank(b.status));
        if rank(a.status) > rank(b.status) {
            saw_demotion = true;
        }
    }
    assert!(saw_demotion, "tightened threshold should demote the survivor");
}

#[test]
fn test_analysis_round_trips_through_the_sink() {
    let samples = multi_episode_session();
    let config = AnalysisConfig::default();

    let mut db = Database::in_memory().unwrap();
    db.store_session("s1", None, &samples).unwrap();

    let loaded = db.load_samples("s1").unwrap();
    let analysis = analyze_session("s1", &loaded, &config).unwrap();
    db.replace_intervals("s1", &analysis.intervals, &config.version_hash())
        .unwrap();

    let persisted = db.intervals_for_session("s1").unwrap();
    assert_eq!(persisted, analysis.intervals);
    assert_eq!(
        db.processed_version("s1").unwrap().as_deref(),
        Some(config.version_hash().as_str())
    );
}
