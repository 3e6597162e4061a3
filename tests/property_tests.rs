//! Invariant properties over generated sessions
//!
//! Whatever shape the signal takes, surviving intervals never overlap,
//! every non-pass record carries a reason, and re-running the pipeline
//! reproduces identical records.

use proptest::prelude::*;

use hrrs::config::AnalysisConfig;
use hrrs::models::{QualityStatus, Sample};
use hrrs::pipeline::{analyze_session, validate_samples};

fn arbitrary_session() -> impl Strategy<Value = Vec<Sample>> {
    prop::collection::vec(60u16..200, 20..400).prop_map(|values| {
        values
            .into_iter()
            .enumerate()
            .map(|(i, hr)| Sample::new(i as u32, hr))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_surviving_intervals_strictly_ordered(samples in arbitrary_session()) {
        let config = AnalysisConfig::default();
        let analysis = analyze_session("prop", &samples, &config).unwrap();

        let surviving: Vec<u32> = analysis
            .intervals
            .iter()
            .filter(|i| i.status != QualityStatus::Rejected)
            .map(|i| i.start_offset)
            .collect();

        for pair in surviving.windows(2) {
            prop_assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn prop_every_non_pass_record_has_a_reason(samples in arbitrary_session()) {
        let config = AnalysisConfig::default();
        let analysis = analyze_session("prop", &samples, &config).unwrap();

        for interval in &analysis.intervals {
            match interval.status {
                QualityStatus::Pass => prop_assert!(interval.reason.is_none()),
                _ => prop_assert!(interval.reason.is_some()),
            }
        }
    }

    #[test]
    fn prop_reprocessing_is_deterministic(samples in arbitrary_session()) {
        let config = AnalysisConfig::default();
        let first = analyze_session("prop", &samples, &config).unwrap();
        let second = analyze_session("prop", &samples, &config).unwrap();
        prop_assert_eq!(first.intervals, second.intervals);
    }

    #[test]
    fn prop_sequences_are_dense(samples in arbitrary_session()) {
        let config = AnalysisConfig::default();
        let analysis = analyze_session("prop", &samples, &config).unwrap();

        let sequences: Vec<u32> = analysis.intervals.iter().map(|i| i.sequence).collect();
        let expected: Vec<u32> = (1..=analysis.intervals.len() as u32).collect();
        prop_assert_eq!(sequences, expected);
    }

    #[test]
    fn prop_out_of_range_heart_rate_is_rejected(
        prefix in prop::collection::vec(60u16..200, 1..50),
        bad in prop_oneof![Just(0u16), Just(10u16), Just(251u16), Just(400u16)],
    ) {
        let mut samples: Vec<Sample> = prefix
            .into_iter()
            .enumerate()
            .map(|(i, hr)| Sample::new(i as u32, hr))
            .collect();
        let next_offset = samples.len() as u32;
        samples.push(Sample::new(next_offset, bad));

        prop_assert!(validate_samples("prop", &samples).is_err());
    }
}
