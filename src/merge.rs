//! Candidate merging, deduplication, and onset adjustment
//!
//! The two detectors are order-free; this stage unions their output into
//! one list ordered by onset time, resolves near-duplicate detections with
//! a deterministic tie-break, and relocates each surviving onset to the end
//! of its peak plateau. Superseded duplicates are kept so every candidate
//! that entered the pipeline leaves with a record.

use crate::models::{Candidate, DetectorOrigin, Sample};

/// Result of deduplication: winners in onset order, plus the candidates
/// they displaced (retained for audit as `overlap_duplicate` records).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub kept: Vec<Candidate>,
    pub superseded: Vec<Candidate>,
}

/// A candidate whose onset has been moved to the last sample of its peak
/// plateau, with the move recorded as a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustedCandidate {
    pub candidate: Candidate,

    /// Index of the last sample still at the local maximum
    pub adjusted_index: usize,

    /// Seconds between the detected onset and the adjusted onset
    pub onset_delay_seconds: u32,
}

/// Union both detector outputs and collapse near-duplicates.
///
/// Candidates whose onsets lie within `tolerance_seconds` of each other are
/// duplicates of one physiological event. The tie-break is deterministic,
/// never an average: a peak-origin candidate beats a valley-origin one
/// (it has a true local maximum); within the same origin the higher peak
/// wins, then the later onset.
pub fn merge_candidates(
    samples: &[Sample],
    peaks: Vec<Candidate>,
    valleys: Vec<Candidate>,
    tolerance_seconds: u32,
) -> MergeOutcome {
    let mut combined: Vec<Candidate> = peaks.into_iter().chain(valleys).collect();
    combined.sort_by_key(|c| (samples[c.onset_index].offset_seconds, c.origin != DetectorOrigin::Peak));

    let mut kept: Vec<Candidate> = Vec::new();
    let mut superseded: Vec<Candidate> = Vec::new();
    let mut cluster: Vec<Candidate> = Vec::new();

    let flush = |cluster: &mut Vec<Candidate>,
                 kept: &mut Vec<Candidate>,
                 superseded: &mut Vec<Candidate>| {
        if cluster.is_empty() {
            return;
        }
        let winner_index = pick_winner(samples, cluster);
        for (i, candidate) in cluster.drain(..).enumerate() {
            if i == winner_index {
                kept.push(candidate);
            } else {
                superseded.push(candidate);
            }
        }
    };

    for candidate in combined {
        let same_event = cluster.last().is_some_and(|last| {
            let gap = samples[candidate.onset_index]
                .offset_seconds
                .abs_diff(samples[last.onset_index].offset_seconds);
            gap <= tolerance_seconds
        });

        if !same_event {
            flush(&mut cluster, &mut kept, &mut superseded);
        }
        cluster.push(candidate);
    }
    flush(&mut cluster, &mut kept, &mut superseded);

    kept.sort_by_key(|c| samples[c.onset_index].offset_seconds);
    MergeOutcome { kept, superseded }
}

fn pick_winner(samples: &[Sample], cluster: &[Candidate]) -> usize {
    let mut winner = 0;
    for (i, challenger) in cluster.iter().enumerate().skip(1) {
        let current = &cluster[winner];
        let better = match (challenger.origin, current.origin) {
            (DetectorOrigin::Peak, DetectorOrigin::Valley) => true,
            (DetectorOrigin::Valley, DetectorOrigin::Peak) => false,
            _ => {
                if challenger.peak_hr != current.peak_hr {
                    challenger.peak_hr > current.peak_hr
                } else {
                    samples[challenger.onset_index].offset_seconds
                        > samples[current.onset_index].offset_seconds
                }
            }
        };
        if better {
            winner = i;
        }
    }
    winner
}

/// Move each onset to the last sample of the contiguous run equal to the
/// local maximum, so decay fitting starts where strict decline begins.
///
/// The adjustment only moves forward: the detected onset is already the
/// first occurrence of the maximum.
pub fn adjust_onsets(samples: &[Sample], kept: &[Candidate]) -> Vec<AdjustedCandidate> {
    kept.iter()
        .map(|candidate| {
            let peak_hr = samples[candidate.onset_index].heart_rate;
            let mut index = candidate.onset_index;
            while index + 1 < samples.len() && samples[index + 1].heart_rate == peak_hr {
                index += 1;
            }

            let onset_delay_seconds = samples[index].offset_seconds
                - samples[candidate.onset_index].offset_seconds;

            AdjustedCandidate {
                candidate: candidate.clone(),
                adjusted_index: index,
                onset_delay_seconds,
            }
        })
        .collect()
}
