//! Scoring: pitch, timing and dynamics sub-scores plus per-section breakdowns
//!
//! Every reference frame aggregates the candidate frames the warping path
//! aligned to it. Sub-scores are computed over the whole timeline and again
//! over the reference frames of each section.

use crate::config::{AlignmentConfig, ScoringConfig};
use crate::error::AnalysisError;
use crate::models::features::semitone_difference;
use crate::models::{ScoreBreakdown, Section, SectionScore};
use crate::services::alignment::AlignedPerformance;

/// Tolerance used when comparing the duration ratio with the tempo band
const TEMPO_EPSILON: f64 = 1e-9;

/// Per reference frame values derived from the alignment
struct FrameStats {
    offset_ms: u64,
    voiced: bool,
    /// Mean clamped semitone deviation (voiced reference frames only)
    pitch_deviation: Option<f64>,
    timing_deviation_ms: f64,
    reference_energy: f64,
    candidate_energy: f64,
}

/// Sub-scores over a range of reference frames
struct RangeScores {
    pitch: Option<f64>,
    timing: f64,
    dynamics: f64,
}

/// Scores aligned performances
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
    min_length_ratio: f64,
    max_length_ratio: f64,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig, alignment: &AlignmentConfig) -> Self {
        Self {
            config,
            min_length_ratio: alignment.min_length_ratio,
            max_length_ratio: alignment.max_length_ratio,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score an aligned performance
    ///
    /// `sections` empty means an equal partition into
    /// `default_section_count` sections of the reference timeline.
    pub fn score(
        &self,
        performance: &AlignedPerformance,
        sections: &[Section],
    ) -> Result<ScoreBreakdown, AnalysisError> {
        let stats = self.frame_stats(performance);
        let tempo_factor = self.tempo_factor(performance.duration_ratio);

        let all: Vec<&FrameStats> = stats.iter().collect();
        let overall_scores = self
            .range_scores(&all, tempo_factor)
            .ok_or_else(|| AnalysisError::Pipeline("Reference has no frames".to_string()))?;
        let pitch = overall_scores.pitch.ok_or_else(|| {
            AnalysisError::Pipeline("Reference has no voiced frames".to_string())
        })?;

        let weights = &self.config.weights;
        let overall = weights.aggregate(pitch, overall_scores.timing, overall_scores.dynamics);

        let sections = if sections.is_empty() {
            Section::equal_partition(performance.reference.duration_ms(), self.config.default_section_count)
        } else {
            sections.to_vec()
        };

        let section_scores = sections
            .iter()
            .enumerate()
            .map(|(section_index, section)| {
                let frames: Vec<&FrameStats> = stats
                    .iter()
                    .filter(|f| section.contains(f.offset_ms))
                    .collect();
                let mut score = SectionScore {
                    section_index,
                    label: section.label.clone(),
                    start_ms: section.start_ms,
                    end_ms: section.end_ms,
                    pitch: None,
                    timing: None,
                    dynamics: None,
                    overall: None,
                };

                // A section past the end of the reference has nothing to score
                let Some(scores) = self.range_scores(&frames, tempo_factor) else {
                    return score;
                };

                let voiced_ratio = frames.iter().filter(|f| f.voiced).count() as f64 / frames.len() as f64;
                let pitch = scores
                    .pitch
                    .filter(|_| voiced_ratio >= self.config.section_min_voiced_ratio);

                score.overall = Some(match pitch {
                    Some(p) => weights.aggregate(p, scores.timing, scores.dynamics),
                    None => weights.aggregate_without_pitch(scores.timing, scores.dynamics),
                });
                score.pitch = pitch;
                score.timing = Some(scores.timing);
                score.dynamics = Some(scores.dynamics);
                score
            })
            .collect();

        Ok(ScoreBreakdown {
            pitch,
            timing: overall_scores.timing,
            dynamics: overall_scores.dynamics,
            overall,
            sections: section_scores,
        })
    }

    /// 1 inside the tempo tolerance band, falling linearly to 0 at the
    /// accepted length-ratio bound
    pub fn tempo_factor(&self, duration_ratio: f64) -> f64 {
        let tolerance = self.config.tempo_tolerance;
        if (duration_ratio - 1.0).abs() <= tolerance + TEMPO_EPSILON {
            return 1.0;
        }

        let factor = if duration_ratio > 1.0 {
            let start = 1.0 + tolerance;
            (self.max_length_ratio - duration_ratio) / (self.max_length_ratio - start)
        } else {
            let start = 1.0 - tolerance;
            (duration_ratio - self.min_length_ratio) / (start - self.min_length_ratio)
        };
        factor.clamp(0.0, 1.0)
    }

    fn frame_stats(&self, performance: &AlignedPerformance) -> Vec<FrameStats> {
        let reference = &performance.reference;
        let candidate = &performance.candidate;
        let n = reference.len();
        let m = candidate.len();
        let tolerance = self.config.pitch_tolerance_semitones;
        let hop_ms = reference.hop_ms as f64;

        // Reference index a candidate frame would have at a uniform tempo
        let tempo_scale = if m > 1 {
            (n.saturating_sub(1)) as f64 / (m - 1) as f64
        } else {
            0.0
        };

        let mut grouped: Vec<Vec<usize>> = vec![Vec::new(); n];
        for pair in &performance.alignment.pairs {
            if pair.reference_index < n && pair.candidate_index < m {
                grouped[pair.reference_index].push(pair.candidate_index);
            }
        }

        reference
            .frames
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                let aligned = &grouped[i];
                let count = aligned.len().max(1) as f64;

                let pitch_deviation = frame.pitch_hz.map(|reference_hz| {
                    if aligned.is_empty() {
                        return tolerance;
                    }
                    aligned
                        .iter()
                        .map(|&j| match candidate.frames[j].pitch_hz {
                            Some(candidate_hz) => semitone_difference(reference_hz, candidate_hz).min(tolerance),
                            None => tolerance,
                        })
                        .sum::<f64>()
                        / count
                });

                let timing_deviation_ms = aligned
                    .iter()
                    .map(|&j| (i as f64 - j as f64 * tempo_scale).abs() * hop_ms)
                    .sum::<f64>()
                    / count;

                let candidate_energy = aligned
                    .iter()
                    .map(|&j| candidate.frames[j].energy as f64)
                    .sum::<f64>()
                    / count;

                FrameStats {
                    offset_ms: frame.offset_ms,
                    voiced: frame.is_voiced(),
                    pitch_deviation,
                    timing_deviation_ms,
                    reference_energy: frame.energy as f64,
                    candidate_energy,
                }
            })
            .collect()
    }

    /// `None` when the range holds no reference frames
    fn range_scores(&self, frames: &[&FrameStats], tempo_factor: f64) -> Option<RangeScores> {
        if frames.is_empty() {
            return None;
        }

        let deviations: Vec<f64> = frames.iter().filter_map(|f| f.pitch_deviation).collect();
        let pitch = if deviations.is_empty() {
            None
        } else {
            let mean = deviations.iter().sum::<f64>() / deviations.len() as f64;
            Some(linear_score(mean, self.config.pitch_tolerance_semitones))
        };

        let mean_timing = frames.iter().map(|f| f.timing_deviation_ms).sum::<f64>() / frames.len() as f64;
        let timing = linear_score(mean_timing, self.config.timing_tolerance_ms) * tempo_factor;

        let reference: Vec<f64> = frames.iter().map(|f| f.reference_energy).collect();
        let candidate: Vec<f64> = frames.iter().map(|f| f.candidate_energy).collect();
        let dynamics = dynamics_score(&reference, &candidate);

        Some(RangeScores {
            pitch,
            timing,
            dynamics,
        })
    }
}

/// 100 at zero deviation, 0 at `tolerance`
fn linear_score(deviation: f64, tolerance: f64) -> f64 {
    (100.0 * (1.0 - deviation / tolerance)).clamp(0.0, 100.0)
}

/// 100 · max(Pearson r, 0); two flat envelopes match perfectly, one flat
/// envelope against a moving one does not match at all
fn dynamics_score(reference: &[f64], candidate: &[f64]) -> f64 {
    const FLAT_VARIANCE: f64 = 1e-12;

    let n = reference.len().min(candidate.len());
    if n == 0 {
        return 0.0;
    }

    let mean_r = reference[..n].iter().sum::<f64>() / n as f64;
    let mean_c = candidate[..n].iter().sum::<f64>() / n as f64;

    let mut covariance = 0.0;
    let mut variance_r = 0.0;
    let mut variance_c = 0.0;
    for k in 0..n {
        let dr = reference[k] - mean_r;
        let dc = candidate[k] - mean_c;
        covariance += dr * dc;
        variance_r += dr * dr;
        variance_c += dc * dc;
    }

    let flat_r = variance_r / n as f64 <= FLAT_VARIANCE;
    let flat_c = variance_c / n as f64 <= FLAT_VARIANCE;
    match (flat_r, flat_c) {
        (true, true) => 100.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let r = covariance / (variance_r.sqrt() * variance_c.sqrt());
            (100.0 * r.max(0.0)).clamp(0.0, 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringWeights;
    use crate::models::{FeatureFrame, FeatureSequence};
    use crate::services::alignment::AlignmentEngine;

    /// Notes change every 500ms over a one-octave pattern; energy follows
    /// a slow swell when `swell` is set, otherwise stays flat
    fn melody_at(time_ms: f64) -> f32 {
        const NOTES: [f32; 8] = [220.0, 246.9, 277.2, 293.7, 329.6, 293.7, 277.2, 246.9];
        NOTES[((time_ms / 500.0) as usize) % NOTES.len()]
    }

    fn performance(frames: usize, hop_ms: u32, speed: f64, swell: bool) -> FeatureSequence {
        let frames = (0..frames)
            .map(|j| {
                let time_ms = j as f64 * hop_ms as f64 * speed;
                FeatureFrame {
                    offset_ms: j as u64 * hop_ms as u64,
                    pitch_hz: Some(melody_at(time_ms)),
                    energy: if swell {
                        (0.3 + 0.2 * (time_ms / 3000.0).sin()) as f32
                    } else {
                        0.4
                    },
                    onset: 0.0,
                }
            })
            .collect();
        FeatureSequence::new(hop_ms, frames)
    }

    /// Candidate taking `stretch`× the reference duration, dynamics included
    fn stretched(reference_frames: usize, hop_ms: u32, stretch: f64) -> FeatureSequence {
        let frames = (reference_frames as f64 * stretch).round() as usize;
        performance(frames, hop_ms, 1.0 / stretch, true)
    }

    fn engines() -> (AlignmentEngine, ScoringEngine) {
        let alignment = AlignmentConfig::default();
        (
            AlignmentEngine::new(alignment.clone()),
            ScoringEngine::new(ScoringConfig::default(), &alignment),
        )
    }

    fn score(reference: &FeatureSequence, candidate: &FeatureSequence, sections: &[Section]) -> ScoreBreakdown {
        let (aligner, scorer) = engines();
        let performance = aligner.align(reference, candidate).unwrap();
        scorer.score(&performance, sections).unwrap()
    }

    #[test]
    fn test_identical_candidate_scores_full_marks() {
        let reference = performance(600, 10, 1.0, true);
        let breakdown = score(&reference, &reference, &[]);

        assert!((breakdown.pitch - 100.0).abs() < 1e-9);
        assert!((breakdown.timing - 100.0).abs() < 1e-9);
        assert!((breakdown.dynamics - 100.0).abs() < 1e-6);
        assert!((breakdown.overall - 100.0).abs() < 1e-6);
        assert_eq!(breakdown.sections.len(), 4);
    }

    #[test]
    fn test_unvoiced_candidate_scores_zero_pitch() {
        let reference = performance(300, 10, 1.0, true);
        let mut candidate = reference.clone();
        for frame in &mut candidate.frames {
            frame.pitch_hz = None;
        }

        let breakdown = score(&reference, &candidate, &[]);
        assert_eq!(breakdown.pitch, 0.0);
        assert!(breakdown.sections.iter().all(|s| s.pitch == Some(0.0)));
    }

    #[test]
    fn test_unvoiced_reference_is_pipeline_error() {
        let mut reference = performance(300, 10, 1.0, true);
        for frame in &mut reference.frames {
            frame.pitch_hz = None;
        }
        let (aligner, scorer) = engines();
        let aligned = aligner.align(&reference, &reference).unwrap();

        let err = scorer.score(&aligned, &[]).unwrap_err();
        assert_eq!(err.kind(), "PIPELINE_ERROR");
    }

    #[test]
    fn test_sectioned_scenario_silent_second_half() {
        // 180s reference at 100ms hop, candidate good in sections 1-2 and
        // silent in sections 3-4
        let reference = performance(1800, 100, 1.0, true);
        let mut candidate = reference.clone();
        for frame in candidate.frames.iter_mut().skip(900) {
            frame.pitch_hz = None;
            frame.energy = 0.0;
        }
        let sections = Section::equal_partition(180_000, 4);
        assert_eq!(sections[1].end_ms, 90_000);

        let breakdown = score(&reference, &candidate, &sections);
        let pitches: Vec<f64> = breakdown.sections.iter().map(|s| s.pitch.unwrap()).collect();

        assert!(pitches[0] > 97.0, "{:?}", pitches);
        assert!(pitches[1] > 97.0, "{:?}", pitches);
        assert!(pitches[2] < 3.0, "{:?}", pitches);
        assert!(pitches[3] < 3.0, "{:?}", pitches);
        assert!((breakdown.pitch - 50.0).abs() < 3.0, "pitch {}", breakdown.pitch);
    }

    #[test]
    fn test_speed_changes_within_tolerance_keep_score() {
        let reference = performance(1000, 10, 1.0, true);
        let baseline = score(&reference, &reference, &[]).overall;

        for stretch in [0.9, 0.95, 1.05, 1.1] {
            let candidate = stretched(1000, 10, stretch);
            let overall = score(&reference, &candidate, &[]).overall;
            assert!(
                (overall - baseline).abs() <= 3.0,
                "stretch {} scored {} vs {}",
                stretch,
                overall,
                baseline
            );
        }
    }

    #[test]
    fn test_speed_changes_outside_tolerance_degrade_monotonically() {
        let reference = performance(1000, 10, 1.0, true);
        let baseline = score(&reference, &reference, &[]).overall;

        let mut previous = baseline;
        for stretch in [1.2, 1.4, 1.8, 2.5] {
            let candidate = stretched(1000, 10, stretch);
            let overall = score(&reference, &candidate, &[]).overall;
            assert!(overall < previous, "stretch {} scored {} (previous {})", stretch, overall, previous);
            previous = overall;
        }
    }

    #[test]
    fn test_tempo_factor_shape() {
        let (_, scorer) = engines();
        assert_eq!(scorer.tempo_factor(1.0), 1.0);
        assert_eq!(scorer.tempo_factor(1.1), 1.0);
        assert_eq!(scorer.tempo_factor(0.9), 1.0);
        assert!(scorer.tempo_factor(1.2) < 1.0);
        assert!(scorer.tempo_factor(1.4) < scorer.tempo_factor(1.2));
        assert!(scorer.tempo_factor(0.5) < scorer.tempo_factor(0.8));
        assert_eq!(scorer.tempo_factor(3.0), 0.0);
        assert_eq!(scorer.tempo_factor(0.33), 0.0);
    }

    #[test]
    fn test_overall_uses_configured_weights() {
        let reference = performance(400, 10, 1.0, true);
        let mut candidate = reference.clone();
        for frame in candidate.frames.iter_mut() {
            frame.pitch_hz = frame.pitch_hz.map(|p| p * 1.03);
        }

        let breakdown = score(&reference, &candidate, &[]);
        let expected = ScoringWeights::default().aggregate(breakdown.pitch, breakdown.timing, breakdown.dynamics);
        assert!((breakdown.overall - expected).abs() < 1e-9);
        assert!(breakdown.pitch < 100.0 && breakdown.pitch > 0.0);
    }

    #[test]
    fn test_mostly_unvoiced_section_has_no_pitch() {
        let mut reference = performance(400, 10, 1.0, true);
        for frame in reference.frames.iter_mut().take(100) {
            frame.pitch_hz = None;
        }

        let breakdown = score(&reference, &reference, &[]);
        let first = &breakdown.sections[0];
        assert_eq!(first.pitch, None);
        let expected =
            ScoringWeights::default().aggregate_without_pitch(first.timing.unwrap(), first.dynamics.unwrap());
        assert!((first.overall.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_section_past_reference_end_is_not_scored() {
        // 4s reference, second section lies entirely after it
        let reference = performance(400, 10, 1.0, true);
        let sections = vec![
            Section {
                label: "Verse".to_string(),
                start_ms: 0,
                end_ms: 4_000,
            },
            Section {
                label: "Coda".to_string(),
                start_ms: 4_000,
                end_ms: 8_000,
            },
        ];

        let breakdown = score(&reference, &reference, &sections);
        let verse = &breakdown.sections[0];
        assert!(verse.overall.unwrap() > 99.0);

        let coda = &breakdown.sections[1];
        assert_eq!(coda.label, "Coda");
        assert_eq!(coda.pitch, None);
        assert_eq!(coda.timing, None);
        assert_eq!(coda.dynamics, None);
        assert_eq!(coda.overall, None);

        // Never chosen as the place to work on
        assert_eq!(breakdown.weakest_section().map(|s| s.section_index), Some(0));
    }

    #[test]
    fn test_dynamics_flat_envelopes() {
        assert_eq!(dynamics_score(&[0.4; 10], &[0.4; 10]), 100.0);
        assert_eq!(dynamics_score(&[0.4; 10], &[0.1, 0.2, 0.3, 0.4, 0.5, 0.4, 0.3, 0.2, 0.1, 0.0]), 0.0);
    }

    #[test]
    fn test_dynamics_anticorrelated_is_zero() {
        let rising: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let falling: Vec<f64> = (0..10).map(|i| (10 - i) as f64).collect();
        assert_eq!(dynamics_score(&rising, &falling), 0.0);
        assert!((dynamics_score(&rising, &rising) - 100.0).abs() < 1e-9);
    }
}
