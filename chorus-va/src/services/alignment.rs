//! DTW alignment of a candidate performance against the reference
//!
//! Banded dynamic time warping over frame-level features. The band follows
//! the length-normalised diagonal, so a uniformly faster or slower
//! performance stays inside it. Two rolling cost rows plus per-row
//! backpointers keep memory at O(n · band) instead of O(n · m).

use tracing::debug;

use crate::config::AlignmentConfig;
use crate::error::AnalysisError;
use crate::models::features::semitone_difference;
use crate::models::FeatureSequence;

const STEP_ORIGIN: u8 = 0;
const STEP_DIAGONAL: u8 = 1;
const STEP_REFERENCE: u8 = 2;
const STEP_CANDIDATE: u8 = 3;

/// One step of the warping path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedPair {
    pub reference_index: usize,
    pub candidate_index: usize,
    /// Local frame cost at this cell
    pub cost: f64,
}

/// Warping path from (0, 0) to (n-1, m-1)
#[derive(Debug, Clone, PartialEq)]
pub struct Alignment {
    pub pairs: Vec<AlignedPair>,
    pub total_cost: f64,
}

impl Alignment {
    /// Candidate indices aligned to each reference frame
    pub fn candidates_per_reference(&self, reference_len: usize) -> Vec<Vec<usize>> {
        let mut grouped = vec![Vec::new(); reference_len];
        for pair in &self.pairs {
            if let Some(slot) = grouped.get_mut(pair.reference_index) {
                slot.push(pair.candidate_index);
            }
        }
        grouped
    }

    pub fn mean_cost(&self) -> f64 {
        if self.pairs.is_empty() {
            return 0.0;
        }
        self.total_cost / self.pairs.len() as f64
    }
}

/// Alignment together with the (possibly pooled) sequences it indexes
#[derive(Debug, Clone)]
pub struct AlignedPerformance {
    pub reference: FeatureSequence,
    pub candidate: FeatureSequence,
    pub alignment: Alignment,
    /// Candidate duration / reference duration
    pub duration_ratio: f64,
}

/// DTW alignment engine
#[derive(Debug, Clone)]
pub struct AlignmentEngine {
    config: AlignmentConfig,
}

impl AlignmentEngine {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Validate lengths, pool long sequences and align
    pub fn align(
        &self,
        reference: &FeatureSequence,
        candidate: &FeatureSequence,
    ) -> Result<AlignedPerformance, AnalysisError> {
        if reference.is_empty() || candidate.is_empty() {
            return Err(AnalysisError::Alignment(
                "Cannot align an empty feature sequence".to_string(),
            ));
        }

        let duration_ratio = candidate.duration_ms() as f64 / reference.duration_ms() as f64;
        if duration_ratio < self.config.min_length_ratio || duration_ratio > self.config.max_length_ratio {
            return Err(AnalysisError::Alignment(format!(
                "Recording length is {:.2}x the reference (accepted {:.2}x to {:.2}x)",
                duration_ratio, self.config.min_length_ratio, self.config.max_length_ratio
            )));
        }

        let longest = reference.len().max(candidate.len());
        let factor = longest.div_ceil(self.config.max_alignment_frames).max(1);
        let (reference, candidate) = if factor > 1 {
            debug!(factor, longest, "Pooling frames before alignment");
            (reference.decimate(factor), candidate.decimate(factor))
        } else {
            (reference.clone(), candidate.clone())
        };

        let alignment = self.dtw(&reference, &candidate)?;
        debug!(
            reference_frames = reference.len(),
            candidate_frames = candidate.len(),
            path_len = alignment.pairs.len(),
            mean_cost = alignment.mean_cost(),
            "Alignment complete"
        );

        Ok(AlignedPerformance {
            reference,
            candidate,
            alignment,
            duration_ratio,
        })
    }

    /// Banded DTW over the sequences as given (no pooling, no ratio check)
    pub fn dtw(
        &self,
        reference: &FeatureSequence,
        candidate: &FeatureSequence,
    ) -> Result<Alignment, AnalysisError> {
        let n = reference.len();
        let m = candidate.len();
        if n == 0 || m == 0 {
            return Err(AnalysisError::Alignment(
                "Cannot align an empty feature sequence".to_string(),
            ));
        }

        let cost = FrameCost::new(&self.config, reference, candidate);
        let band = Band::new(n, m, self.config.band_ratio);

        let mut previous = vec![f64::INFINITY; m];
        let mut current = vec![f64::INFINITY; m];
        let mut steps: Vec<(usize, Vec<u8>)> = Vec::with_capacity(n);

        for i in 0..n {
            let (lo, hi) = band.columns(i);
            let mut row_steps = vec![STEP_ORIGIN; hi - lo + 1];
            current.iter_mut().for_each(|c| *c = f64::INFINITY);

            for j in lo..=hi {
                let local = cost.at(i, j) + self.config.diagonal_bias * band.offset(i, j);

                let (best, step) = if i == 0 && j == 0 {
                    (0.0, STEP_ORIGIN)
                } else {
                    let diagonal = if i > 0 && j > 0 { previous[j - 1] } else { f64::INFINITY };
                    let advance_reference = if i > 0 { previous[j] } else { f64::INFINITY };
                    let advance_candidate = if j > 0 { current[j - 1] } else { f64::INFINITY };

                    let mut best = (diagonal, STEP_DIAGONAL);
                    if advance_reference < best.0 {
                        best = (advance_reference, STEP_REFERENCE);
                    }
                    if advance_candidate < best.0 {
                        best = (advance_candidate, STEP_CANDIDATE);
                    }
                    best
                };

                if best.is_finite() {
                    current[j] = best + local;
                    row_steps[j - lo] = step;
                }
            }

            steps.push((lo, row_steps));
            std::mem::swap(&mut previous, &mut current);
        }

        let total_cost = previous[m - 1];
        if !total_cost.is_finite() {
            return Err(AnalysisError::Alignment(
                "No alignment path within the band".to_string(),
            ));
        }

        let mut pairs = Vec::with_capacity(n + m);
        let (mut i, mut j) = (n - 1, m - 1);
        loop {
            pairs.push(AlignedPair {
                reference_index: i,
                candidate_index: j,
                cost: cost.at(i, j),
            });

            let (lo, row_steps) = &steps[i];
            match row_steps[j - lo] {
                STEP_DIAGONAL => {
                    i -= 1;
                    j -= 1;
                }
                STEP_REFERENCE => i -= 1,
                STEP_CANDIDATE => j -= 1,
                _ => break,
            }
        }
        pairs.reverse();

        Ok(Alignment { pairs, total_cost })
    }
}

/// Sakoe-Chiba style window around the length-normalised diagonal
struct Band {
    m: usize,
    slope: f64,
    half_width: f64,
    single_row: bool,
}

impl Band {
    fn new(n: usize, m: usize, band_ratio: f64) -> Self {
        let slope = if n > 1 {
            (m - 1) as f64 / (n - 1) as f64
        } else {
            0.0
        };
        let half_width = (band_ratio * n as f64).ceil().max(2.0);
        Self {
            m,
            slope,
            half_width,
            single_row: n == 1,
        }
    }

    fn centre(&self, i: usize) -> f64 {
        i as f64 * self.slope
    }

    fn columns(&self, i: usize) -> (usize, usize) {
        if self.single_row {
            return (0, self.m - 1);
        }
        let centre = self.centre(i);
        let lo = (centre - self.half_width).floor().max(0.0) as usize;
        let hi = ((centre + self.half_width).ceil() as usize).min(self.m - 1);
        (lo.min(hi), hi)
    }

    /// Distance from the diagonal as a fraction of the half-width
    fn offset(&self, i: usize, j: usize) -> f64 {
        if self.single_row {
            return 0.0;
        }
        (j as f64 - self.centre(i)).abs() / self.half_width
    }
}

/// Local distance between one reference and one candidate frame
struct FrameCost<'a> {
    config: &'a AlignmentConfig,
    reference: &'a FeatureSequence,
    candidate: &'a FeatureSequence,
    reference_energy: Vec<f64>,
    candidate_energy: Vec<f64>,
    reference_onset: Vec<f64>,
    candidate_onset: Vec<f64>,
}

impl<'a> FrameCost<'a> {
    fn new(config: &'a AlignmentConfig, reference: &'a FeatureSequence, candidate: &'a FeatureSequence) -> Self {
        Self {
            config,
            reference,
            candidate,
            reference_energy: reference.normalized_energy(),
            candidate_energy: candidate.normalized_energy(),
            reference_onset: reference.normalized_onset(),
            candidate_onset: candidate.normalized_onset(),
        }
    }

    fn at(&self, i: usize, j: usize) -> f64 {
        let pitch = match (
            self.reference.frames[i].pitch_hz,
            self.candidate.frames[j].pitch_hz,
        ) {
            (Some(r), Some(c)) => {
                self.config.pitch_weight * semitone_difference(r, c).min(self.config.pitch_cap_semitones)
            }
            (None, None) => 0.0,
            _ => self.config.voicing_mismatch_cost,
        };

        pitch
            + self.config.energy_weight * (self.reference_energy[i] - self.candidate_energy[j]).abs()
            + self.config.onset_weight * (self.reference_onset[i] - self.candidate_onset[j]).abs()
    }
}
