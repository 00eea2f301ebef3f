//! Frame-level vocal features

use serde::{Deserialize, Serialize};

/// Features of one analysis frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Frame start relative to the start of the recording
    pub offset_ms: u64,
    /// Fundamental frequency, `None` when unvoiced
    pub pitch_hz: Option<f32>,
    /// Short-time RMS (linear amplitude)
    pub energy: f32,
    /// Onset strength, 0 for non-peak frames
    pub onset: f32,
}

impl FeatureFrame {
    pub fn is_voiced(&self) -> bool {
        self.pitch_hz.is_some()
    }
}

/// Ordered feature frames at a fixed hop
///
/// Never mutated after extraction; pooling produces a new sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSequence {
    pub hop_ms: u32,
    pub frames: Vec<FeatureFrame>,
}

impl FeatureSequence {
    pub fn new(hop_ms: u32, frames: Vec<FeatureFrame>) -> Self {
        Self { hop_ms, frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Covered duration: frame count × hop
    pub fn duration_ms(&self) -> u64 {
        self.frames.len() as u64 * self.hop_ms as u64
    }

    pub fn voiced_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_voiced()).count()
    }

    pub fn voiced_ratio(&self) -> f64 {
        if self.frames.is_empty() {
            return 0.0;
        }
        self.voiced_count() as f64 / self.frames.len() as f64
    }

    /// Energy divided by the sequence maximum (all zeros for a silent sequence)
    pub fn normalized_energy(&self) -> Vec<f64> {
        normalize(self.frames.iter().map(|f| f.energy as f64))
    }

    /// Onset strength divided by the sequence maximum
    pub fn normalized_onset(&self) -> Vec<f64> {
        normalize(self.frames.iter().map(|f| f.onset as f64))
    }

    /// Pool every `factor` frames into one
    ///
    /// A pooled frame is voiced when most of its frames are voiced (median
    /// pitch of the voiced ones), carries the mean energy, the maximum onset
    /// and the offset of its first frame.
    pub fn decimate(&self, factor: usize) -> FeatureSequence {
        if factor <= 1 {
            return self.clone();
        }

        let frames = self
            .frames
            .chunks(factor)
            .map(|chunk| {
                let mut voiced: Vec<f32> = chunk.iter().filter_map(|f| f.pitch_hz).collect();
                let pitch_hz = if voiced.len() * 2 > chunk.len() {
                    voiced.sort_by(|a, b| a.total_cmp(b));
                    Some(voiced[voiced.len() / 2])
                } else {
                    None
                };
                let energy = chunk.iter().map(|f| f.energy).sum::<f32>() / chunk.len() as f32;
                let onset = chunk.iter().map(|f| f.onset).fold(0.0f32, f32::max);

                FeatureFrame {
                    offset_ms: chunk[0].offset_ms,
                    pitch_hz,
                    energy,
                    onset,
                }
            })
            .collect();

        FeatureSequence {
            hop_ms: self.hop_ms.saturating_mul(factor as u32),
            frames,
        }
    }
}

fn normalize(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let values: Vec<f64> = values.collect();
    let max = values.iter().cloned().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| v / max).collect()
}

/// Semitone distance between two frequencies
pub fn semitone_difference(a_hz: f32, b_hz: f32) -> f64 {
    (12.0 * (a_hz as f64 / b_hz as f64).log2()).abs()
}
