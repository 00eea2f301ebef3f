//! Feature extraction: pitch contour, energy envelope and onset markers
//!
//! The signal is resampled to the analysis rate, cut into hop-spaced
//! frames, and every frame is analysed independently (in parallel). Onsets
//! need neighbouring frames, so they are picked in a second sequential pass.

use rayon::prelude::*;
use std::path::Path;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::error::AnalysisError;
use crate::models::{FeatureFrame, FeatureSequence};
use crate::services::pitch::YinPitchTracker;
use crate::utils::{decode_audio_file, resample_mono};

/// Extracts FeatureSequences from mono audio
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: ExtractionConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Decode an audio file and extract its features
    pub fn extract_file(&self, path: &Path) -> Result<FeatureSequence, AnalysisError> {
        let decoded = decode_audio_file(path)?;
        self.extract(&decoded.samples, decoded.sample_rate)
    }

    /// Extract features from mono samples at `sample_rate`
    ///
    /// Fails with `Decode` when the signal is shorter than the configured
    /// minimum and with `Silence` when every frame is below the noise floor.
    pub fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<FeatureSequence, AnalysisError> {
        if sample_rate == 0 {
            return Err(AnalysisError::Decode("Sample rate is zero".to_string()));
        }

        let duration_ms = samples.len() as u64 * 1000 / sample_rate as u64;
        if duration_ms < self.config.min_duration_ms {
            return Err(AnalysisError::Decode(format!(
                "Recording too short: {} ms (minimum {} ms)",
                duration_ms, self.config.min_duration_ms
            )));
        }

        let analysis_rate = self.config.analysis_sample_rate;
        let signal = resample_mono(samples, sample_rate, analysis_rate)?;

        let hop_samples = (analysis_rate as u64 * self.config.hop_ms as u64 / 1000).max(1) as usize;
        let frame_count = signal.len() / hop_samples;
        if frame_count == 0 {
            return Err(AnalysisError::Decode("Recording produced no frames".to_string()));
        }

        let tracker = YinPitchTracker::new(
            analysis_rate,
            self.config.min_pitch_hz,
            self.config.max_pitch_hz,
            self.config.yin_threshold,
        );
        let frame_len = tracker.frame_len();
        let voicing_gate = db_to_amplitude(self.config.voicing_gate_db);

        let analysed: Vec<(Option<f32>, f32)> = (0..frame_count)
            .into_par_iter()
            .map(|index| {
                let start = index * hop_samples;
                let frame = padded_frame(&signal, start, frame_len);
                let energy = rms(&frame);
                let pitch = if energy >= voicing_gate {
                    tracker.estimate(&frame).map(|p| p.frequency_hz)
                } else {
                    None
                };
                (pitch, energy)
            })
            .collect();

        let noise_floor = db_to_amplitude(self.config.noise_floor_db);
        if analysed.iter().all(|(_, energy)| *energy < noise_floor) {
            return Err(AnalysisError::Silence(format!(
                "Every analysis window is below {} dBFS",
                self.config.noise_floor_db
            )));
        }

        let energies: Vec<f32> = analysed.iter().map(|(_, energy)| *energy).collect();
        let onsets = pick_onsets(
            &energies,
            self.config.onset_window_frames,
            self.config.onset_threshold_multiplier,
        );

        let frames: Vec<FeatureFrame> = analysed
            .into_iter()
            .zip(onsets)
            .enumerate()
            .map(|(index, ((pitch_hz, energy), onset))| FeatureFrame {
                offset_ms: index as u64 * self.config.hop_ms as u64,
                pitch_hz,
                energy,
                onset,
            })
            .collect();

        let sequence = FeatureSequence::new(self.config.hop_ms, frames);
        debug!(
            frames = sequence.len(),
            voiced = sequence.voiced_count(),
            duration_ms,
            "Feature extraction complete"
        );
        Ok(sequence)
    }
}

/// `frame_len` samples starting at `start`, zero-padded past the end
fn padded_frame(signal: &[f32], start: usize, frame_len: usize) -> Vec<f32> {
    let end = (start + frame_len).min(signal.len());
    let mut frame = Vec::with_capacity(frame_len);
    frame.extend_from_slice(&signal[start..end]);
    frame.resize(frame_len, 0.0);
    frame
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32).sqrt()
}

fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Half-wave rectified energy flux with adaptive-threshold peak picking
///
/// A frame is an onset when its flux is a local maximum and exceeds
/// `multiplier` times the mean flux within `±window` frames.
fn pick_onsets(energies: &[f32], window: usize, multiplier: f32) -> Vec<f32> {
    let n = energies.len();
    let flux: Vec<f32> = (0..n)
        .map(|i| {
            let previous = if i == 0 { 0.0 } else { energies[i - 1] };
            (energies[i] - previous).max(0.0)
        })
        .collect();

    (0..n)
        .map(|i| {
            let current = flux[i];
            if current <= f32::EPSILON {
                return 0.0;
            }
            let left = if i == 0 { 0.0 } else { flux[i - 1] };
            let right = if i + 1 < n { flux[i + 1] } else { 0.0 };
            if current <= left || current < right {
                return 0.0;
            }

            let lo = i.saturating_sub(window);
            let hi = (i + window).min(n - 1);
            let local_mean = flux[lo..=hi].iter().sum::<f32>() / (hi - lo + 1) as f32;
            if current > multiplier * local_mean {
                current
            } else {
                0.0
            }
        })
        .collect()
}
