//! Audio Test Fixture Generator
//!
//! Writes 16-bit mono WAV files made of sine notes and rests.

use std::path::{Path, PathBuf};

/// One note (or rest, when `freq_hz` is None)
#[derive(Debug, Clone, Copy)]
pub struct Note {
    pub freq_hz: Option<f32>,
    pub duration_ms: u32,
    pub amplitude: f32,
}

impl Note {
    pub fn tone(freq_hz: f32, duration_ms: u32, amplitude: f32) -> Self {
        Self {
            freq_hz: Some(freq_hz),
            duration_ms,
            amplitude,
        }
    }

    pub fn rest(duration_ms: u32) -> Self {
        Self {
            freq_hz: None,
            duration_ms,
            amplitude: 0.0,
        }
    }
}

/// Eight 500 ms notes (4 s) with varying loudness
pub fn melody() -> Vec<Note> {
    [
        (220.0, 0.35),
        (246.9, 0.45),
        (261.6, 0.55),
        (293.7, 0.6),
        (329.6, 0.5),
        (293.7, 0.4),
        (261.6, 0.45),
        (246.9, 0.3),
    ]
    .iter()
    .map(|&(freq, amplitude)| Note::tone(freq, 500, amplitude))
    .collect()
}

pub fn silence(duration_ms: u32) -> Vec<Note> {
    vec![Note::rest(duration_ms)]
}

/// Write `notes` as a mono 16-bit WAV at `sample_rate`
///
/// Phase is carried across notes so note changes do not click.
pub fn write_wav(path: &Path, sample_rate: u32, notes: &[Note]) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();

    let mut phase = 0.0f64;
    for note in notes {
        let samples = note.duration_ms as u64 * sample_rate as u64 / 1000;
        for _ in 0..samples {
            let value = match note.freq_hz {
                Some(freq) => {
                    phase += 2.0 * std::f64::consts::PI * freq as f64 / sample_rate as f64;
                    note.amplitude as f64 * phase.sin()
                }
                None => 0.0,
            };
            writer.write_sample((value * i16::MAX as f64) as i16).unwrap();
        }
    }

    writer.finalize().unwrap();
    path.to_path_buf()
}
