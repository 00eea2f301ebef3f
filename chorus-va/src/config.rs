//! Configuration for chorus-va
//!
//! The TOML file carries the shared `root_folder` and `logging` keys plus an
//! `[analysis]` table. Every analysis field has a serde default, so a partial
//! file (or no file at all) yields a working configuration.

use chorus_common::config::LoggingConfig;
use chorus_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level chorus-va TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaTomlConfig {
    /// Root folder (overridden by CLI / environment)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// All pipeline tunables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub isolation: IsolationConfig,

    #[serde(default)]
    pub alignment: AlignmentConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub coaching: CoachingConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

impl AnalysisConfig {
    /// Reject values that would make every score meaningless
    pub fn validate(&self) -> Result<()> {
        self.extraction.validate()?;
        self.isolation.validate()?;
        self.alignment.validate()?;
        self.scoring.validate()?;
        self.coaching.validate()?;
        self.jobs.validate()?;
        Ok(())
    }
}

/// Feature extraction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Frame hop in milliseconds (default: 10ms)
    #[serde(default = "default_hop_ms")]
    pub hop_ms: u32,

    /// Rate the signal is resampled to before pitch tracking (default: 16kHz)
    #[serde(default = "default_analysis_sample_rate")]
    pub analysis_sample_rate: u32,

    /// Lowest detectable F0 in Hz (default: 65Hz)
    #[serde(default = "default_min_pitch_hz")]
    pub min_pitch_hz: f32,

    /// Highest detectable F0 in Hz (default: 1000Hz)
    #[serde(default = "default_max_pitch_hz")]
    pub max_pitch_hz: f32,

    /// YIN aperiodicity threshold; frames above it are unvoiced (default: 0.15)
    #[serde(default = "default_yin_threshold")]
    pub yin_threshold: f32,

    /// Frames quieter than this (dBFS RMS) are unvoiced (default: -45dB)
    #[serde(default = "default_voicing_gate_db")]
    pub voicing_gate_db: f32,

    /// Recording is silent when every frame is below this (default: -50dB)
    #[serde(default = "default_noise_floor_db")]
    pub noise_floor_db: f32,

    /// Shortest accepted recording in milliseconds (default: 1000ms)
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: u64,

    /// Onset peak must exceed this multiple of the local mean flux (default: 1.5)
    #[serde(default = "default_onset_threshold_multiplier")]
    pub onset_threshold_multiplier: f32,

    /// Half-width in frames of the adaptive onset window (default: 10)
    #[serde(default = "default_onset_window_frames")]
    pub onset_window_frames: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            hop_ms: default_hop_ms(),
            analysis_sample_rate: default_analysis_sample_rate(),
            min_pitch_hz: default_min_pitch_hz(),
            max_pitch_hz: default_max_pitch_hz(),
            yin_threshold: default_yin_threshold(),
            voicing_gate_db: default_voicing_gate_db(),
            noise_floor_db: default_noise_floor_db(),
            min_duration_ms: default_min_duration_ms(),
            onset_threshold_multiplier: default_onset_threshold_multiplier(),
            onset_window_frames: default_onset_window_frames(),
        }
    }
}

impl ExtractionConfig {
    fn validate(&self) -> Result<()> {
        if self.hop_ms == 0 {
            return Err(Error::Config("extraction.hop_ms must be > 0".to_string()));
        }
        if self.analysis_sample_rate < 8000 {
            return Err(Error::Config(
                "extraction.analysis_sample_rate must be >= 8000".to_string(),
            ));
        }
        if !(self.min_pitch_hz > 0.0 && self.min_pitch_hz < self.max_pitch_hz) {
            return Err(Error::Config(format!(
                "extraction pitch range invalid: {}..{} Hz",
                self.min_pitch_hz, self.max_pitch_hz
            )));
        }
        if self.max_pitch_hz * 2.0 > self.analysis_sample_rate as f32 {
            return Err(Error::Config(
                "extraction.max_pitch_hz exceeds Nyquist of the analysis rate".to_string(),
            ));
        }
        if !(self.yin_threshold > 0.0 && self.yin_threshold < 1.0) {
            return Err(Error::Config(
                "extraction.yin_threshold must be in (0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// What to do when vocal isolation fails while preparing a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationFallback {
    /// Use the unseparated mix and flag the reference as degraded
    Degrade,
    /// Fail the reference
    Fail,
}

/// Source isolation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationConfig {
    /// Run the separator at all (default: true)
    #[serde(default = "default_isolation_enabled")]
    pub enabled: bool,

    /// Separation executable (e.g. "demucs"); no command means no separator
    #[serde(default)]
    pub command: Option<String>,

    /// Arguments; `{input}`, `{output_dir}` and `{model}` are substituted
    #[serde(default = "default_isolation_args")]
    pub args: Vec<String>,

    /// File name of the vocal stem inside the output directory tree
    #[serde(default = "default_stem_file_name")]
    pub stem_file_name: String,

    /// Separation model identifier recorded on the reference
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Behaviour on separation failure (default: degrade)
    #[serde(default = "default_isolation_fallback")]
    pub fallback: IsolationFallback,

    /// Concurrent separations (accelerator capacity) (default: 1)
    #[serde(default = "default_isolation_concurrency")]
    pub concurrency: usize,

    /// Kill the separator after this many seconds (default: 600s)
    #[serde(default = "default_isolation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            enabled: default_isolation_enabled(),
            command: None,
            args: default_isolation_args(),
            stem_file_name: default_stem_file_name(),
            model_id: default_model_id(),
            fallback: default_isolation_fallback(),
            concurrency: default_isolation_concurrency(),
            timeout_secs: default_isolation_timeout_secs(),
        }
    }
}

impl IsolationConfig {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("isolation.concurrency must be > 0".to_string()));
        }
        if self.stem_file_name.trim().is_empty() {
            return Err(Error::Config(
                "isolation.stem_file_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// DTW alignment parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Band half-width as a fraction of the reference length in frames (default: 0.20)
    #[serde(default = "default_band_ratio")]
    pub band_ratio: f64,

    /// Smallest accepted candidate/reference duration ratio (default: 0.33)
    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f64,

    /// Largest accepted candidate/reference duration ratio (default: 3.0)
    #[serde(default = "default_max_length_ratio")]
    pub max_length_ratio: f64,

    #[serde(default = "default_pitch_weight")]
    pub pitch_weight: f64,

    /// Semitone difference is capped here before weighting (default: 6.0)
    #[serde(default = "default_pitch_cap_semitones")]
    pub pitch_cap_semitones: f64,

    /// Cost when exactly one of the two frames is voiced (default: 4.0)
    #[serde(default = "default_voicing_mismatch_cost")]
    pub voicing_mismatch_cost: f64,

    #[serde(default = "default_energy_weight")]
    pub energy_weight: f64,

    #[serde(default = "default_onset_weight")]
    pub onset_weight: f64,

    /// Small penalty for leaving the diagonal; breaks ties on flat regions
    #[serde(default = "default_diagonal_bias")]
    pub diagonal_bias: f64,

    /// Longer sequences are pooled down to this many frames (default: 4000)
    #[serde(default = "default_max_alignment_frames")]
    pub max_alignment_frames: usize,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            band_ratio: default_band_ratio(),
            min_length_ratio: default_min_length_ratio(),
            max_length_ratio: default_max_length_ratio(),
            pitch_weight: default_pitch_weight(),
            pitch_cap_semitones: default_pitch_cap_semitones(),
            voicing_mismatch_cost: default_voicing_mismatch_cost(),
            energy_weight: default_energy_weight(),
            onset_weight: default_onset_weight(),
            diagonal_bias: default_diagonal_bias(),
            max_alignment_frames: default_max_alignment_frames(),
        }
    }
}

impl AlignmentConfig {
    fn validate(&self) -> Result<()> {
        if !(self.band_ratio > 0.0 && self.band_ratio <= 1.0) {
            return Err(Error::Config(
                "alignment.band_ratio must be in (0, 1]".to_string(),
            ));
        }
        if !(self.min_length_ratio > 0.0
            && self.min_length_ratio < 1.0
            && self.max_length_ratio > 1.0)
        {
            return Err(Error::Config(format!(
                "alignment length ratio bounds invalid: {} / {}",
                self.min_length_ratio, self.max_length_ratio
            )));
        }
        let weights = [
            self.pitch_weight,
            self.pitch_cap_semitones,
            self.voicing_mismatch_cost,
            self.energy_weight,
            self.onset_weight,
            self.diagonal_bias,
        ];
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            return Err(Error::Config(
                "alignment costs and weights must be non-negative".to_string(),
            ));
        }
        if self.max_alignment_frames < 16 {
            return Err(Error::Config(
                "alignment.max_alignment_frames must be >= 16".to_string(),
            ));
        }
        Ok(())
    }
}

/// Aggregate score weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_pitch_score_weight")]
    pub pitch: f64,
    #[serde(default = "default_timing_score_weight")]
    pub timing: f64,
    #[serde(default = "default_dynamics_score_weight")]
    pub dynamics: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            pitch: default_pitch_score_weight(),
            timing: default_timing_score_weight(),
            dynamics: default_dynamics_score_weight(),
        }
    }
}

impl ScoringWeights {
    /// Weighted aggregate of the three sub-scores
    pub fn aggregate(&self, pitch: f64, timing: f64, dynamics: f64) -> f64 {
        self.pitch * pitch + self.timing * timing + self.dynamics * dynamics
    }

    /// Aggregate over timing and dynamics only, re-normalised
    pub fn aggregate_without_pitch(&self, timing: f64, dynamics: f64) -> f64 {
        let total = self.timing + self.dynamics;
        if total <= 0.0 {
            return 0.0;
        }
        (self.timing * timing + self.dynamics * dynamics) / total
    }
}

/// Scoring parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoringWeights,

    /// Deviation that maps to pitch score 0 (default: 2.0 semitones)
    #[serde(default = "default_pitch_tolerance_semitones")]
    pub pitch_tolerance_semitones: f64,

    /// Deviation that maps to timing score 0 (default: 400ms)
    #[serde(default = "default_timing_tolerance_ms")]
    pub timing_tolerance_ms: f64,

    /// Tempo change tolerated without penalty (default: 0.10)
    #[serde(default = "default_tempo_tolerance")]
    pub tempo_tolerance: f64,

    /// Sections voiced less than this have no pitch score (default: 0.05)
    #[serde(default = "default_section_min_voiced_ratio")]
    pub section_min_voiced_ratio: f64,

    /// Equal sections used when none are supplied (default: 4)
    #[serde(default = "default_section_count")]
    pub default_section_count: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            pitch_tolerance_semitones: default_pitch_tolerance_semitones(),
            timing_tolerance_ms: default_timing_tolerance_ms(),
            tempo_tolerance: default_tempo_tolerance(),
            section_min_voiced_ratio: default_section_min_voiced_ratio(),
            default_section_count: default_section_count(),
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        let w = &self.weights;
        if w.pitch < 0.0 || w.timing < 0.0 || w.dynamics < 0.0 {
            return Err(Error::Config(
                "scoring weights must be non-negative".to_string(),
            ));
        }
        let sum = w.pitch + w.timing + w.dynamics;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "scoring weights must sum to 1.0 (got {})",
                sum
            )));
        }
        if self.pitch_tolerance_semitones <= 0.0 || self.timing_tolerance_ms <= 0.0 {
            return Err(Error::Config(
                "scoring tolerances must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.tempo_tolerance) {
            return Err(Error::Config(
                "scoring.tempo_tolerance must be in [0, 1)".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.section_min_voiced_ratio) {
            return Err(Error::Config(
                "scoring.section_min_voiced_ratio must be in [0, 1]".to_string(),
            ));
        }
        if self.default_section_count == 0 {
            return Err(Error::Config(
                "scoring.default_section_count must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Coaching tip generation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachingConfig {
    /// Text-generation endpoint; template tips only when absent
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model name sent to the endpoint
    #[serde(default = "default_coaching_model")]
    pub model: String,

    #[serde(default = "default_coaching_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_tips")]
    pub max_tips: usize,

    /// Axes scoring below this get a tip (default: 75)
    #[serde(default = "default_weak_axis_threshold")]
    pub weak_axis_threshold: f64,
}

impl Default for CoachingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: default_coaching_model(),
            timeout_secs: default_coaching_timeout_secs(),
            max_tips: default_max_tips(),
            weak_axis_threshold: default_weak_axis_threshold(),
        }
    }
}

impl CoachingConfig {
    fn validate(&self) -> Result<()> {
        if self.max_tips == 0 {
            return Err(Error::Config("coaching.max_tips must be > 0".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("coaching.timeout_secs must be > 0".to_string()));
        }
        if !(0.0..=100.0).contains(&self.weak_axis_threshold) {
            return Err(Error::Config(
                "coaching.weak_axis_threshold must be in [0, 100]".to_string(),
            ));
        }
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "coaching.endpoint must be an http(s) URL: {:?}",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}

/// Job queue and worker pool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Attempts wait this long for a reference still being prepared (default: 900s)
    #[serde(default = "default_reference_wait_timeout_secs")]
    pub reference_wait_timeout_secs: u64,

    #[serde(default = "default_reference_poll_interval_ms")]
    pub reference_poll_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            reference_wait_timeout_secs: default_reference_wait_timeout_secs(),
            reference_poll_interval_ms: default_reference_poll_interval_ms(),
        }
    }
}

impl JobsConfig {
    fn validate(&self) -> Result<()> {
        if self.worker_count == 0 || self.queue_capacity == 0 {
            return Err(Error::Config(
                "jobs.worker_count and jobs.queue_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_hop_ms() -> u32 {
    10
}

fn default_analysis_sample_rate() -> u32 {
    16_000
}

fn default_min_pitch_hz() -> f32 {
    65.0
}

fn default_max_pitch_hz() -> f32 {
    1000.0
}

fn default_yin_threshold() -> f32 {
    0.15
}

fn default_voicing_gate_db() -> f32 {
    -45.0
}

fn default_noise_floor_db() -> f32 {
    -50.0
}

fn default_min_duration_ms() -> u64 {
    1000
}

fn default_onset_threshold_multiplier() -> f32 {
    1.5
}

fn default_onset_window_frames() -> usize {
    10
}

fn default_isolation_enabled() -> bool {
    true
}

fn default_isolation_args() -> Vec<String> {
    vec![
        "--two-stems=vocals".to_string(),
        "-n".to_string(),
        "{model}".to_string(),
        "-o".to_string(),
        "{output_dir}".to_string(),
        "{input}".to_string(),
    ]
}

fn default_stem_file_name() -> String {
    "vocals.wav".to_string()
}

fn default_model_id() -> String {
    "htdemucs".to_string()
}

fn default_isolation_fallback() -> IsolationFallback {
    IsolationFallback::Degrade
}

fn default_isolation_concurrency() -> usize {
    1
}

fn default_isolation_timeout_secs() -> u64 {
    600
}

fn default_band_ratio() -> f64 {
    0.20
}

fn default_min_length_ratio() -> f64 {
    0.33
}

fn default_max_length_ratio() -> f64 {
    3.0
}

fn default_pitch_weight() -> f64 {
    1.0
}

fn default_pitch_cap_semitones() -> f64 {
    6.0
}

fn default_voicing_mismatch_cost() -> f64 {
    4.0
}

fn default_energy_weight() -> f64 {
    2.0
}

fn default_onset_weight() -> f64 {
    1.0
}

fn default_diagonal_bias() -> f64 {
    0.05
}

fn default_max_alignment_frames() -> usize {
    4000
}

fn default_pitch_score_weight() -> f64 {
    0.5
}

fn default_timing_score_weight() -> f64 {
    0.3
}

fn default_dynamics_score_weight() -> f64 {
    0.2
}

fn default_pitch_tolerance_semitones() -> f64 {
    2.0
}

fn default_timing_tolerance_ms() -> f64 {
    400.0
}

fn default_tempo_tolerance() -> f64 {
    0.10
}

fn default_section_min_voiced_ratio() -> f64 {
    0.05
}

fn default_section_count() -> usize {
    4
}

fn default_coaching_model() -> String {
    "llama3".to_string()
}

fn default_coaching_timeout_secs() -> u64 {
    10
}

fn default_max_tips() -> usize {
    3
}

fn default_weak_axis_threshold() -> f64 {
    75.0
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_reference_wait_timeout_secs() -> u64 {
    900
}

fn default_reference_poll_interval_ms() -> u64 {
    500
}
