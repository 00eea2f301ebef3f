//! YIN fundamental frequency tracking
//!
//! Difference function, cumulative-mean-normalised difference (CMND),
//! absolute threshold with a walk to the local minimum, then parabolic
//! interpolation around the chosen lag. The lag search is restricted to the
//! configured singing range so octave-up errors below `min_hz` cannot occur.

/// Per-frame pitch estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEstimate {
    pub frequency_hz: f32,
    /// CMND value at the chosen lag (0 = perfectly periodic)
    pub aperiodicity: f32,
}

/// YIN tracker for one sample rate and pitch range
#[derive(Debug, Clone)]
pub struct YinPitchTracker {
    sample_rate: u32,
    tau_min: usize,
    tau_max: usize,
    threshold: f32,
}

impl YinPitchTracker {
    pub fn new(sample_rate: u32, min_hz: f32, max_hz: f32, threshold: f32) -> Self {
        let tau_min = ((sample_rate as f32 / max_hz).floor() as usize).max(2);
        let tau_max = ((sample_rate as f32 / min_hz).ceil() as usize).max(tau_min + 1);
        Self {
            sample_rate,
            tau_min,
            tau_max,
            threshold,
        }
    }

    /// Samples one call to `estimate` needs
    ///
    /// Integration window of `tau_max` samples plus room for the largest lag
    /// and one extra lag for interpolation.
    pub fn frame_len(&self) -> usize {
        2 * self.tau_max + 2
    }

    fn window_len(&self) -> usize {
        self.tau_max
    }

    /// Estimate F0 of `frame`; `None` when the frame is aperiodic
    pub fn estimate(&self, frame: &[f32]) -> Option<PitchEstimate> {
        if frame.len() < self.frame_len() {
            return None;
        }

        let cmnd = self.cmnd(frame);

        let mut tau = self.tau_min;
        let mut found = None;
        while tau <= self.tau_max {
            if cmnd[tau] < self.threshold {
                while tau < self.tau_max && cmnd[tau + 1] < cmnd[tau] {
                    tau += 1;
                }
                found = Some(tau);
                break;
            }
            tau += 1;
        }
        let tau = found?;

        let y1 = cmnd[tau - 1];
        let y2 = cmnd[tau];
        let y3 = cmnd[tau + 1];
        let denominator = y1 - 2.0 * y2 + y3;
        let period = if denominator.abs() > f32::EPSILON {
            let shift = (y1 - y3) / (2.0 * denominator);
            tau as f32 + shift.clamp(-1.0, 1.0)
        } else {
            tau as f32
        };

        let frequency_hz = self.sample_rate as f32 / period;
        if frequency_hz.is_finite() && frequency_hz > 0.0 {
            Some(PitchEstimate {
                frequency_hz,
                aperiodicity: y2.max(0.0),
            })
        } else {
            None
        }
    }

    /// CMND for lags 0..=tau_max+1
    fn cmnd(&self, frame: &[f32]) -> Vec<f32> {
        let window = self.window_len();
        let max_lag = self.tau_max + 1;
        let mut cmnd = vec![1.0f32; max_lag + 1];

        let mut running_sum = 0.0f32;
        for tau in 1..=max_lag {
            let mut diff = 0.0f32;
            for j in 0..window {
                let delta = frame[j] - frame[j + tau];
                diff += delta * delta;
            }
            running_sum += diff;
            cmnd[tau] = if running_sum > 0.0 {
                diff * tau as f32 / running_sum
            } else {
                1.0
            };
        }

        cmnd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_detects_sine_within_two_percent() {
        let tracker = YinPitchTracker::new(16000, 65.0, 1000.0, 0.15);
        for freq in [110.0f32, 220.0, 392.0, 880.0] {
            let frame = sine(freq, 16000, tracker.frame_len());
            let estimate = tracker.estimate(&frame).expect("voiced");
            let error = (estimate.frequency_hz - freq).abs() / freq;
            assert!(error < 0.02, "{} Hz detected as {}", freq, estimate.frequency_hz);
        }
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let tracker = YinPitchTracker::new(16000, 65.0, 1000.0, 0.15);
        let frame = vec![0.0f32; tracker.frame_len()];
        assert!(tracker.estimate(&frame).is_none());
    }

    #[test]
    fn test_noise_is_unvoiced() {
        let tracker = YinPitchTracker::new(16000, 65.0, 1000.0, 0.15);
        let mut state = 12345u32;
        let frame: Vec<f32> = (0..tracker.frame_len())
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                ((state >> 16) & 0x7fff) as f32 / 16384.0 - 1.0
            })
            .collect();
        assert!(tracker.estimate(&frame).is_none());
    }

    #[test]
    fn test_short_frame_is_unvoiced() {
        let tracker = YinPitchTracker::new(16000, 65.0, 1000.0, 0.15);
        let frame = sine(220.0, 16000, tracker.frame_len() - 1);
        assert!(tracker.estimate(&frame).is_none());
    }
}
