//! Audio level normalization for endpointing.
//!
//! The endpoint detector consumes a normalized level in [0, 1]; this module
//! produces it from raw f32 PCM buffers. The meter applies exponential
//! smoothing with a fast attack and slow release so a single loud sample
//! registers immediately while decay is gradual.

/// Normalized RMS of f32 samples (expected range -1.0 to 1.0).
///
/// 0.0 is silence, ~0.707 a full-scale sine wave, 1.0 maximum amplitude.
pub fn normalized_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / samples.len() as f64).sqrt() as f32).clamp(0.0, 1.0)
}

/// A level meter tracking the smoothed normalized level of a stream.
#[derive(Clone, Debug)]
pub struct LevelMeter {
    /// Smoothing factor (0.0 = no smoothing, 0.99 = very smooth).
    smoothing: f32,
    smoothed: f32,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl LevelMeter {
    pub fn new(smoothing: f32) -> Self {
        Self { smoothing: smoothing.clamp(0.0, 0.99), smoothed: 0.0 }
    }

    /// Process a buffer and return the smoothed normalized level.
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        let level = normalized_rms(samples);
        if level > self.smoothed {
            // Instant attack: speech onsets must not be softened away.
            self.smoothed = level;
        } else {
            self.smoothed = self.smoothing * self.smoothed + (1.0 - self.smoothing) * level;
        }
        self.smoothed
    }

    pub fn current(&self) -> f32 {
        self.smoothed
    }

    /// Reset the meter to initial state, e.g. between utterances.
    pub fn reset(&mut self) {
        self.smoothed = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_zero() {
        assert_eq!(normalized_rms(&vec![0.0; 1920]), 0.0);
        assert_eq!(normalized_rms(&[]), 0.0);
    }

    #[test]
    fn full_scale_square_wave_is_one() {
        let samples: Vec<f32> =
            (0..1920).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let rms = normalized_rms(&samples);
        assert!((rms - 1.0).abs() < 1e-4, "expected ~1.0, got {rms}");
    }

    #[test]
    fn half_amplitude_is_half() {
        let samples: Vec<f32> =
            (0..1920).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let rms = normalized_rms(&samples);
        assert!((rms - 0.5).abs() < 1e-4, "expected ~0.5, got {rms}");
    }

    #[test]
    fn meter_attacks_instantly_and_releases_slowly() {
        let mut meter = LevelMeter::new(0.5);
        let loud: Vec<f32> = (0..1920).map(|i| if i % 2 == 0 { 0.8 } else { -0.8 }).collect();
        let quiet = vec![0.0f32; 1920];

        let attack = meter.process(&loud);
        assert!((attack - 0.8).abs() < 1e-4, "attack should be instant, got {attack}");

        let release = meter.process(&quiet);
        assert!(release > 0.0 && release < attack, "release should decay, got {release}");
    }

    #[test]
    fn meter_reset_clears_state() {
        let mut meter = LevelMeter::default();
        meter.process(&vec![0.5f32; 100]);
        assert!(meter.current() > 0.0);
        meter.reset();
        assert_eq!(meter.current(), 0.0);
    }
}
