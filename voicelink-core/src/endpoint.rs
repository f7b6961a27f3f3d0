// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Utterance endpointing.
//!
//! `EndpointDetector` turns a stream of (normalized audio level, buffer
//! duration) samples into a single decision: keep listening or commit the
//! utterance. It is a pure state machine with no timers of its own; the
//! audio-capture loop owns the cadence and feeds it one buffer at a time.
//!
//! The thresholds use hysteresis: once speech has been detected it is easier
//! to stay "in speech" (`speaking_floor`) than it was to enter it
//! (`speaking_start`), so momentary dips mid-word do not clip the utterance.

/// Endpointing thresholds. Levels are normalized to [0, 1], durations are
/// seconds. Selected once per utterance from an [`EndpointProfile`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointConfig {
    /// Level at or above which speech is considered to have started.
    pub speaking_start: f64,
    /// Level at or above which ongoing speech is considered to continue.
    pub speaking_floor: f64,
    /// Utterances shorter than this are not committed on ordinary trailing
    /// silence.
    pub minimum_utterance: f64,
    /// Trailing silence that commits an utterance of sufficient length.
    pub trailing_silence_to_commit: f64,
    /// Hard cap on accumulated speech; bounds worst-case latency and cost.
    pub max_utterance: f64,
    /// Gives up when nothing was said for this long, and also resolves
    /// too-short blips followed by long silence.
    pub pre_speech_timeout: f64,
}

/// Named tunings of the same algorithm, trading responsiveness against
/// robustness to false triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointProfile {
    Fast,
    #[default]
    Balanced,
    Patient,
}

impl EndpointProfile {
    pub fn config(&self) -> EndpointConfig {
        match self {
            EndpointProfile::Fast => EndpointConfig {
                speaking_start: 0.25,
                speaking_floor: 0.15,
                minimum_utterance: 0.3,
                trailing_silence_to_commit: 0.6,
                max_utterance: 10.0,
                pre_speech_timeout: 4.0,
            },
            EndpointProfile::Balanced => EndpointConfig {
                speaking_start: 0.2,
                speaking_floor: 0.12,
                minimum_utterance: 0.5,
                trailing_silence_to_commit: 0.9,
                max_utterance: 30.0,
                pre_speech_timeout: 6.0,
            },
            EndpointProfile::Patient => EndpointConfig {
                speaking_start: 0.18,
                speaking_floor: 0.1,
                minimum_utterance: 0.8,
                trailing_silence_to_commit: 1.4,
                max_utterance: 60.0,
                pre_speech_timeout: 8.0,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointProfile::Fast => "fast",
            EndpointProfile::Balanced => "balanced",
            EndpointProfile::Patient => "patient",
        }
    }
}

impl std::str::FromStr for EndpointProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(EndpointProfile::Fast),
            "balanced" => Ok(EndpointProfile::Balanced),
            "patient" => Ok(EndpointProfile::Patient),
            _ => Err(format!("unknown endpoint profile '{s}'")),
        }
    }
}

/// Decision returned for each ingested buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDecision {
    ContinueListening,
    EndAudio,
}

// Accumulated buffer durations carry float rounding error (~1e-14 after
// thousands of additions); real threshold differences are >= 10ms. The
// epsilon keeps boundary comparisons deterministic.
const DURATION_EPSILON: f64 = 1e-9;

fn reached(value: f64, limit: f64) -> bool {
    value + DURATION_EPSILON >= limit
}

/// Endpointing state machine for exactly one utterance. `EndAudio` is
/// returned at most once; afterwards the instance is inert and a new
/// utterance requires a new instance.
#[derive(Debug)]
pub struct EndpointDetector {
    config: EndpointConfig,
    has_detected_speech: bool,
    has_ended: bool,
    total_duration: f64,
    utterance_duration: f64,
    trailing_silence_duration: f64,
}

impl EndpointDetector {
    pub fn new(config: EndpointConfig) -> Self {
        Self {
            config,
            has_detected_speech: false,
            has_ended: false,
            total_duration: 0.0,
            utterance_duration: 0.0,
            trailing_silence_duration: 0.0,
        }
    }

    pub fn with_profile(profile: EndpointProfile) -> Self {
        Self::new(profile.config())
    }

    /// Feed one audio buffer's normalized level and duration.
    ///
    /// Total over its domain: out-of-range levels are clamped and
    /// non-positive durations are ignored rather than rejected.
    pub fn ingest(&mut self, level: f64, duration: f64) -> EndpointDecision {
        if self.has_ended || !(duration > 0.0) {
            return EndpointDecision::ContinueListening;
        }
        let level = level.clamp(0.0, 1.0);
        self.total_duration += duration;

        let threshold = if self.has_detected_speech {
            self.config.speaking_floor
        } else {
            self.config.speaking_start
        };

        if level >= threshold {
            self.has_detected_speech = true;
            self.utterance_duration += duration;
            self.trailing_silence_duration = 0.0;
            if reached(self.utterance_duration, self.config.max_utterance) {
                return self.end();
            }
        } else if self.has_detected_speech {
            self.trailing_silence_duration += duration;
            let long_enough = reached(self.utterance_duration, self.config.minimum_utterance);
            let committed = long_enough
                && reached(self.trailing_silence_duration, self.config.trailing_silence_to_commit);
            // A blip shorter than minimum_utterance still has to resolve
            // eventually, otherwise noise would keep the session open forever.
            let abandoned = !long_enough
                && reached(self.trailing_silence_duration, self.config.pre_speech_timeout);
            if committed || abandoned || reached(self.utterance_duration, self.config.max_utterance)
            {
                return self.end();
            }
        } else if reached(self.total_duration, self.config.pre_speech_timeout) {
            return self.end();
        }

        EndpointDecision::ContinueListening
    }

    fn end(&mut self) -> EndpointDecision {
        self.has_ended = true;
        EndpointDecision::EndAudio
    }

    pub fn has_detected_speech(&self) -> bool {
        self.has_detected_speech
    }

    pub fn has_ended(&self) -> bool {
        self.has_ended
    }

    pub fn total_duration(&self) -> f64 {
        self.total_duration
    }

    pub fn utterance_duration(&self) -> f64 {
        self.utterance_duration
    }

    pub fn trailing_silence_duration(&self) -> f64 {
        self.trailing_silence_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> EndpointDetector {
        EndpointDetector::with_profile(EndpointProfile::Fast)
    }

    fn feed(
        detector: &mut EndpointDetector,
        samples: &[(f64, f64)],
    ) -> Vec<EndpointDecision> {
        samples.iter().map(|&(level, dur)| detector.ingest(level, dur)).collect()
    }

    fn repeat(level: f64, dur: f64, n: usize) -> Vec<(f64, f64)> {
        vec![(level, dur); n]
    }

    #[test]
    fn commits_on_trailing_silence() {
        let mut d = fast();
        let speech = feed(&mut d, &repeat(0.35, 0.1, 4));
        assert!(speech.iter().all(|&r| r == EndpointDecision::ContinueListening));

        let silence = feed(&mut d, &repeat(0.0, 0.1, 8));
        let ends: Vec<usize> = silence
            .iter()
            .enumerate()
            .filter(|(_, &r)| r == EndpointDecision::EndAudio)
            .map(|(i, _)| i)
            .collect();
        // Exactly one EndAudio, at the trailing-silence commit point
        // (0.6s of silence = the 6th silence buffer).
        assert_eq!(ends, vec![5]);
    }

    #[test]
    fn short_blip_with_short_silence_keeps_listening() {
        let mut d = fast();
        // 0.15s of speech (below minimum_utterance), then 0.5s of silence
        // (below pre_speech_timeout): nothing resolves yet.
        let mut results = feed(&mut d, &repeat(0.35, 0.05, 3));
        results.extend(feed(&mut d, &repeat(0.0, 0.05, 10)));
        assert!(results.iter().all(|&r| r == EndpointDecision::ContinueListening));
        assert!(d.has_detected_speech());
        assert!(!d.has_ended());
    }

    #[test]
    fn short_blip_eventually_resolves() {
        let mut d = fast();
        feed(&mut d, &repeat(0.35, 0.05, 3));
        // Silence accumulates past pre_speech_timeout and forces an end even
        // though the utterance never reached minimum_utterance.
        let silence = feed(&mut d, &repeat(0.0, 0.05, 100));
        let ends = silence.iter().filter(|&&r| r == EndpointDecision::EndAudio).count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn sub_threshold_noise_does_not_start_speech() {
        let mut d = fast();
        // 3.5s of low-level noise below speaking_start: all continue.
        let noise = feed(&mut d, &repeat(0.05, 0.1, 35));
        assert!(noise.iter().all(|&r| r == EndpointDecision::ContinueListening));
        assert!(!d.has_detected_speech());

        // Then real speech and silence: exactly one EndAudio overall.
        let mut rest = feed(&mut d, &repeat(0.3, 0.1, 3));
        rest.extend(feed(&mut d, &repeat(0.0, 0.1, 7)));
        let ends = rest.iter().filter(|&&r| r == EndpointDecision::EndAudio).count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn gives_up_when_nothing_is_said() {
        let mut d = fast();
        let results = feed(&mut d, &repeat(0.0, 0.5, 10));
        let ends: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, &r)| r == EndpointDecision::EndAudio)
            .map(|(i, _)| i)
            .collect();
        // pre_speech_timeout is 4.0s: the 8th buffer crosses it.
        assert_eq!(ends, vec![7]);
    }

    #[test]
    fn max_utterance_cuts_off_continuous_speech() {
        let mut d = fast();
        let results = feed(&mut d, &repeat(0.3, 0.1, 101));
        let ends: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, &r)| r == EndpointDecision::EndAudio)
            .map(|(i, _)| i)
            .collect();
        // Exactly one EndAudio, at the 10s max_utterance cutoff and not
        // before.
        assert_eq!(ends, vec![99]);
    }

    #[test]
    fn end_audio_is_terminal_and_idempotent() {
        let mut d = fast();
        feed(&mut d, &repeat(0.35, 0.1, 4));
        feed(&mut d, &repeat(0.0, 0.1, 6));
        assert!(d.has_ended());

        let total = d.total_duration();
        let utterance = d.utterance_duration();
        let trailing = d.trailing_silence_duration();
        for _ in 0..50 {
            assert_eq!(d.ingest(0.9, 0.1), EndpointDecision::ContinueListening);
        }
        assert_eq!(d.total_duration(), total);
        assert_eq!(d.utterance_duration(), utterance);
        assert_eq!(d.trailing_silence_duration(), trailing);
    }

    #[test]
    fn hysteresis_keeps_speech_alive_through_dips() {
        let mut d = fast();
        d.ingest(0.3, 0.1);
        // 0.2 is below speaking_start but above speaking_floor: still speech.
        assert_eq!(d.ingest(0.2, 0.1), EndpointDecision::ContinueListening);
        assert_eq!(d.utterance_duration(), 0.2);
        assert_eq!(d.trailing_silence_duration(), 0.0);
    }

    #[test]
    fn non_positive_duration_is_a_no_op() {
        let mut d = fast();
        assert_eq!(d.ingest(0.9, 0.0), EndpointDecision::ContinueListening);
        assert_eq!(d.ingest(0.9, -1.0), EndpointDecision::ContinueListening);
        assert_eq!(d.total_duration(), 0.0);
        assert!(!d.has_detected_speech());
    }

    #[test]
    fn out_of_range_levels_are_clamped() {
        let mut d = fast();
        assert_eq!(d.ingest(7.5, 0.1), EndpointDecision::ContinueListening);
        assert!(d.has_detected_speech());
        let mut d = fast();
        d.ingest(-3.0, 0.1);
        assert!(!d.has_detected_speech());
    }

    #[test]
    fn profiles_share_the_algorithm_but_differ_in_patience() {
        let fast = EndpointProfile::Fast.config();
        let balanced = EndpointProfile::Balanced.config();
        let patient = EndpointProfile::Patient.config();
        assert!(fast.trailing_silence_to_commit < balanced.trailing_silence_to_commit);
        assert!(balanced.trailing_silence_to_commit < patient.trailing_silence_to_commit);
        for c in [fast, balanced, patient] {
            // Hysteresis requires the floor below the entry threshold.
            assert!(c.speaking_floor < c.speaking_start);
        }
    }
}
