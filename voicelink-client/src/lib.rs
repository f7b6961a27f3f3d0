//! Client-side glue for voicelink: relay URL/connection helpers, audio
//! level normalization for the endpoint detector, and the last-working
//! provider hint store.
//!
//! The audio-capture collaborator owns the capture loop. Per buffer it
//! computes a normalized level and feeds the detector; on `EndAudio` it
//! finalizes the recognition request and discards the detector:
//!
//! ```
//! use voicelink_client::level::LevelMeter;
//! use voicelink_core::{EndpointDecision, EndpointDetector, EndpointProfile};
//!
//! let mut meter = LevelMeter::default();
//! let mut detector = EndpointDetector::with_profile(EndpointProfile::Fast);
//! let buffers: Vec<Vec<f32>> = vec![vec![0.5; 1600]; 4];
//! for pcm in &buffers {
//!     let level = meter.process(pcm) as f64;
//!     let duration = pcm.len() as f64 / 16_000.0;
//!     if detector.ingest(level, duration) == EndpointDecision::EndAudio {
//!         break;
//!     }
//! }
//! ```

pub mod hint;
pub mod level;
pub mod ws;

pub use hint::{resolve_with_hint, FileHintStore, HintStore, MemoryHintStore};
pub use level::{normalized_rms, LevelMeter};
