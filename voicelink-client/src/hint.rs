//! Last-working-provider hint.
//!
//! The fallback resolver optionally prefers the provider that last worked.
//! The hint is the only state around resolution and it is owned here by the
//! caller, as a tiny key-value store with in-memory and JSON-file backends.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use voicelink_core::fallback::{resolve_provider, FallbackResult, NoProviderError};
use voicelink_core::{ProviderId, Surface, Tier};

pub trait HintStore {
    fn last_working(&self) -> Option<ProviderId>;
    fn remember(&mut self, provider: ProviderId);
}

/// Hint kept for the lifetime of the process only.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryHintStore {
    last: Option<ProviderId>,
}

impl HintStore for MemoryHintStore {
    fn last_working(&self) -> Option<ProviderId> {
        self.last
    }

    fn remember(&mut self, provider: ProviderId) {
        self.last = Some(provider);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HintFile {
    last_working_provider: ProviderId,
}

/// Hint persisted as a small JSON file. Reads and writes are best-effort:
/// a missing or unreadable file simply means no hint.
#[derive(Debug, Clone)]
pub struct FileHintStore {
    path: PathBuf,
}

impl FileHintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl HintStore for FileHintStore {
    fn last_working(&self) -> Option<ProviderId> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let file: HintFile = serde_json::from_str(&raw).ok()?;
        Some(file.last_working_provider)
    }

    fn remember(&mut self, provider: ProviderId) {
        let file = HintFile { last_working_provider: provider };
        if let Ok(raw) = serde_json::to_string(&file) {
            let _ = std::fs::write(&self.path, raw);
        }
    }
}

/// Resolve a provider with the stored hint, and remember the effective
/// provider for next time.
#[allow(clippy::too_many_arguments)]
pub fn resolve_with_hint(
    requested: ProviderId,
    tier: Tier,
    surface: Surface,
    runtime_major: u32,
    store: &mut dyn HintStore,
    is_configured: impl Fn(ProviderId) -> bool,
    is_runtime_available: impl Fn(ProviderId) -> bool,
) -> Result<FallbackResult, NoProviderError> {
    let hint = store.last_working();
    let result = resolve_provider(
        requested,
        tier,
        surface,
        runtime_major,
        hint,
        is_configured,
        is_runtime_available,
    )?;
    store.remember(result.effective);
    Ok(result)
}
