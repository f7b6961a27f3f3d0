// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Provider fallback resolution.
//!
//! Before a session starts the client asks for a provider; availability
//! depends on the platform runtime, the subscription tier, and whether the
//! provider is configured and currently reachable. The resolver picks the
//! effective provider and reports whether (and why) it fell back. The two
//! availability checks are injected as closures so callers decide what
//! "configured" and "reachable" mean on their platform.

use crate::provider::{ProviderId, Surface, Tier};

/// Why the requested provider was rejected. When several checks fail the
/// most actionable reason wins: runtime ineligibility over tier restriction
/// over plain unavailability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    OsUnsupported,
    TierRestricted,
    ProviderUnavailable,
}

/// Outcome of one resolution call. Computed fresh every time; the only
/// persisted adjunct is the caller-owned "last working provider" hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackResult {
    pub effective: ProviderId,
    pub did_fallback: bool,
    pub reason: Option<FallbackReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no provider available for tier {tier}")]
pub struct NoProviderError {
    pub tier: Tier,
}

/// Resolve the provider a session should target.
///
/// The requested provider is accepted as-is when its capability gate passes
/// for (`surface`, `runtime_major`), the tier permits it, and both
/// availability checks hold. Otherwise a replacement is chosen: the hint
/// first if it qualifies, then the first qualifying provider in the tier's
/// canonical ordering.
pub fn resolve_provider(
    requested: ProviderId,
    tier: Tier,
    surface: Surface,
    runtime_major: u32,
    hint: Option<ProviderId>,
    is_configured: impl Fn(ProviderId) -> bool,
    is_runtime_available: impl Fn(ProviderId) -> bool,
) -> Result<FallbackResult, NoProviderError> {
    let capability_ok = |p: ProviderId| {
        p.supported_on(surface) && p.min_runtime_major().is_none_or(|min| runtime_major >= min)
    };
    let qualifies =
        |p: ProviderId| tier.allows(p) && capability_ok(p) && is_configured(p) && is_runtime_available(p);

    if qualifies(requested) {
        return Ok(FallbackResult { effective: requested, did_fallback: false, reason: None });
    }

    let reason = if !capability_ok(requested) {
        FallbackReason::OsUnsupported
    } else if !tier.allows(requested) {
        FallbackReason::TierRestricted
    } else {
        FallbackReason::ProviderUnavailable
    };

    let effective = hint
        .filter(|&h| qualifies(h))
        .or_else(|| tier.available_providers().iter().copied().find(|&p| qualifies(p)))
        .ok_or(NoProviderError { tier })?;

    Ok(FallbackResult { effective, did_fallback: effective != requested, reason: Some(reason) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(set: &[ProviderId]) -> impl Fn(ProviderId) -> bool + '_ {
        move |p| set.contains(&p)
    }

    #[test]
    fn requested_provider_is_kept_when_everything_holds() {
        let res = resolve_provider(
            ProviderId::OpenAi,
            Tier::Premium,
            Surface::Phone,
            18,
            None,
            |_| true,
            |_| true,
        )
        .unwrap();
        assert_eq!(res.effective, ProviderId::OpenAi);
        assert!(!res.did_fallback);
        assert_eq!(res.reason, None);
    }

    #[test]
    fn old_runtime_falls_back_with_os_unsupported() {
        // Apple on-device speech needs runtime 26; on 18 the premium tier
        // falls through to the first configured provider.
        let res = resolve_provider(
            ProviderId::Apple,
            Tier::Premium,
            Surface::Phone,
            18,
            None,
            configured(&[ProviderId::Gemini]),
            |_| true,
        )
        .unwrap();
        assert_eq!(res.effective, ProviderId::Gemini);
        assert!(res.did_fallback);
        assert_eq!(res.reason, Some(FallbackReason::OsUnsupported));
    }

    #[test]
    fn watch_surface_gates_the_on_device_provider() {
        let res = resolve_provider(
            ProviderId::Apple,
            Tier::Premium,
            Surface::Watch,
            26,
            None,
            |_| true,
            |_| true,
        )
        .unwrap();
        assert_eq!(res.reason, Some(FallbackReason::OsUnsupported));
        assert_eq!(res.effective, ProviderId::OpenAi);
    }

    #[test]
    fn tier_restriction_is_reported() {
        let res = resolve_provider(
            ProviderId::OpenAi,
            Tier::Free,
            Surface::Phone,
            26,
            None,
            |_| true,
            |_| true,
        )
        .unwrap();
        assert_eq!(res.effective, ProviderId::Gemini);
        assert!(res.did_fallback);
        assert_eq!(res.reason, Some(FallbackReason::TierRestricted));
    }

    #[test]
    fn unconfigured_provider_is_reported_unavailable() {
        let res = resolve_provider(
            ProviderId::OpenAi,
            Tier::Premium,
            Surface::Phone,
            26,
            None,
            configured(&[ProviderId::Gemini]),
            |_| true,
        )
        .unwrap();
        assert_eq!(res.effective, ProviderId::Gemini);
        assert_eq!(res.reason, Some(FallbackReason::ProviderUnavailable));
    }

    #[test]
    fn runtime_outage_prefers_the_last_working_provider() {
        let res = resolve_provider(
            ProviderId::OpenAi,
            Tier::Premium,
            Surface::Phone,
            26,
            Some(ProviderId::Gemini),
            |_| true,
            |p| p != ProviderId::OpenAi,
        )
        .unwrap();
        assert_eq!(res.effective, ProviderId::Gemini);
        assert_eq!(res.reason, Some(FallbackReason::ProviderUnavailable));
    }

    #[test]
    fn unusable_hint_is_ignored() {
        // The hint points at a provider the tier no longer allows.
        let res = resolve_provider(
            ProviderId::OpenAi,
            Tier::Free,
            Surface::Phone,
            26,
            Some(ProviderId::OpenAi),
            |_| true,
            |_| true,
        )
        .unwrap();
        assert_eq!(res.effective, ProviderId::Gemini);
    }

    #[test]
    fn no_candidate_is_an_error() {
        let err = resolve_provider(
            ProviderId::Gemini,
            Tier::Free,
            Surface::Phone,
            26,
            None,
            |_| false,
            |_| true,
        )
        .unwrap_err();
        assert_eq!(err, NoProviderError { tier: Tier::Free });
    }
}
