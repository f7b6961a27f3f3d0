// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Provider, tier and surface model.
//!
//! A provider is a realtime voice-AI backend. `Apple` runs on-device and is
//! gated on the platform runtime; the others are reached through the relay.

use serde::{Deserialize, Serialize};

/// Minimum major runtime version for the on-device Apple provider.
const APPLE_MIN_RUNTIME_MAJOR: u32 = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Apple,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Apple, ProviderId::OpenAi, ProviderId::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Apple => "apple",
            ProviderId::OpenAi => "openai",
            ProviderId::Gemini => "gemini",
        }
    }

    /// Minimum major runtime version required, if the provider is gated on
    /// the platform runtime at all.
    pub fn min_runtime_major(&self) -> Option<u32> {
        match self {
            ProviderId::Apple => Some(APPLE_MIN_RUNTIME_MAJOR),
            ProviderId::OpenAi | ProviderId::Gemini => None,
        }
    }

    /// Whether the provider can run on the given surface. On-device speech
    /// is phone-only; relayed providers work anywhere with a network.
    pub fn supported_on(&self, surface: Surface) -> bool {
        match self {
            ProviderId::Apple => matches!(surface, Surface::Phone),
            ProviderId::OpenAi | ProviderId::Gemini => true,
        }
    }

    /// Relayed providers go through the server; `Apple` does not.
    pub fn is_relayed(&self) -> bool {
        !matches!(self, ProviderId::Apple)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apple" => Ok(ProviderId::Apple),
            "openai" => Ok(ProviderId::OpenAi),
            "gemini" => Ok(ProviderId::Gemini),
            _ => Err(format!("unknown provider '{s}'")),
        }
    }
}

/// The device surface a session originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Phone,
    Watch,
}

/// Subscription tier. Constrains which providers a caller may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Premium,
}

impl Tier {
    /// Providers available to the tier, in canonical fallback order.
    pub fn available_providers(&self) -> &'static [ProviderId] {
        match self {
            Tier::Free => &[ProviderId::Gemini],
            Tier::Premium => &[ProviderId::OpenAi, ProviderId::Gemini, ProviderId::Apple],
        }
    }

    pub fn allows(&self, provider: ProviderId) -> bool {
        self.available_providers().contains(&provider)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            _ => Err(format!("unknown tier '{s}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_roundtrips_through_str() {
        for p in ProviderId::ALL {
            assert_eq!(p.as_str().parse::<ProviderId>().unwrap(), p);
        }
        assert!("whisper".parse::<ProviderId>().is_err());
    }

    #[test]
    fn apple_is_runtime_gated_and_phone_only() {
        assert_eq!(ProviderId::Apple.min_runtime_major(), Some(26));
        assert!(ProviderId::Apple.supported_on(Surface::Phone));
        assert!(!ProviderId::Apple.supported_on(Surface::Watch));
        assert!(ProviderId::Gemini.supported_on(Surface::Watch));
    }

    #[test]
    fn free_tier_is_gemini_only() {
        assert_eq!(Tier::Free.available_providers(), &[ProviderId::Gemini]);
        assert!(!Tier::Free.allows(ProviderId::OpenAi));
        assert!(Tier::Premium.allows(ProviderId::OpenAi));
    }
}
