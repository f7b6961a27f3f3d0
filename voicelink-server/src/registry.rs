// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Provider registry.
//!
//! Maps a logical provider id to its upstream connection target: the wss
//! URL, the authentication header (or query parameter) carrying the API key,
//! and any extra headers the provider requires. Targets come from the
//! `[providers.*]` tables of the server config; API keys stay in the
//! environment and are read at connect time, never logged.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use url::Url;
use voicelink_core::ProviderId;

fn default_auth_header() -> String {
    "authorization".to_string()
}

fn default_auth_prefix() -> String {
    "Bearer ".to_string()
}

/// One upstream connection target, as configured.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProviderTarget {
    /// Upstream WebSocket URL (ws:// or wss://).
    pub url: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
    /// Header carrying the API key, unless `api_key_query` is set.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    #[serde(default = "default_auth_prefix")]
    pub auth_prefix: String,
    /// Some providers take the key as a query parameter instead of a header.
    #[serde(default)]
    pub api_key_query: Option<String>,
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Query parameter the model is passed through, when the provider
    /// selects models per-connection.
    #[serde(default)]
    pub model_param: Option<String>,
}

impl ProviderTarget {
    fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("missing API key env var {}", self.api_key_env))
    }

    /// Full connect URL with model and (if so configured) API key applied.
    pub fn connect_url(&self, model: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.url).with_context(|| self.url.clone())?;
        let model = model.or(self.default_model.as_deref());
        if let (Some(param), Some(model)) = (self.model_param.as_deref(), model) {
            url.query_pairs_mut().append_pair(param, model);
        }
        if let Some(param) = self.api_key_query.as_deref() {
            let key = self.api_key()?;
            url.query_pairs_mut().append_pair(param, &key);
        }
        Ok(url)
    }

    /// Headers to attach to the upstream handshake.
    pub fn auth_headers(&self) -> Result<Vec<(HeaderName, HeaderValue)>> {
        let mut headers = Vec::with_capacity(1 + self.extra_headers.len());
        if self.api_key_query.is_none() {
            let key = self.api_key()?;
            headers.push((
                HeaderName::from_bytes(self.auth_header.as_bytes())
                    .with_context(|| format!("invalid header name {}", self.auth_header))?,
                HeaderValue::from_str(&format!("{}{key}", self.auth_prefix))
                    .context("API key is not a valid header value")?,
            ));
        }
        for (name, value) in &self.extra_headers {
            headers.push((
                HeaderName::from_bytes(name.as_bytes())
                    .with_context(|| format!("invalid header name {name}"))?,
                HeaderValue::from_str(value)
                    .with_context(|| format!("invalid header value for {name}"))?,
            ));
        }
        Ok(headers)
    }
}

/// Registry of relayable providers, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    targets: HashMap<ProviderId, ProviderTarget>,
}

impl ProviderRegistry {
    pub fn new(configured: &HashMap<String, ProviderTarget>) -> Result<Self> {
        let mut targets = HashMap::with_capacity(configured.len());
        for (name, target) in configured {
            let id: ProviderId =
                name.parse().map_err(|e: String| anyhow::anyhow!(e)).context("providers config")?;
            anyhow::ensure!(
                id.is_relayed(),
                "provider '{id}' runs on-device and cannot be a relay target"
            );
            Url::parse(&target.url).with_context(|| format!("providers.{name}.url"))?;
            targets.insert(id, target.clone());
        }
        Ok(Self { targets })
    }

    /// Look up a provider by its query-string identifier.
    pub fn resolve(&self, provider: &str) -> Option<(ProviderId, &ProviderTarget)> {
        let id: ProviderId = provider.parse().ok()?;
        self.targets.get(&id).map(|t| (id, t))
    }

    pub fn configured(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self.targets.keys().copied().collect();
        ids.sort_by_key(|id| id.as_str());
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> HashMap<String, ProviderTarget> {
        let toml = r#"
            [openai]
            url = "wss://api.openai.com/v1/realtime"
            api_key_env = "VOICELINK_REGISTRY_TEST_OPENAI_KEY"
            model_param = "model"
            default_model = "gpt-realtime"
            [openai.extra_headers]
            "openai-beta" = "realtime=v1"

            [gemini]
            url = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent"
            api_key_env = "VOICELINK_REGISTRY_TEST_GEMINI_KEY"
            api_key_query = "key"
        "#;
        toml::from_str(toml).unwrap()
    }

    #[test]
    fn builds_from_toml_config() {
        let registry = ProviderRegistry::new(&sample_config()).unwrap();
        assert_eq!(registry.configured(), vec![ProviderId::Gemini, ProviderId::OpenAi]);
        assert!(registry.resolve("openai").is_some());
        assert!(registry.resolve("whisper").is_none());
        assert!(registry.resolve("apple").is_none());
    }

    #[test]
    fn rejects_on_device_providers() {
        let mut config = sample_config();
        let target = config.get("openai").unwrap().clone();
        config.insert("apple".to_string(), target);
        assert!(ProviderRegistry::new(&config).is_err());
    }

    #[test]
    fn connect_url_applies_model_and_query_key() {
        std::env::set_var("VOICELINK_REGISTRY_TEST_GEMINI_KEY", "g-key");
        let config = sample_config();

        let openai = config.get("openai").unwrap();
        let url = openai.connect_url(None).unwrap();
        assert_eq!(url.query(), Some("model=gpt-realtime"));
        let url = openai.connect_url(Some("gpt-realtime-mini")).unwrap();
        assert_eq!(url.query(), Some("model=gpt-realtime-mini"));

        let gemini = config.get("gemini").unwrap();
        let url = gemini.connect_url(None).unwrap();
        assert_eq!(url.query(), Some("key=g-key"));
    }

    #[test]
    fn auth_headers_carry_the_bearer_key() {
        std::env::set_var("VOICELINK_REGISTRY_TEST_OPENAI_KEY", "sk-test");
        let config = sample_config();
        let headers = config.get("openai").unwrap().auth_headers().unwrap();
        let auth = headers.iter().find(|(n, _)| n.as_str() == "authorization").unwrap();
        assert_eq!(auth.1.to_str().unwrap(), "Bearer sk-test");
        assert!(headers.iter().any(|(n, _)| n.as_str() == "openai-beta"));
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let config = sample_config();
        std::env::remove_var("VOICELINK_REGISTRY_TEST_UNSET_KEY");
        let mut target = config.get("openai").unwrap().clone();
        target.api_key_env = "VOICELINK_REGISTRY_TEST_UNSET_KEY".to_string();
        assert!(target.auth_headers().is_err());
    }
}
