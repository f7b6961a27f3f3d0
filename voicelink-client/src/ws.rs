//! Relay connection helpers.
//!
//! URL building works without the `ws` feature so UI layers can display or
//! log the target; the actual connection needs `ws`.

use anyhow::Result;
use url::Url;
use voicelink_core::ProviderId;

#[cfg(feature = "ws")]
use tokio::net::TcpStream;
#[cfg(feature = "ws")]
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
#[cfg(feature = "ws")]
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
#[cfg(feature = "ws")]
use tokio_tungstenite::tungstenite::http::HeaderValue;
#[cfg(feature = "ws")]
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[cfg(feature = "ws")]
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the relay upgrade URL. The token lands in the query string for
/// runtimes where WebSocket handshake headers cannot be set; prefer passing
/// it to [`connect_relay`] instead where headers are available.
pub fn relay_url(
    base: &str,
    path: &str,
    provider: ProviderId,
    model: Option<&str>,
    device_id: Option<&str>,
    token: Option<&str>,
) -> Result<Url> {
    let mut url = Url::parse(base)?;
    if !path.is_empty() {
        url.set_path(path);
    }

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("provider", provider.as_str());
        if let Some(model) = model {
            pairs.append_pair("model", model);
        }
        if let Some(device_id) = device_id {
            pairs.append_pair("device_id", device_id);
        }
        if let Some(token) = token {
            pairs.append_pair("token", token);
        }
    }

    Ok(url)
}

#[cfg(feature = "ws")]
pub async fn connect_relay(url: &Url, auth_token: Option<&str>) -> Result<WsStream> {
    let mut req = url.to_string().into_client_request()?;

    if let Some(token) = auth_token {
        let header_value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        req.headers_mut().insert(AUTHORIZATION, header_value);
    }

    let (ws_stream, _resp) = connect_async(req).await?;

    Ok(ws_stream)
}

/// Render a relay URL with the token query parameter redacted.
pub fn redact_url(url: &Url) -> String {
    let mut url = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "token" {
                (k.to_string(), "REDACTED".to_string())
            } else {
                (k.to_string(), v.to_string())
            }
        })
        .collect();

    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}
