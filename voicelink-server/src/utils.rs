// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::Result;

pub fn replace_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| "".to_string())
    })
    .to_string()
}

pub struct WrapJson<T>(pub Result<T>);

impl<T: serde::Serialize> axum::response::IntoResponse for WrapJson<T> {
    fn into_response(self) -> axum::response::Response {
        match self.0 {
            Ok(v) => axum::Json(v).into_response(),
            Err(err) => {
                tracing::error!(?err, "returning internal server error 500");
                (axum::http::StatusCode::INTERNAL_SERVER_ERROR, format!("{err}")).into_response()
            }
        }
    }
}

pub struct AxumError(anyhow::Error);

impl axum::response::IntoResponse for AxumError {
    fn into_response(self) -> axum::response::Response {
        let err = self.0;
        tracing::error!(?err);
        (axum::http::StatusCode::INTERNAL_SERVER_ERROR, format!("{err:?}")).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AxumError {
    fn from(value: E) -> Self {
        Self(value.into())
    }
}

pub type AxumResult<R> = std::result::Result<R, AxumError>;

pub fn spawn<F>(name: &'static str, future: F) -> tokio::task::JoinHandle<()>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::task::spawn(async move {
        match future.await {
            Ok(_) => tracing::debug!(?name, "task completed successfully"),
            Err(err) => tracing::error!(?name, ?err, "task failed"),
        }
    })
}

// ============================================================================
// WebSocket Close Helpers
// ============================================================================

use crate::protocol::CloseCode;
use axum::extract::ws;
use futures_util::SinkExt;

/// Closes a WebSocket connection with a specific close code and reason.
/// This is a helper to ensure consistent close frame handling across all handlers.
///
/// # Arguments
/// * `sender` - The WebSocket sender (split from the socket)
/// * `code` - The close code to send
/// * `reason` - Optional custom reason message (uses default if None)
pub async fn close_with_reason<S>(sender: &mut S, code: CloseCode, reason: Option<&str>) -> Result<()>
where
    S: SinkExt<ws::Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let frame = match reason {
        Some(r) => code.with_reason(r),
        None => code.to_close_frame(),
    };

    tracing::info!(
        code = code.code(),
        reason = %frame.reason,
        retryable = code.is_retryable(),
        "closing WebSocket connection"
    );
    crate::metrics::errors::record_ws_close(code.code(), code.reason());

    sender
        .send(ws::Message::Close(Some(frame)))
        .await
        .map_err(|e| anyhow::anyhow!("failed to send close frame: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_are_expanded() {
        std::env::set_var("VOICELINK_UTILS_TEST_DIR", "/tmp/voicelink");
        assert_eq!(replace_env_vars("$VOICELINK_UTILS_TEST_DIR/logs"), "/tmp/voicelink/logs");
        assert_eq!(replace_env_vars("no vars here"), "no vars here");
        assert_eq!(replace_env_vars("$VOICELINK_UTILS_TEST_UNSET/x"), "/x");
    }
}
