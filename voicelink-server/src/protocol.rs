// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use axum::extract::ws;
use serde::{Deserialize, Serialize};

// ============================================================================
// WebSocket Close Codes (RFC 6455 + Custom Application Codes)
// ============================================================================
//
// Standard codes (1000-1015) are defined by RFC 6455.
// Custom application codes must be in the range 4000-4999.
//
// See: https://www.rfc-editor.org/rfc/rfc6455.html#section-7.4.1

/// WebSocket close codes used by the relay. Application codes are in the
/// 4000-4999 range reserved for application use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (RFC 6455)
    Normal = 1000,
    /// Server is going away (RFC 6455)
    GoingAway = 1001,
    /// Protocol error (RFC 6455)
    ProtocolError = 1002,
    /// Internal server error (RFC 6455)
    InternalError = 1011,

    // Custom application codes (4000-4999)
    /// Session timeout - connection exceeded maximum duration
    SessionTimeout = 4002,
    /// Upstream unavailable - the provider connection could not be opened
    UpstreamUnavailable = 4005,
}

impl CloseCode {
    /// Returns the numeric code value
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Returns a human-readable description of the close code
    pub fn reason(&self) -> &'static str {
        match self {
            CloseCode::Normal => "Normal closure",
            CloseCode::GoingAway => "Server going away",
            CloseCode::ProtocolError => "Protocol error",
            CloseCode::InternalError => "Internal server error",
            CloseCode::SessionTimeout => "Session timeout",
            CloseCode::UpstreamUnavailable => "Upstream unavailable",
        }
    }

    /// Returns true if this is a retryable error (client should reconnect)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloseCode::GoingAway | CloseCode::InternalError | CloseCode::UpstreamUnavailable
        )
    }

    /// Creates a WebSocket CloseFrame with this code and reason
    pub fn to_close_frame(&self) -> ws::CloseFrame {
        ws::CloseFrame { code: self.code(), reason: self.reason().into() }
    }

    /// Creates a WebSocket CloseFrame with a custom reason message
    pub fn with_reason(&self, reason: impl Into<String>) -> ws::CloseFrame {
        ws::CloseFrame { code: self.code(), reason: reason.into().into() }
    }
}

impl From<CloseCode> for ws::CloseFrame {
    fn from(code: CloseCode) -> Self {
        code.to_close_frame()
    }
}

// ============================================================================
// In-band control frames
// ============================================================================

/// Control frames the relay itself injects into the client stream. Relayed
/// payloads are opaque; this is the only message the relay originates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    Error { source: String, code: String, message: String },
}

impl RelayFrame {
    pub fn upstream_error(code: &str, message: impl Into<String>) -> Self {
        RelayFrame::Error {
            source: "upstream".to_string(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_map_to_u16() {
        assert_eq!(CloseCode::Normal.code(), 1000);
        assert_eq!(CloseCode::SessionTimeout.code(), 4002);
        assert_eq!(CloseCode::UpstreamUnavailable.code(), 4005);
    }

    #[test]
    fn error_frame_serializes_with_a_type_tag() {
        let frame = RelayFrame::upstream_error("connect_failed", "no route to host");
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""source":"upstream""#));
        assert!(json.contains("connect_failed"));
        let back: RelayFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
