// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Session error taxonomy.
//!
//! Pre-upgrade failures ([`Reject`]) map to HTTP statuses and a structured
//! JSON body; auth failures have their own type in `auth.rs`. Upstream
//! errors are delivered in-band as relay frames and never carry an HTTP
//! status. Metering failures are logged and swallowed at the call site.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Structured body for pre-upgrade rejections, mirroring the auth error
/// shape so clients parse one format.
#[derive(Debug, Clone, Serialize)]
pub struct RejectBody {
    pub error: &'static str,
    pub code: &'static str,
    pub message: String,
    pub hint: &'static str,
}

/// Reasons a connection upgrade is refused before it happens.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Reject {
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("quota exhausted")]
    QuotaExhausted,
    #[error("internal error: {0}")]
    Internal(String),
}

impl Reject {
    pub fn status(&self) -> StatusCode {
        match self {
            Reject::UnknownProvider(_) => StatusCode::BAD_REQUEST,
            Reject::QuotaExhausted => StatusCode::PAYMENT_REQUIRED,
            Reject::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> RejectBody {
        match self {
            Reject::UnknownProvider(p) => RejectBody {
                error: "bad_request",
                code: "unknown_provider",
                message: format!("provider '{p}' is not recognized or not configured"),
                hint: "Pass one of the configured providers in the 'provider' query parameter",
            },
            Reject::QuotaExhausted => RejectBody {
                error: "payment_required",
                code: "quota_exhausted",
                message: "No free minutes or paid credits remain".to_string(),
                hint: "Purchase credits or wait for the free allowance to renew",
            },
            Reject::Internal(msg) => RejectBody {
                error: "internal",
                code: "internal_error",
                message: msg.clone(),
                hint: "Retry later",
            },
        }
    }
}

impl IntoResponse for Reject {
    fn into_response(self) -> Response {
        tracing::warn!(code = %self, "rejecting relay upgrade");
        (self.status(), Json(self.body())).into_response()
    }
}

/// Upstream-side failures surfaced to the client as in-band error frames.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("connect timed out after {0}s")]
    ConnectTimeout(u64),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl UpstreamError {
    /// Stable code carried in the error frame.
    pub fn code(&self) -> &'static str {
        match self {
            UpstreamError::ConnectFailed(_) => "connect_failed",
            UpstreamError::ConnectTimeout(_) => "connect_timeout",
            UpstreamError::Protocol(_) => "protocol_error",
        }
    }
}
