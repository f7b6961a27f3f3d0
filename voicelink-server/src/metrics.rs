// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use lazy_static::lazy_static;
use prometheus::{
    histogram_opts, labels, opts, register_counter, register_gauge, register_histogram,
    register_int_counter,
};
use prometheus::{Counter, Gauge, Histogram, IntCounter};

pub mod relay {
    use super::*;
    lazy_static! {
        pub static ref CONNECT: Counter = register_counter!(opts!(
            "relay_connect",
            "Number of accepted relay sessions.",
            labels! {"handler" => "all",}
        ))
        .unwrap();
        pub static ref OPEN_SESSIONS: Gauge = register_gauge!(opts!(
            "relay_open_sessions",
            "Number of open relay sessions (users currently connected).",
            labels! {"handler" => "all",}
        ))
        .unwrap();
        pub static ref SESSION_DURATION: Histogram = register_histogram!(histogram_opts!(
            "relay_session_duration_seconds",
            "Relay session duration distribution.",
            vec![1., 5., 15., 30., 60., 120., 300., 600., 1800., 3600.],
        ))
        .unwrap();
        pub static ref QUOTA_REJECTED: IntCounter = register_int_counter!(
            "relay_quota_rejected_total",
            "Sessions rejected before upgrade because the quota was exhausted."
        )
        .unwrap();
        pub static ref QUOTA_FAIL_OPEN: IntCounter = register_int_counter!(
            "relay_quota_fail_open_total",
            "Sessions admitted without a quota row (fail-open policy)."
        )
        .unwrap();
        pub static ref UPSTREAM_CONNECT_FAILURES: IntCounter = register_int_counter!(
            "relay_upstream_connect_failures_total",
            "Upstream connections that failed or timed out."
        )
        .unwrap();
    }
}

pub mod stream {
    use super::*;

    fn parse_env_bool(key: &str) -> bool {
        match std::env::var(key) {
            Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON"),
            Err(_) => false,
        }
    }

    #[inline(always)]
    pub fn enabled() -> bool {
        *ENABLED
    }

    lazy_static! {
        pub static ref ENABLED: bool = parse_env_bool("VOICELINK_STREAM_METRICS");
        pub static ref CLIENT_IN_BYTES: IntCounter = register_int_counter!(
            "relay_client_in_bytes_total",
            "Total bytes received from clients."
        )
        .unwrap();
        pub static ref CLIENT_IN_MESSAGES: IntCounter = register_int_counter!(
            "relay_client_in_messages_total",
            "Total messages received from clients."
        )
        .unwrap();
        pub static ref UPSTREAM_IN_BYTES: IntCounter = register_int_counter!(
            "relay_upstream_in_bytes_total",
            "Total bytes received from upstream providers."
        )
        .unwrap();
        pub static ref UPSTREAM_IN_MESSAGES: IntCounter = register_int_counter!(
            "relay_upstream_in_messages_total",
            "Total messages received from upstream providers."
        )
        .unwrap();
    }
}

pub mod metering {
    use super::*;
    lazy_static! {
        pub static ref USAGE_EVENTS: IntCounter = register_int_counter!(
            "metering_usage_events_total",
            "Usage events appended at session end."
        )
        .unwrap();
        pub static ref DEBITED_FREE_MINUTES: IntCounter = register_int_counter!(
            "metering_debited_free_minutes_total",
            "Free minutes debited across all sessions."
        )
        .unwrap();
        pub static ref DEBITED_PAID_CENTS: IntCounter = register_int_counter!(
            "metering_debited_paid_cents_total",
            "Paid credit cents debited across all sessions."
        )
        .unwrap();
    }
}

pub mod errors {
    use lazy_static::lazy_static;
    use prometheus::{register_int_counter_vec, IntCounterVec};

    lazy_static! {
        /// WebSocket close events by close code.
        /// Labels: code (numeric), reason (category name)
        pub static ref WS_CLOSE_TOTAL: IntCounterVec = register_int_counter_vec!(
            "ws_close_total",
            "Total WebSocket close events by close code.",
            &["code", "reason"]
        )
        .unwrap();

        /// Authentication errors by error type.
        /// Labels: error_type (expired_token, missing_credentials, token_invalid)
        pub static ref AUTH_ERROR_TOTAL: IntCounterVec = register_int_counter_vec!(
            "auth_error_total",
            "Total authentication errors by type.",
            &["error_type"]
        )
        .unwrap();

        /// Metering failures by operation.
        /// Labels: op (log, debit)
        pub static ref METERING_FAILURE_TOTAL: IntCounterVec = register_int_counter_vec!(
            "metering_failure_total",
            "Total best-effort metering failures by operation.",
            &["op"]
        )
        .unwrap();
    }

    /// Record a WebSocket close event.
    pub fn record_ws_close(code: u16, reason: &str) {
        let code_str = code.to_string();
        WS_CLOSE_TOTAL.with_label_values(&[code_str.as_str(), reason]).inc();
    }

    /// Record an authentication error.
    pub fn record_auth_error(error_type: &str) {
        AUTH_ERROR_TOTAL.with_label_values(&[error_type]).inc();
    }

    /// Record a metering failure.
    pub fn record_metering_failure(op: &str) {
        METERING_FAILURE_TOTAL.with_label_values(&[op]).inc();
    }
}
