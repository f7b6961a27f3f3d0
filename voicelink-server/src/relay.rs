// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! The session relay.
//!
//! One task per session: authenticate, gate on quota, upgrade, open the
//! upstream leg, then pump frames in both directions without touching the
//! payload. Client frames that arrive while the upstream leg is still
//! connecting are queued and flushed in arrival order, never dropped.
//! When either side closes, the other side is closed too and the session
//! is metered (best-effort).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::ws;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::{SecondsFormat, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use voicelink_core::{billed_minutes, ProviderId, Tier, UsageEvent};

use crate::auth::{self, AuthConfig};
use crate::error::{Reject, UpstreamError};
use crate::ledger::QuotaLedger;
use crate::metrics;
use crate::protocol::{CloseCode, RelayFrame};
use crate::registry::{ProviderRegistry, ProviderTarget};
use crate::utils::close_with_reason;

type UpstreamStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Grace period for the surviving pump to drain once its peer finished.
const TEARDOWN_GRACE: Duration = Duration::from_millis(500);

/// One relayed session, created at upgrade-accept and destroyed when both
/// sockets are closed.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub device_id: Option<String>,
    pub provider: ProviderId,
    pub model: Option<String>,
    pub tier: Tier,
    pub started_at: chrono::DateTime<Utc>,
}

impl Session {
    fn new(
        user_id: String,
        device_id: Option<String>,
        provider: ProviderId,
        model: Option<String>,
        tier: Tier,
    ) -> Self {
        Self {
            id: format!("{:016x}", rand::random::<u64>()),
            user_id,
            device_id,
            provider,
            model,
            tier,
            started_at: Utc::now(),
        }
    }
}

/// Live sessions keyed by session id. Owned by the relay state; there are
/// no process-wide singletons.
#[derive(Default)]
pub struct SessionRegistry {
    inner: std::sync::Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn insert(&self, session: &Session) {
        self.inner.lock().unwrap().insert(session.id.clone(), session.clone());
        metrics::relay::OPEN_SESSIONS.inc();
    }

    pub fn remove(&self, session_id: &str) {
        if self.inner.lock().unwrap().remove(session_id).is_some() {
            metrics::relay::OPEN_SESSIONS.dec();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Open session count per provider, for the status endpoint.
    pub fn provider_counts(&self) -> HashMap<ProviderId, usize> {
        let mut counts = HashMap::new();
        for session in self.inner.lock().unwrap().values() {
            *counts.entry(session.provider).or_insert(0) += 1;
        }
        counts
    }
}

/// Shared relay dependencies.
pub struct RelayState {
    pub auth: AuthConfig,
    pub registry: ProviderRegistry,
    pub ledger: Arc<dyn QuotaLedger>,
    pub sessions: SessionRegistry,
    pub limits: crate::LimitsConfig,
}

pub type SharedRelay = Arc<RelayState>;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RelayQuery {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub device_id: Option<String>,
    /// JWT token for authentication (alternative to Authorization header)
    pub token: Option<String>,
}

pub fn router(path: &str, state: SharedRelay) -> axum::Router<()> {
    axum::Router::new().route(path, axum::routing::get(relay_streaming)).with_state(state)
}

#[tracing::instrument(skip(ws, headers, state, query), fields(client_ip, user_id))]
async fn relay_streaming(
    ws: ws::WebSocketUpgrade,
    headers: axum::http::HeaderMap,
    state: State<SharedRelay>,
    query: Query<RelayQuery>,
) -> crate::utils::AxumResult<axum::response::Response> {
    let addr = headers.get("X-Real-IP").and_then(|v| v.to_str().ok().map(|v| v.to_string()));
    if let Some(ip) = &addr {
        tracing::Span::current().record("client_ip", ip);
    }
    tracing::info!("handling relay query");
    let state = state.0.clone();
    let query = query.0;

    let claims = match auth::check(&state.auth, &headers, query.token.as_deref()) {
        Ok(claims) => claims,
        Err(err) => return Ok(err.into_response()),
    };
    tracing::Span::current().record("user_id", claims.sub.as_str());

    let provider_param = query.provider.clone().unwrap_or_default();
    let Some((provider, target)) = state.registry.resolve(&provider_param) else {
        return Ok(Reject::UnknownProvider(provider_param).into_response());
    };
    let target = target.clone();

    // Quota gate, before any upstream work happens.
    let tier = match state.ledger.balance(&claims.sub).await {
        Ok(Some(balance)) if balance.exhausted() => {
            metrics::relay::QUOTA_REJECTED.inc();
            return Ok(Reject::QuotaExhausted.into_response());
        }
        Ok(Some(balance)) => balance.tier,
        Ok(None) => {
            // No balance row: fail-open, but keep the policy visible.
            tracing::warn!(user_id = %claims.sub, "no quota row, admitting session fail-open");
            metrics::relay::QUOTA_FAIL_OPEN.inc();
            Tier::default()
        }
        Err(err) => {
            tracing::error!(?err, "quota read failed");
            return Ok(Reject::Internal("quota read failed".to_string()).into_response());
        }
    };

    let session = Session::new(
        claims.sub,
        claims.device_id.or_else(|| query.device_id.clone()),
        provider,
        query.model.clone(),
        tier,
    );
    let upg = ws.write_buffer_size(0).on_upgrade(move |socket| async move {
        if let Err(err) = run_session(state, session, target, socket).await {
            tracing::error!(?err, "relay");
        }
    });
    Ok(upg)
}

async fn run_session(
    state: SharedRelay,
    session: Session,
    target: ProviderTarget,
    socket: ws::WebSocket,
) -> Result<()> {
    metrics::relay::CONNECT.inc();
    state.sessions.insert(&session);
    let started = Instant::now();
    tracing::info!(
        session_id = %session.id,
        user_id = %session.user_id,
        provider = %session.provider,
        started_at = %session.started_at,
        "session opened"
    );

    let result = relay_streams(&state, &session, &target, socket).await;
    if let Err(err) = &result {
        tracing::warn!(?err, session_id = %session.id, "session ended with error");
    }

    let duration = started.elapsed();
    metrics::relay::SESSION_DURATION.observe(duration.as_secs_f64());
    settle(&state, &session, duration).await;
    state.sessions.remove(&session.id);
    tracing::info!(
        session_id = %session.id,
        duration_secs = duration.as_secs(),
        "session closed"
    );
    Ok(())
}

/// Record the usage event and debit the ledger. Both are best-effort: the
/// caller is already gone, so failures are logged and swallowed.
async fn settle(state: &RelayState, session: &Session, duration: Duration) {
    let duration_seconds = duration.as_secs();
    let event = UsageEvent {
        user_id: session.user_id.clone(),
        device_id: session.device_id.clone(),
        provider: session.provider,
        tier: session.tier,
        duration_seconds,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    match state.ledger.record_usage(event).await {
        Ok(()) => metrics::metering::USAGE_EVENTS.inc(),
        Err(err) => {
            tracing::warn!(?err, user_id = %session.user_id, "usage logging failed");
            metrics::errors::record_metering_failure("log");
        }
    }

    let minutes = billed_minutes(duration_seconds);
    match state.ledger.debit(&session.user_id, minutes).await {
        Ok(outcome) => {
            metrics::metering::DEBITED_FREE_MINUTES.inc_by(outcome.debit.free_minutes.max(0) as u64);
            metrics::metering::DEBITED_PAID_CENTS.inc_by(outcome.debit.paid_cents.max(0) as u64);
            tracing::info!(
                user_id = %session.user_id,
                minutes,
                free_minutes = outcome.debit.free_minutes,
                paid_cents = outcome.debit.paid_cents,
                row_found = outcome.row_found,
                "session metered"
            );
        }
        Err(err) => {
            tracing::warn!(?err, user_id = %session.user_id, "quota debit failed");
            metrics::errors::record_metering_failure("debit");
        }
    }
}

async fn connect_upstream(target: &ProviderTarget, model: Option<&str>) -> Result<UpstreamStream> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let url = target.connect_url(model)?;
    let mut request = url.to_string().into_client_request()?;
    for (name, value) in target.auth_headers()? {
        request.headers_mut().insert(name, value);
    }
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn relay_streams(
    state: &RelayState,
    session: &Session,
    target: &ProviderTarget,
    socket: ws::WebSocket,
) -> Result<()> {
    let (mut client_tx, mut client_rx) = socket.split();

    // Open the upstream leg while accepting (and queueing) client frames.
    let connect = connect_upstream(target, session.model.as_deref());
    tokio::pin!(connect);
    let connect_deadline =
        tokio::time::sleep(Duration::from_secs(state.limits.upstream_connect_timeout_secs));
    tokio::pin!(connect_deadline);

    let mut pending: VecDeque<UpstreamMessage> = VecDeque::new();
    let upstream = loop {
        tokio::select! {
            res = &mut connect => match res {
                Ok(upstream) => break upstream,
                Err(err) => {
                    let err = UpstreamError::ConnectFailed(err.to_string());
                    tracing::warn!(%err, session_id = %session.id, "upstream connect failed");
                    metrics::relay::UPSTREAM_CONNECT_FAILURES.inc();
                    fail_client(&mut client_tx, &err).await;
                    return Ok(());
                }
            },
            _ = &mut connect_deadline => {
                let err = UpstreamError::ConnectTimeout(state.limits.upstream_connect_timeout_secs);
                tracing::warn!(%err, session_id = %session.id, "upstream connect timed out");
                metrics::relay::UPSTREAM_CONNECT_FAILURES.inc();
                fail_client(&mut client_tx, &err).await;
                return Ok(());
            }
            msg = client_rx.next() => match msg {
                Some(Ok(msg)) => match client_to_upstream(msg) {
                    Forwarded::Frame(frame) => pending.push_back(frame),
                    Forwarded::Closed => return Ok(()),
                    Forwarded::Ignore => {}
                },
                Some(Err(err)) => return Err(err.into()),
                // Client went away before the upstream leg opened; the
                // session is still metered by the caller.
                None => return Ok(()),
            }
        }
    };

    let (mut up_tx, mut up_rx) = upstream.split();
    if !pending.is_empty() {
        tracing::debug!(queued = pending.len(), session_id = %session.id, "flushing queued frames");
    }
    while let Some(frame) = pending.pop_front() {
        up_tx.send(frame).await?;
    }

    let mut c2u = crate::utils::spawn("client_to_upstream", async move {
        let result: Result<()> = async {
            while let Some(msg) = client_rx.next().await {
                match client_to_upstream(msg?) {
                    Forwarded::Frame(frame) => {
                        if metrics::stream::enabled() {
                            metrics::stream::CLIENT_IN_MESSAGES.inc();
                            metrics::stream::CLIENT_IN_BYTES.inc_by(upstream_frame_len(&frame) as u64);
                        }
                        up_tx.send(frame).await?;
                    }
                    Forwarded::Closed => break,
                    Forwarded::Ignore => {}
                }
            }
            Ok(())
        }
        .await;
        // The client is gone: close the upstream leg. Closing an
        // already-closed socket is a no-op, never an error.
        let _ = up_tx.close().await;
        result
    });

    let mut u2c = crate::utils::spawn("upstream_to_client", async move {
        let mut upstream_errored = false;
        loop {
            match up_rx.next().await {
                Some(Ok(msg)) => match upstream_to_client(msg) {
                    Forwarded::Frame(frame) => {
                        if metrics::stream::enabled() {
                            metrics::stream::UPSTREAM_IN_MESSAGES.inc();
                            metrics::stream::UPSTREAM_IN_BYTES.inc_by(client_frame_len(&frame) as u64);
                        }
                        client_tx.send(frame).await?;
                    }
                    Forwarded::Closed => {
                        let _ = close_with_reason(&mut client_tx, CloseCode::Normal, None).await;
                        break;
                    }
                    Forwarded::Ignore => {}
                },
                Some(Err(err)) => {
                    // One structured error frame; only an actual upstream
                    // close terminates the session.
                    tracing::warn!(%err, "upstream protocol error");
                    if upstream_errored {
                        let _ = close_with_reason(
                            &mut client_tx,
                            CloseCode::InternalError,
                            Some("upstream failed"),
                        )
                        .await;
                        break;
                    }
                    upstream_errored = true;
                    let upstream_err = UpstreamError::Protocol(err.to_string());
                    let frame = RelayFrame::upstream_error(upstream_err.code(), err.to_string());
                    let payload = serde_json::to_string(&frame)?;
                    if client_tx.send(ws::Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = close_with_reason(&mut client_tx, CloseCode::Normal, None).await;
                    break;
                }
            }
        }
        Ok(())
    });

    let max_session = tokio::time::sleep(Duration::from_secs(state.limits.max_session_secs));
    tokio::pin!(max_session);
    tokio::select! {
        _ = &mut max_session => {
            tracing::warn!(session_id = %session.id, "session exceeded max duration, aborting");
            metrics::errors::record_ws_close(
                CloseCode::SessionTimeout.code(),
                CloseCode::SessionTimeout.reason(),
            );
            c2u.abort();
            u2c.abort();
        }
        _ = &mut c2u => {
            let _ = tokio::time::timeout(TEARDOWN_GRACE, &mut u2c).await;
            u2c.abort();
        }
        _ = &mut u2c => {
            let _ = tokio::time::timeout(TEARDOWN_GRACE, &mut c2u).await;
            c2u.abort();
        }
    }
    Ok(())
}

/// Deliver one structured error frame and close; used when the upstream leg
/// never opened.
async fn fail_client<S>(client_tx: &mut S, err: &UpstreamError)
where
    S: SinkExt<ws::Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let frame = RelayFrame::upstream_error(err.code(), err.to_string());
    if let Ok(payload) = serde_json::to_string(&frame) {
        let _ = client_tx.send(ws::Message::Text(payload.into())).await;
    }
    let _ = close_with_reason(client_tx, CloseCode::UpstreamUnavailable, None).await;
}

enum Forwarded<T> {
    Frame(T),
    Closed,
    Ignore,
}

/// Client data frames pass through verbatim. Keepalive frames stay
/// hop-local; each WS stack answers its own peer.
fn client_to_upstream(msg: ws::Message) -> Forwarded<UpstreamMessage> {
    match msg {
        ws::Message::Text(text) => {
            Forwarded::Frame(UpstreamMessage::Text(text.as_str().to_string().into()))
        }
        ws::Message::Binary(bytes) => Forwarded::Frame(UpstreamMessage::Binary(bytes)),
        ws::Message::Ping(_) | ws::Message::Pong(_) => Forwarded::Ignore,
        ws::Message::Close(_) => Forwarded::Closed,
    }
}

fn upstream_to_client(msg: UpstreamMessage) -> Forwarded<ws::Message> {
    match msg {
        UpstreamMessage::Text(text) => {
            Forwarded::Frame(ws::Message::Text(text.as_str().to_string().into()))
        }
        UpstreamMessage::Binary(bytes) => Forwarded::Frame(ws::Message::Binary(bytes)),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => {
            Forwarded::Ignore
        }
        UpstreamMessage::Close(_) => Forwarded::Closed,
    }
}

fn upstream_frame_len(msg: &UpstreamMessage) -> usize {
    match msg {
        UpstreamMessage::Text(t) => t.len(),
        UpstreamMessage::Binary(b) => b.len(),
        _ => 0,
    }
}

fn client_frame_len(msg: &ws::Message) -> usize {
    match msg {
        ws::Message::Text(t) => t.as_str().len(),
        ws::Message::Binary(b) => b.len(),
        _ => 0,
    }
}
