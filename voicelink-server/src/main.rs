// Copyright (c) Voicelink, all rights reserved.
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::Result;
use axum::response::IntoResponse;
use std::str::FromStr;
use std::sync::Arc;

mod auth;
mod error;
mod ledger;
mod metrics;
mod protocol;
mod registry;
mod relay;
mod utils;

#[derive(clap::Parser, Debug)]
struct WorkerArgs {
    #[clap(short = 'l', long = "log", default_value = "info")]
    log_level: String,

    #[clap(short = 'a', long = "addr", default_value = "0.0.0.0")]
    addr: String,

    #[clap(short = 'p', long = "port", default_value = "8080")]
    port: u16,

    #[clap(long)]
    config: String,

    #[clap(long)]
    silent: bool,

    /// Maximum size of each log file in MB before rotation (default: 100)
    #[clap(long, default_value = "100")]
    log_max_size_mb: u64,

    /// Maximum number of rotated log files to keep (default: 10)
    #[clap(long, default_value = "10")]
    log_max_files: usize,

    /// Use JSON structured logging
    #[clap(long)]
    json: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    Validate { configs: Vec<String> },
    Worker(WorkerArgs),
}

#[derive(clap::Parser, Debug)]
#[clap(name = "server", about = "voicelink relay server")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct QuotaConfig {
    pub db_path: String,
    #[serde(default = "default_price_cents_per_minute")]
    pub price_cents_per_minute: i64,
}

fn default_price_cents_per_minute() -> i64 {
    10
}

fn default_upstream_connect_timeout_secs() -> u64 {
    10
}

fn default_max_session_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct LimitsConfig {
    /// Bound on how long the upstream leg may take to open.
    #[serde(default = "default_upstream_connect_timeout_secs")]
    pub upstream_connect_timeout_secs: u64,
    /// Bound on total session duration.
    #[serde(default = "default_max_session_secs")]
    pub max_session_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            upstream_connect_timeout_secs: default_upstream_connect_timeout_secs(),
            max_session_secs: default_max_session_secs(),
        }
    }
}

fn default_relay_path() -> String {
    "/api/relay".to_string()
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub instance_name: String,
    pub log_dir: String,
    #[serde(default = "default_relay_path")]
    pub relay_path: String,
    pub quota: QuotaConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub providers: std::collections::HashMap<String, registry::ProviderTarget>,
    /// Authentication configuration derived from environment.
    #[serde(skip)]
    #[serde(default)]
    pub auth: auth::AuthConfig,
}

impl Config {
    pub fn load<P: AsRef<std::path::Path>>(p: P) -> Result<Self> {
        let config = std::fs::read_to_string(p)?;
        let mut config: Self = toml::from_str(&config)?;

        // Derive auth config from environment.
        config.auth = auth::AuthConfig::from_env();

        config.log_dir = utils::replace_env_vars(&config.log_dir);
        config.quota.db_path = utils::replace_env_vars(&config.quota.db_path);
        anyhow::ensure!(!config.providers.is_empty(), "no providers configured");
        // Validate provider tables eagerly so `validate` catches mistakes.
        let _ = registry::ProviderRegistry::new(&config.providers)?;
        Ok(config)
    }
}

/// Configuration for log rotation
struct LogConfig {
    log_dir: String,
    instance_name: String,
    log_level: String,
    silent: bool,
    max_size_mb: u64,
    max_files: usize,
    json: bool,
}

fn tracing_init(config: LogConfig) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use std::io::IsTerminal;
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::time::ChronoLocal;
    use tracing_subscriber::prelude::*;

    std::fs::create_dir_all(&config.log_dir)?;

    // Debian-style naming: log.instance, log.instance.1, log.instance.2, ...
    let log_path =
        std::path::Path::new(&config.log_dir).join(format!("log.{}", config.instance_name));

    // Rotate daily or when the file exceeds max_size_mb.
    let condition = RollingConditionBase::new().daily().max_size(config.max_size_mb * 1024 * 1024);
    let file_appender = RollingFileAppenderBase::new(log_path, condition, config.max_files)?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::filter::LevelFilter::from_str(&config.log_level)?;
    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

    // File layer: no ANSI colors, clean timestamps (or JSON).
    let file_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer.clone())
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_writer(non_blocking_file)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .event_format(
                tracing_subscriber::fmt::format()
                    .with_timer(timer.clone())
                    .with_file(true)
                    .with_line_number(true)
                    .with_target(true)
                    .with_ansi(false),
            )
            .with_writer(non_blocking_file)
            .with_filter(filter)
            .boxed()
    };

    if config.silent {
        tracing_subscriber::registry().with(file_layer).init();
    } else {
        let console_layer = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_timer(timer)
                .with_file(true)
                .with_line_number(true)
                .with_target(true)
                .with_writer(std::io::stdout)
                .with_filter(filter)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_target(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_writer(std::io::stdout)
                .with_filter(filter)
                .boxed()
        };
        tracing_subscriber::registry().with(file_layer).with(console_layer).init();
    }

    tracing::info!(
        log_dir = %config.log_dir,
        max_size_mb = config.max_size_mb,
        max_files = config.max_files,
        json = config.json,
        "Logging initialized with rotation"
    );

    Ok(guard)
}

async fn metrics_endpoint(
    axum::extract::ConnectInfo(_addr): axum::extract::ConnectInfo<std::net::SocketAddr>,
) -> impl IntoResponse {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    };
    axum::response::Response::builder()
        .status(200)
        .header(axum::http::header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
        .unwrap()
}

/// Response structure for /api/status endpoint
#[derive(serde::Serialize, Debug)]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: u64,
    /// ISO 8601 timestamp when server started
    started_at: String,
    version: &'static str,
    open_sessions: usize,
    /// Open session count per provider
    sessions_by_provider: std::collections::HashMap<String, usize>,
    /// Providers the registry can relay to
    providers: Vec<String>,
    auth: AuthInfo,
}

/// Authentication configuration (without secrets)
#[derive(serde::Serialize, Debug)]
struct AuthInfo {
    jwt_configured: bool,
}

/// Global server start time (set once at startup)
static SERVER_START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
static SERVER_START_TIMESTAMP: std::sync::OnceLock<String> = std::sync::OnceLock::new();

fn init_server_start_time() {
    SERVER_START_TIME.get_or_init(std::time::Instant::now);
    SERVER_START_TIMESTAMP
        .get_or_init(|| chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
}

fn get_uptime_seconds() -> u64 {
    SERVER_START_TIME.get().map(|start| start.elapsed().as_secs()).unwrap_or(0)
}

async fn server_status(
    axum::extract::ConnectInfo(_addr): axum::extract::ConnectInfo<std::net::SocketAddr>,
    state: axum::extract::State<relay::SharedRelay>,
) -> impl IntoResponse {
    let sessions_by_provider = state
        .sessions
        .provider_counts()
        .into_iter()
        .map(|(provider, count)| (provider.to_string(), count))
        .collect();
    let response = StatusResponse {
        status: "healthy",
        uptime_seconds: get_uptime_seconds(),
        started_at: SERVER_START_TIMESTAMP.get().cloned().unwrap_or_else(|| "unknown".to_string()),
        version: env!("CARGO_PKG_VERSION"),
        open_sessions: state.sessions.len(),
        sessions_by_provider,
        providers: state.registry.configured().iter().map(|p| p.to_string()).collect(),
        auth: AuthInfo { jwt_configured: state.auth.secret.is_some() },
    };
    utils::WrapJson(Ok(response)).into_response()
}

/// Simple health check endpoint returning JSON
async fn health_check() -> impl IntoResponse {
    #[derive(serde::Serialize)]
    struct HealthResponse {
        status: &'static str,
        uptime_seconds: u64,
    }

    axum::Json(HealthResponse { status: "ok", uptime_seconds: get_uptime_seconds() })
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    // When an error bubbles up in the tokio main function, the whole program
    // does not seem to crash if some background tasks are still running, so
    // errors such as "port already in use" could go unreported. Exit the
    // process explicitly here.
    if let Err(err) = main_().await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn main_() -> Result<()> {
    // Load .env file if present (before parsing args so env vars are available)
    dotenvy::dotenv().ok();

    let args = <Args as clap::Parser>::parse();
    match args.command {
        Command::Validate { configs } => {
            tracing_subscriber::fmt().init();
            for config in configs.iter() {
                let _ = Config::load(config)?;
                tracing::info!(?config, "loaded succesfully")
            }
        }
        Command::Worker(args) => {
            use axum::routing::get;

            let config = Config::load(&args.config)?;

            if std::env::var("RUST_LOG").is_err() {
                std::env::set_var("RUST_LOG", format!("{},hyper=info,mio=info", args.log_level))
            }
            let log_config = LogConfig {
                log_dir: config.log_dir.clone(),
                instance_name: config.instance_name.clone(),
                log_level: args.log_level.clone(),
                silent: args.silent,
                max_size_mb: args.log_max_size_mb,
                max_files: args.log_max_files,
                json: args.json,
            };
            let _guard = tracing_init(log_config)?;

            let startup_span = tracing::info_span!("startup");
            let _enter = startup_span.enter();

            config.auth.log_config();

            let num_workers = tokio::runtime::Handle::current().metrics().num_workers();
            tracing::info!(num_workers, instance_name = %config.instance_name, "starting worker");

            let ledger =
                ledger::SledLedger::open(&config.quota.db_path, config.quota.price_cents_per_minute)?;
            let registry = registry::ProviderRegistry::new(&config.providers)?;
            tracing::info!(providers = ?registry.configured(), "provider registry loaded");

            let state: relay::SharedRelay = Arc::new(relay::RelayState {
                auth: config.auth.clone(),
                registry,
                ledger: Arc::new(ledger),
                sessions: relay::SessionRegistry::default(),
                limits: config.limits,
            });
            init_server_start_time();

            let app = axum::Router::new()
                .route("/api/status", get(server_status))
                .route("/api/health", get(health_check))
                .route("/metrics", get(metrics_endpoint))
                .with_state(state.clone())
                .merge(relay::router(&config.relay_path, state.clone()))
                .layer(
                    tower::ServiceBuilder::new()
                        .layer(tower_http::request_id::SetRequestIdLayer::x_request_id(
                            tower_http::request_id::MakeRequestUuid,
                        ))
                        .layer(tower_http::trace::TraceLayer::new_for_http()),
                );

            drop(_enter);

            let sock_addr = std::net::SocketAddr::from((
                std::net::IpAddr::from_str(args.addr.as_str())
                    .unwrap_or(std::net::IpAddr::V6(std::net::Ipv6Addr::LOCALHOST)),
                args.port,
            ));
            tracing::info!("listening on {}", sock_addr);
            let listener = tokio::net::TcpListener::bind(sock_addr).await?;
            axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
                .await?
        }
    }
    Ok(())
}
