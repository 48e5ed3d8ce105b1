// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator bootstrap, used by `main` and by the integration tests.

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::broker::Broker;
use crate::channel::ChannelHub;
use crate::config::Config;
use crate::host::{reclaim, ClientMap};
use crate::logging::{ContextRing, ContextRingLayer, FLUSH_COOLDOWN, RING_CAPACITY};
use crate::registry::Registry;
use crate::settings;
use crate::store::Store;
use crate::{channel, http, mux, state_ws, supervisor};

pub struct RunResult {
    pub exit_code: i32,
}

/// A bound coordinator ready to serve.
pub struct PreparedCoordinator {
    pub store: Arc<Store>,
    pub local_addr: std::net::SocketAddr,
    listener: TcpListener,
    /// Keeps the non-blocking log writer alive for the process lifetime.
    _log_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize tracing: stderr fmt layer, rolling file layer, and the
/// context ring that flushes ahead of error lines.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let directive = if Config::developer_mode() && config.log_level == "info" {
        "debug".to_owned()
    } else {
        config.log_level.clone()
    };
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = config.log_dir.clone().unwrap_or_else(settings::default_log_dir);
    let file_parts = match std::fs::create_dir_all(&log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&log_dir, "mt.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            Some((writer, guard))
        }
        Err(_) => None,
    };

    let ring = Arc::new(ContextRing::new(RING_CAPACITY, FLUSH_COOLDOWN));
    let registry = tracing_subscriber::registry().with(filter);

    let result = match file_parts {
        Some((writer, guard)) => {
            // Ring layer first so flushed context lands ahead of the error
            // line in the same file.
            let ring_layer = ContextRingLayer::new(ring, writer.clone());
            let file_layer = tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer);
            let stderr_layer = stderr_layer(config);
            let r = registry.with(ring_layer).with(file_layer).with(stderr_layer).try_init();
            drop(r);
            Some(guard)
        }
        None => {
            let r = registry.with(stderr_layer(config)).try_init();
            drop(r);
            None
        }
    };
    result
}

fn stderr_layer<S>(config: &Config) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    if config.log_format == "json" {
        Box::new(
            tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr),
        )
    } else {
        Box::new(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    }
}

/// Build the axum router with all coordinator routes.
pub fn build_router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/sessions", get(http::list).post(http::create))
        .route("/api/v1/sessions/reorder", post(http::reorder))
        .route("/api/v1/sessions/{id}", axum::routing::delete(http::close))
        .route("/api/v1/sessions/{id}/name", put(http::rename))
        .route("/api/v1/sessions/{id}/select", post(http::select))
        .route("/ws/mux", get(mux::ws_mux_handler))
        .route("/ws/state", get(state_ws::ws_state_handler))
        .route("/ws/channel/{name}", get(channel::ws_channel_handler))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

/// Run the coordinator to completion.
pub async fn run(config: Config) -> anyhow::Result<RunResult> {
    if config.launcher {
        let guard = init_tracing(&config);
        let code = supervisor::run_launcher(&config).await?;
        drop(guard);
        return Ok(RunResult { exit_code: code });
    }
    prepare(config, true).await?.run().await
}

/// Bind the listener, reclaim orphans, and start the background tasks.
///
/// `init_logging` is false in tests that install their own subscriber.
pub async fn prepare(config: Config, init_logging: bool) -> anyhow::Result<PreparedCoordinator> {
    let log_guard = if init_logging { init_tracing(&config) } else { None };

    let settings_path =
        config.settings_path.clone().unwrap_or_else(settings::default_settings_path);
    let initial_settings = settings::load(&settings_path)
        .with_context(|| format!("load settings {}", settings_path.display()))?;

    let shutdown = CancellationToken::new();
    let store = Arc::new(Store {
        config,
        settings: parking_lot::RwLock::new(initial_settings),
        settings_path,
        registry: Arc::new(Registry::new()),
        broker: Broker::new(),
        clients: ClientMap::default(),
        channels: ChannelHub::default(),
        shutdown: shutdown.clone(),
    });

    // Channels the out-of-core collaborators publish on.
    for name in ["settings", "git", "auth"] {
        store.channels.register(name);
    }

    // Adopt hosts that survived a previous coordinator.
    let adopted = reclaim::reclaim_orphans(&store).await;
    if adopted > 0 {
        info!(adopted, "reclaimed orphan sessions");
    }

    // Janitor collects detached sessions past the grace period.
    tokio::spawn(crate::host::run_janitor(Arc::clone(&store)));

    let addr = format!("{}:{}", store.config.bind, store.config.port);
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("bind {addr}"))?;
    let local_addr = listener.local_addr()?;
    info!("HTTP listening on {local_addr}");

    // Signal handler: first signal is graceful, second forces exit.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                }
            }
            shutdown.cancel();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {}
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {}
            }
            std::process::exit(130);
        });
    }

    Ok(PreparedCoordinator { store, local_addr, listener, _log_guard: log_guard })
}

impl PreparedCoordinator {
    /// Serve until shutdown, then cancel in topological order: the accept
    /// loop stops first (graceful shutdown), then per-session IPC clients.
    /// Hosts themselves keep running, so sessions survive the coordinator.
    pub async fn run(self) -> anyhow::Result<RunResult> {
        let router = build_router(Arc::clone(&self.store));
        let shutdown = self.store.shutdown.clone();

        let serve_result = axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;
        if let Err(e) = serve_result {
            error!("HTTP server error: {e}");
            return Ok(RunResult { exit_code: 1 });
        }

        shutdown.cancel();
        self.store.clients.cancel_all();
        info!("coordinator stopped; hosts keep running for reclaim");
        Ok(RunResult { exit_code: 0 })
    }
}
