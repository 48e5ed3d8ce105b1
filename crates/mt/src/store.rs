// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared coordinator state and the session operations exposed to every
//! transport surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mtwire::session::{SessionId, ShellKind, TermSize};

use crate::broker::Broker;
use crate::channel::ChannelHub;
use crate::config::Config;
use crate::error::ErrorCode;
use crate::host::{spawn, spawn_session_task, ClientMap, HostClient};
use crate::registry::{Registry, SessionSnapshot};
use crate::settings::Settings;

/// Shared application state passed to all handlers via axum `State`.
pub struct Store {
    pub config: Config,
    pub settings: parking_lot::RwLock<Settings>,
    pub settings_path: PathBuf,
    pub registry: Arc<Registry>,
    pub broker: Broker,
    pub clients: ClientMap,
    pub channels: ChannelHub,
    pub shutdown: CancellationToken,
}

/// Options accepted by session create.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub shell: Option<ShellKind>,
    pub cwd: Option<PathBuf>,
    pub size: Option<TermSize>,
}

impl Store {
    /// Re-read settings from disk (auth checks see updates without restart).
    pub fn reload_settings(&self) {
        match crate::settings::load(&self.settings_path) {
            Ok(settings) => *self.settings.write() = settings,
            Err(e) => warn!("settings reload failed: {e}"),
        }
    }

    /// Whether a presented token satisfies the auth settings.
    pub fn authorized(&self, token: Option<&str>) -> bool {
        let settings = self.settings.read();
        if !settings.authentication_enabled {
            return true;
        }
        token.map(|t| settings.password_matches(t)).unwrap_or(false)
    }

    /// Create a session: spawn a host, handshake, register, and start the
    /// session task. Returns the new id.
    pub async fn create_session(
        self: &Arc<Self>,
        mut opts: CreateOptions,
    ) -> Result<SessionId, ErrorCode> {
        if opts.shell.is_none() {
            opts.shell = self.settings.read().default_shell_kind();
        }

        let id = self.registry.fresh_id();
        if self.registry.reserve(&id).is_err() {
            return Err(ErrorCode::Internal);
        }

        let spawn_opts = spawn::SpawnOptions {
            shell: opts.shell,
            cwd: opts.cwd.clone(),
            size: opts.size,
        };
        let result = self.spawn_and_attach(&id, &spawn_opts).await;
        match result {
            Ok(()) => Ok(id),
            Err(e) => {
                warn!(session = %id, "session spawn failed: {e:#}");
                self.registry.abort_spawn(&id);
                Err(ErrorCode::SpawnFailed)
            }
        }
    }

    async fn spawn_and_attach(
        self: &Arc<Self>,
        id: &SessionId,
        opts: &spawn::SpawnOptions,
    ) -> anyhow::Result<()> {
        spawn::spawn_host(&self.config, id, opts).await?;
        self.registry.begin_handshake(id);

        // The host binds its endpoint right after the launch line; give it
        // a moment under load.
        let socket = spawn::socket_path(&self.config, id);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let (client, events) = loop {
            match HostClient::connect(id.clone(), &socket).await {
                Ok(pair) => break pair,
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(e);
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        };

        let info = client.get_info().await?;
        self.registry.attach_host(id, info)?;
        self.clients.insert(id.clone(), client);
        spawn_session_task(Arc::clone(self), id.clone(), events);
        Ok(())
    }

    /// Close a session: round-trip `Close → CloseAck` when a host is
    /// attached, then drop the record.
    pub async fn close_session(&self, id: &SessionId) -> Result<(), ErrorCode> {
        if !self.registry.contains(id) {
            return Err(ErrorCode::NotFound);
        }
        if let Some(client) = self.clients.remove(id) {
            if let Err(e) = client.close().await {
                warn!(session = %id, "close handshake failed: {e}");
            }
            client.cancel();
        }
        self.registry.close(id);
        Ok(())
    }

    /// Forward PTY input. Detached sessions reject input (dropped with a
    /// log entry).
    pub async fn send_input(&self, id: &SessionId, data: Bytes) -> Result<(), ErrorCode> {
        let Some(client) = self.clients.get(id) else {
            info!(session = %id, "dropping {} input bytes for detached session", data.len());
            return Err(ErrorCode::SessionDetached);
        };
        client.input(data).await.map_err(|e| {
            warn!(session = %id, "input write failed: {e}");
            ErrorCode::SessionDetached
        })
    }

    /// Forward a resize and record the acked dims.
    pub async fn resize_session(
        &self,
        id: &SessionId,
        size: TermSize,
    ) -> Result<TermSize, ErrorCode> {
        let Some(client) = self.clients.get(id) else {
            return Err(ErrorCode::SessionDetached);
        };
        let applied = client.resize(size).await.map_err(|e| {
            warn!(session = %id, "resize failed: {e}");
            ErrorCode::SessionDetached
        })?;
        self.registry.update_dims(id, applied.cols, applied.rows);
        Ok(applied)
    }

    /// Fetch the host scrollback for a resync replay.
    pub async fn fetch_buffer(&self, id: &SessionId) -> Result<Bytes, ErrorCode> {
        let Some(client) = self.clients.get(id) else {
            return Err(ErrorCode::SessionDetached);
        };
        client.get_buffer().await.map_err(|e| {
            warn!(session = %id, "buffer fetch failed: {e}");
            ErrorCode::SessionDetached
        })
    }

    /// Rename a session (host ack first, then the registry).
    pub async fn rename_session(&self, id: &SessionId, name: String) -> Result<(), ErrorCode> {
        if !self.registry.contains(id) {
            return Err(ErrorCode::NotFound);
        }
        if let Some(client) = self.clients.get(id) {
            client.set_name(name.clone()).await.map_err(|_| ErrorCode::SessionDetached)?;
        }
        self.registry.rename(id, if name.is_empty() { None } else { Some(name) });
        Ok(())
    }

    /// Snapshot of all visible sessions.
    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.registry.list()
    }
}
