// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session-lifecycle HTTP surface.
//!
//! The browser UI (out of scope) drives session create/close/rename/reorder
//! through these routes; they are thin wrappers over the registry and the
//! per-session IPC clients.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use mtwire::session::{SessionId, ShellKind, TermSize};

use crate::error::ErrorCode;
use crate::registry::SessionSnapshot;
use crate::store::{CreateOptions, Store};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pid: u32,
    pub version: &'static str,
    pub sessions: usize,
}

pub async fn health(State(store): State<Arc<Store>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running",
        pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION"),
        sessions: store.list_sessions().len(),
    })
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSnapshot>,
}

pub async fn list(State(store): State<Arc<Store>>) -> Json<SessionsResponse> {
    Json(SessionsResponse { sessions: store.list_sessions() })
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateRequest {
    pub shell: Option<String>,
    pub cwd: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub id: SessionId,
}

pub async fn create(
    State(store): State<Arc<Store>>,
    body: Option<Json<CreateRequest>>,
) -> impl IntoResponse {
    let req = body.map(|Json(req)| req).unwrap_or_default();

    let shell = match req.shell.as_deref() {
        Some(name) => match ShellKind::from_name(name) {
            Some(kind) => Some(kind),
            None => {
                return ErrorCode::BadRequest
                    .to_http_response(format!("unknown shell: {name}"))
                    .into_response();
            }
        },
        None => None,
    };
    let size = match (req.cols, req.rows) {
        (Some(cols), Some(rows)) => Some(TermSize { cols, rows }),
        (None, None) => None,
        _ => {
            return ErrorCode::BadRequest
                .to_http_response("cols and rows must be provided together")
                .into_response();
        }
    };

    let opts = CreateOptions { shell, cwd: req.cwd.map(Into::into), size };
    match store.create_session(opts).await {
        Ok(id) => (StatusCode::CREATED, Json(CreateResponse { id })).into_response(),
        Err(code) => code.to_http_response("session spawn failed").into_response(),
    }
}

pub async fn close(
    State(store): State<Arc<Store>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = SessionId::parse(&id) else {
        return ErrorCode::BadRequest.to_http_response("invalid session id").into_response();
    };
    match store.close_session(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => code.to_http_response("close failed").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

pub async fn rename(
    State(store): State<Arc<Store>>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> impl IntoResponse {
    let Ok(id) = SessionId::parse(&id) else {
        return ErrorCode::BadRequest.to_http_response("invalid session id").into_response();
    };
    match store.rename_session(&id, req.name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(code) => code.to_http_response("rename failed").into_response(),
    }
}

pub async fn select(
    State(store): State<Arc<Store>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = SessionId::parse(&id) else {
        return ErrorCode::BadRequest.to_http_response("invalid session id").into_response();
    };
    if !store.registry.contains(&id) {
        return ErrorCode::NotFound.to_http_response("unknown session").into_response();
    }
    store.registry.set_active(Some(id));
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub order: Vec<String>,
}

pub async fn reorder(
    State(store): State<Arc<Store>>,
    Json(req): Json<ReorderRequest>,
) -> impl IntoResponse {
    let mut order = Vec::with_capacity(req.order.len());
    for raw in &req.order {
        match SessionId::parse(raw) {
            Ok(id) => order.push(id),
            Err(_) => {
                return ErrorCode::BadRequest
                    .to_http_response(format!("invalid session id: {raw}"))
                    .into_response();
            }
        }
    }
    store.registry.reorder(&order);
    StatusCode::NO_CONTENT.into_response()
}
