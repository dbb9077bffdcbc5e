//! Thin axum HTTP mirror of the lifecycle surface.
//!
//! Every route delegates straight to the `LifecycleController`; the mirror
//! adds no behavior of its own beyond JSON shaping.

use crate::control::{LifecycleController, StartOutcome, StopOutcome};
use crate::error::RegistryError;
use crate::registry::Bot;
use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size; the mirror only ever receives tiny bodies
pub const MAX_BODY_SIZE: usize = 16_384;
/// Request timeout to prevent slow-loris stalls
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

const LOG_TAIL_LINES: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LifecycleController>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/bots", get(handle_list))
        .route("/bots/{id}/start", post(handle_start))
        .route("/bots/{id}/stop", post(handle_stop))
        .route("/bots/{id}/restart", post(handle_restart))
        .route("/bots/{id}/log", get(handle_log))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .with_state(state)
}

pub async fn run(controller: Arc<LifecycleController>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind HTTP mirror to {bind}"))?;
    tracing::info!("HTTP mirror listening on {bind}");
    axum::serve(listener, router(AppState { controller }))
        .await
        .context("HTTP mirror server failed")?;
    Ok(())
}

#[derive(Serialize)]
struct BotView {
    id: i64,
    name: String,
    kind: String,
    status: String,
    script_path: String,
    group: Option<String>,
    schedule: Option<String>,
    start_count: u32,
}

impl From<&Bot> for BotView {
    fn from(bot: &Bot) -> Self {
        Self {
            id: bot.id,
            name: bot.name.clone(),
            kind: bot.kind.to_string(),
            status: bot.status.to_string(),
            script_path: bot.script_path.clone(),
            group: bot.group.clone(),
            schedule: bot.schedule.map(|s| s.to_string()),
            start_count: bot.start_count,
        }
    }
}

type Reply = (StatusCode, Json<serde_json::Value>);

fn ok_reply(result: &str) -> Reply {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "ok": true, "result": result })),
    )
}

fn error_reply(error: &anyhow::Error) -> Reply {
    let status = if matches!(
        error.downcast_ref::<RegistryError>(),
        Some(RegistryError::NotFound(_))
    ) {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(serde_json::json!({ "ok": false, "reason": format!("{error:#}") })),
    )
}

async fn handle_health() -> Reply {
    ok_reply("alive")
}

async fn handle_list(State(state): State<AppState>) -> Reply {
    match state.controller.registry().list() {
        Ok(bots) => {
            let views: Vec<BotView> = bots.iter().map(BotView::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "ok": true, "bots": views })),
            )
        }
        Err(e) => error_reply(&e),
    }
}

async fn handle_start(State(state): State<AppState>, Path(id): Path<i64>) -> Reply {
    match state.controller.start(id).await {
        Ok(StartOutcome::Started) => ok_reply("started"),
        Ok(StartOutcome::AlreadyRunning) => ok_reply("already running"),
        Err(e) => error_reply(&e),
    }
}

async fn handle_stop(State(state): State<AppState>, Path(id): Path<i64>) -> Reply {
    match state.controller.stop(id).await {
        Ok(StopOutcome::Stopped) => ok_reply("stopped"),
        Ok(StopOutcome::AlreadyStopped) => ok_reply("already stopped"),
        Err(e) => error_reply(&e),
    }
}

async fn handle_restart(State(state): State<AppState>, Path(id): Path<i64>) -> Reply {
    match state.controller.restart(id).await {
        Ok(_) => ok_reply("restarted"),
        Err(e) => error_reply(&e),
    }
}

async fn handle_log(State(state): State<AppState>, Path(id): Path<i64>) -> Reply {
    match state.controller.get_log(id, LOG_TAIL_LINES).await {
        Ok(text) => (
            StatusCode::OK,
            Json(serde_json::json!({ "ok": true, "log": text })),
        ),
        Err(e) => error_reply(&e),
    }
}
