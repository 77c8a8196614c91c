use crate::AppState;
use crate::error::AppError;
use crate::gate::{ConnectionAttempt, DenialReason};
use crate::sessions::ReportedSession;
use crate::validation;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_macros::debug_handler;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize)]
pub(crate) struct ConnectRequest {
    player_id: String,
    player_name: String,
    server: String,
}

#[derive(Serialize)]
pub(crate) struct ConnectResponse {
    allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct JoinedRequest {
    player_id: String,
    player_name: String,
    server: String,
    #[serde(default)]
    previous_server: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct LeftRequest {
    player_id: String,
    player_name: String,
}

#[derive(Deserialize)]
pub(crate) struct SessionPayload {
    player_id: String,
    player_name: String,
    server: String,
}

#[derive(Deserialize)]
pub(crate) struct SyncRequest {
    sessions: Vec<SessionPayload>,
}

#[derive(Serialize)]
pub(crate) struct ServerStatusPayload {
    display_name: String,
    reachable: bool,
}

#[derive(Serialize)]
pub(crate) struct StatusResponse {
    servers: BTreeMap<String, ServerStatusPayload>,
}

fn parse_player_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::InvalidPlayerId(raw.to_string()))
}

#[debug_handler]
pub(crate) async fn connect(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConnectRequest>,
) -> Result<impl IntoResponse, AppError> {
    let player_id = parse_player_id(&payload.player_id)?;
    validation::validate_player_name(&payload.player_name)?;
    validation::validate_server_name(&payload.server)?;

    let attempt = ConnectionAttempt {
        player_id,
        player_name: payload.player_name,
        server: payload.server,
    };
    let decision = state.on_connection_attempt(&attempt).await;

    Ok(Json(ConnectResponse {
        allow: decision.is_allowed(),
        reason: decision.denial().map(|d| d.reason()),
        message: decision.message().map(str::to_string),
    }))
}

#[debug_handler]
pub(crate) async fn joined(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<JoinedRequest>,
) -> Result<impl IntoResponse, AppError> {
    let player_id = parse_player_id(&payload.player_id)?;
    validation::validate_player_name(&payload.player_name)?;
    validation::validate_server_name(&payload.server)?;
    if let Some(previous) = &payload.previous_server {
        validation::validate_server_name(previous)?;
    }

    state
        .on_server_connected(
            player_id,
            &payload.player_name,
            &payload.server,
            payload.previous_server,
        )
        .await?;

    Ok(StatusCode::OK)
}

pub(crate) async fn left(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LeftRequest>,
) -> Result<impl IntoResponse, AppError> {
    let player_id = parse_player_id(&payload.player_id)?;
    validation::validate_player_name(&payload.player_name)?;

    state.on_disconnect(player_id, &payload.player_name).await;

    Ok(StatusCode::OK)
}

pub(crate) async fn sync(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SyncRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_session_count(payload.sessions.len())?;

    let mut sessions = Vec::with_capacity(payload.sessions.len());
    for session in payload.sessions {
        validation::validate_player_name(&session.player_name)?;
        validation::validate_server_name(&session.server)?;
        sessions.push(ReportedSession {
            player_id: parse_player_id(&session.player_id)?,
            player_name: session.player_name,
            server: session.server,
        });
    }

    state.sync_sessions(&sessions).await;

    Ok(StatusCode::OK)
}

pub(crate) async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let servers = state
        .reachability()
        .await
        .into_iter()
        .map(|s| {
            (
                s.name,
                ServerStatusPayload {
                    display_name: s.display_name,
                    reachable: s.reachable,
                },
            )
        })
        .collect();

    Json(StatusResponse { servers })
}
