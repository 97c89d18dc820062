//! HTTP route handlers for the gate API.
//!
//! Pipeline calls are synchronous and touch the disk, so every handler runs
//! them on the blocking pool. Errors render as `{ok: false, error}`.

use actiongate::action::ActionMeta;
use actiongate::error::GateError;
use actiongate::gate::NewAction;
use actiongate::turn::{resume_turn, run_turn};
use anyhow::anyhow;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info};

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/actions", get(list_actions))
        .route("/action/add", post(add_action))
        .route("/action/approve", post(approve_action))
        .route("/action/reject", post(reject_action))
        .route("/action/rollback", post(rollback_action))
        .route("/action/preview/{id}", get(preview_action))
        .route("/turn", post(turn))
}

/// Shown for failures that have no plain-language form; the detail is logged.
const INTERNAL_ERROR_MESSAGE: &str =
    "Something went wrong on my side. The details are in the server log.";

/// Error response: status plus a plain-language message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = match err.downcast_ref::<GateError>() {
            Some(GateError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(GateError::InvalidTransition { .. } | GateError::NothingToRollBack(_)) => {
                StatusCode::CONFLICT
            }
            Some(GateError::InvalidAction(_)) => StatusCode::BAD_REQUEST,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match err.downcast_ref::<GateError>() {
            Some(gate_err) => gate_err.user_message(),
            None => {
                error!(error = %format!("{err:#}"), "request failed");
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        };
        Self { status, message }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"ok": false, "error": self.message})),
        )
            .into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

/// Run `work` on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::from(anyhow!("worker task failed: {err}")))?
        .map_err(ApiError::from)
}

/// Serialize `value` and mark it `ok: true`.
fn ok_json<T: Serialize>(value: &T) -> ApiResult {
    let mut body = serde_json::to_value(value).map_err(|err| ApiError::from(anyhow!(err)))?;
    if let Value::Object(map) = &mut body {
        map.insert("ok".to_string(), Value::Bool(true));
    }
    Ok(Json(body))
}

async fn health() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// GET /api/actions - the queue, newest first.
async fn list_actions(State(state): State<AppState>) -> ApiResult {
    let gate = state.gate.clone();
    let actions = blocking(move || Ok(gate.list())).await?;
    Ok(Json(json!({"ok": true, "actions": actions})))
}

#[derive(Debug, Deserialize)]
struct AddRequest {
    #[serde(rename = "type")]
    kind_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    meta: ActionMeta,
}

/// POST /api/action/add - queue a pending action.
async fn add_action(
    State(state): State<AppState>,
    body: Result<Json<AddRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let gate = state.gate.clone();
    let action = blocking(move || {
        gate.add(NewAction {
            kind_type: req.kind_type,
            payload: req.payload,
            title: req.title,
            reason: req.reason,
            meta: req.meta,
        })
    })
    .await?;
    Ok(Json(json!({"ok": true, "action": action})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunRequest {
    id: String,
    #[serde(default)]
    dry_run: bool,
}

/// POST /api/action/approve - execute a pending action.
///
/// `restart`/`off` signals schedule a shutdown; an approved follow-up
/// inspection re-enters planning and the resulting turn is returned.
async fn approve_action(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let worker = state.clone();
    let (outcome, turn) = blocking(move || {
        let outcome = worker.gate.approve(&req.id, req.dry_run)?;
        let turn = match &outcome.followup_message {
            Some(message) => Some(resume_turn(&worker.gate, worker.oracle.as_ref(), message)?),
            None => None,
        };
        Ok((outcome, turn))
    })
    .await?;

    if outcome.off_requested {
        let off_path = state.gate.paths().off_path.clone();
        tokio::fs::write(&off_path, "off\n")
            .await
            .map_err(|err| ApiError::from(anyhow!("write {}: {err}", off_path.display())))?;
        schedule_shutdown(&state, "off");
    } else if outcome.restart_requested {
        schedule_shutdown(&state, "restart");
    }

    let mut body = ok_json(&outcome)?;
    if let Some(turn) = turn {
        state.set_last_intent(turn.intent);
        body.0["turn"] = serde_json::to_value(&turn).map_err(|err| ApiError::from(anyhow!(err)))?;
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    id: String,
    #[serde(default)]
    note: Option<String>,
}

/// POST /api/action/reject
async fn reject_action(
    State(state): State<AppState>,
    body: Result<Json<RejectRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let gate = state.gate.clone();
    let action = blocking(move || gate.reject(&req.id, req.note)).await?;
    Ok(Json(json!({"ok": true, "action": action})))
}

/// POST /api/action/rollback
async fn rollback_action(
    State(state): State<AppState>,
    body: Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    let gate = state.gate.clone();
    let outcome = blocking(move || gate.rollback(&req.id, req.dry_run)).await?;
    ok_json(&outcome)
}

/// GET /api/action/preview/{id} - also accepts `{id}.json`.
async fn preview_action(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = id.strip_suffix(".json").unwrap_or(&id).to_string();
    let gate = state.gate.clone();
    let preview = blocking(move || gate.preview(&id)).await?;
    ok_json(&preview)
}

#[derive(Debug, Deserialize)]
struct TurnRequest {
    message: String,
}

/// POST /api/turn - run the planning loop for one message.
async fn turn(
    State(state): State<AppState>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = body?;
    if req.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    let worker = state.clone();
    let last_intent = state.last_intent();
    let outcome = blocking(move || {
        run_turn(
            &worker.gate,
            worker.oracle.as_ref(),
            &req.message,
            last_intent,
        )
    })
    .await?;
    state.set_last_intent(outcome.intent);
    ok_json(&outcome)
}

fn schedule_shutdown(state: &AppState, reason: &'static str) {
    let delay = state.shutdown_delay();
    let shutdown = state.shutdown.clone();
    info!(reason, delay_ms = delay.as_millis() as u64, "shutdown scheduled");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        shutdown.notify_one();
    });
}
