// Admin HTTP surface: supervisor lifecycle, instance management, inbound inputs,
// and the client socket endpoint.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{EngineError, InputEvent};
use crate::interface_adapters::net;
use crate::interface_adapters::protocol::{
    CreateInstanceRequest, DiagnosticsDto, EngineStatusResponse, ErrorResponse, GameStateDto,
    InputEventDto, InstanceDetailResponse, InstanceResponse, SettingsUpdateRequest, StopResponse,
};
use crate::interface_adapters::state::AppState;
use crate::use_cases::management;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/engine/status", get(engine_status))
        .route("/engine/discovery/start", post(start_discovery))
        .route("/engine/discovery/stop", post(stop_discovery))
        .route("/instances", post(create_instance))
        .route("/instances/{id}", get(get_instance))
        .route("/instances/{id}/settings", put(update_settings))
        .route("/instances/{id}/stop", post(stop_instance))
        .route("/inputs", post(submit_input))
        .route("/ws", get(net::ws_handler))
        .with_state(state)
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn engine_error_response(err: EngineError) -> Response {
    let status = match &err {
        EngineError::ConfigMalformedSettings(_) | EngineError::InvalidParticipants(_) => {
            StatusCode::BAD_REQUEST
        }
        EngineError::UnknownDefinition(_) => StatusCode::NOT_FOUND,
        EngineError::InstanceNotReady(_) => StatusCode::CONFLICT,
        EngineError::StoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

fn parse_instance_id(raw: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(raw)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid instance id"))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn engine_status(State(state): State<AppState>) -> impl IntoResponse {
    let supervisor = &state.supervisor;
    Json(EngineStatusResponse {
        running: supervisor.is_running(),
        live_instances: supervisor.live_count().await,
        diagnostics: DiagnosticsDto::from(supervisor.diagnostics()),
    })
}

async fn start_discovery(State(state): State<AppState>) -> impl IntoResponse {
    let started = state.supervisor.start();
    Json(json!({ "running": true, "changed": started }))
}

async fn stop_discovery(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.supervisor.stop().await;
    Json(json!({ "running": false, "changed": stopped }))
}

async fn create_instance(
    State(state): State<AppState>,
    Json(payload): Json<CreateInstanceRequest>,
) -> Response {
    let definition_id = payload.definition_id.trim();
    if definition_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "definition_id is required");
    }

    let store = state.supervisor.store();
    match management::create_instance(
        store.as_ref(),
        definition_id,
        payload.participants,
        payload.settings,
    )
    .await
    {
        Ok(instance) => (
            StatusCode::CREATED,
            Json(InstanceResponse::from(&instance)),
        )
            .into_response(),
        Err(err) => engine_error_response(err),
    }
}

async fn get_instance(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_instance_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let instance = match state.supervisor.store().get(id).await {
        Ok(Some(instance)) => instance,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "instance not found"),
        Err(err) => return engine_error_response(EngineError::StoreFailure(err)),
    };
    let live_state = state
        .supervisor
        .describe(id)
        .await
        .map(|description| GameStateDto::from(&description.snapshot));

    Json(InstanceDetailResponse {
        instance: InstanceResponse::from(&instance),
        live_state,
        final_state: instance.state,
    })
    .into_response()
}

async fn update_settings(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(payload): Json<SettingsUpdateRequest>,
) -> Response {
    let id = match parse_instance_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let store = state.supervisor.store();
    let gateway = state.supervisor.gateway();
    match management::update_settings(
        store.as_ref(),
        &gateway,
        id,
        payload.settings,
        payload.updated_by,
    )
    .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => engine_error_response(err),
    }
}

async fn stop_instance(State(state): State<AppState>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_instance_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    let outcome = state.supervisor.router().request_stop(id).await;
    if !outcome.accepted() {
        return error_response(StatusCode::NOT_FOUND, "no live task for instance");
    }
    (
        StatusCode::ACCEPTED,
        Json(StopResponse {
            instance_id: id,
            accepted: true,
        }),
    )
        .into_response()
}

async fn submit_input(
    State(state): State<AppState>,
    Json(payload): Json<InputEventDto>,
) -> Response {
    let event = match InputEvent::try_from(payload) {
        Ok(event) => event,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };

    if state.inbound_tx.send(event).await.is_err() {
        warn!("inbound stream closed; input rejected");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "inbound stream closed");
    }
    StatusCode::ACCEPTED.into_response()
}
