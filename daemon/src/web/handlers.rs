//! Control-surface handlers.
//!
//! Thin serialization shims over the supervisor: each handler delegates and
//! maps `SupervisorError` onto a status code and an `{error, kind}` body
//! (already-exists -> 400, not-found -> 404, everything else -> 500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::AppState;
use crate::api::{
    CallToolRequest, CallToolResponse, ErrorResponse, HealthResponse, MessageResponse,
    StartServerRequest, StartedResponse, ToolsResponse,
};
use crate::error::SupervisorError;
use crate::registry::{LaunchRequest, ServerInfo};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: SupervisorError) -> ApiError {
    let status = match &e {
        SupervisorError::AlreadyExists(_) => StatusCode::BAD_REQUEST,
        SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            kind: e.kind().to_string(),
        }),
    )
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        servers: state.supervisor.ids().await,
    })
}

pub async fn start_server(
    State(state): State<AppState>,
    Json(req): Json<StartServerRequest>,
) -> Result<Json<StartedResponse>, ApiError> {
    let request = LaunchRequest {
        package: req.pkg,
        version: req.version,
        args: req.args,
        env: req.env,
        client_name: req.client_name,
        client_version: req.client_version,
    };

    state
        .supervisor
        .start(&req.server_id, request)
        .await
        .map_err(|e| {
            tracing::error!("error starting server '{}': {}", req.server_id, e);
            error_response(e)
        })?;

    Ok(Json(StartedResponse {
        message: format!("Server {} started successfully", req.server_id),
        server_id: req.server_id,
    }))
}

pub async fn list_servers(State(state): State<AppState>) -> Json<Vec<ServerInfo>> {
    Json(state.supervisor.list().await)
}

pub async fn list_tools(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ToolsResponse>, ApiError> {
    let tools = state
        .supervisor
        .list_tools(&id)
        .await
        .map_err(error_response)?;
    Ok(Json(ToolsResponse {
        server_id: id,
        tools,
    }))
}

pub async fn call_tool(
    State(state): State<AppState>,
    Path((id, tool)): Path<(String, String)>,
    Json(req): Json<CallToolRequest>,
) -> Result<Json<CallToolResponse>, ApiError> {
    let arguments = if req.arguments.is_null() {
        serde_json::json!({})
    } else {
        req.arguments
    };

    let result = state
        .supervisor
        .call_tool(&id, &tool, arguments)
        .await
        .map_err(|e| {
            tracing::error!("error calling tool '{}' on '{}': {}", tool, id, e);
            error_response(e)
        })?;

    Ok(Json(CallToolResponse {
        server_id: id,
        tool_name: tool,
        result,
    }))
}

pub async fn stop_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.supervisor.stop(&id).await.map_err(error_response)?;
    Ok(Json(MessageResponse {
        message: format!("Server {} stopped successfully", id),
    }))
}

pub async fn stop_all_servers(State(state): State<AppState>) -> Json<MessageResponse> {
    state.supervisor.stop_all().await;
    Json(MessageResponse {
        message: "All servers stopped successfully".to_string(),
    })
}
