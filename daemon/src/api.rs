//! Request/response bodies of the control surface.
//!
//! Shared between the axum handlers and the CLI-side HTTP client so the two
//! cannot drift apart. Wire names are camelCase.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::ToolDescriptor;

/// `GET /health`
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub servers: Vec<String>,
}

/// `POST /servers`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartServerRequest {
    pub server_id: String,
    pub pkg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedResponse {
    pub message: String,
    pub server_id: String,
}

/// `GET /servers/{id}/tools`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsResponse {
    pub server_id: String,
    pub tools: Vec<ToolDescriptor>,
}

/// `POST /servers/{id}/tools/{tool}/call`
#[derive(Debug, Serialize, Deserialize)]
pub struct CallToolRequest {
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResponse {
    pub server_id: String,
    pub tool_name: String,
    pub result: Value,
}

/// Confirmation body for stop / stop-all.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error body: human-readable message plus a stable machine-readable kind.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}
