//! HTTP client for talking to a running daemon.
//!
//! One method per control-surface operation; failures carry the daemon's
//! error message. Used by every CLI command except `daemon start` itself.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::{
    CallToolRequest, CallToolResponse, ErrorResponse, HealthResponse, MessageResponse,
    StartServerRequest, StartedResponse, ToolsResponse,
};
use crate::registry::ServerInfo;

/// Matches the original client's request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a start request; an id that already exists is not an error for
/// the CLI, which reuses the running instance.
#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Clone)]
pub struct DaemonClient {
    base_url: String,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .with_context(|| format!("failed to connect to daemon at {}", self.base_url))?;
        parse(response).await
    }

    pub async fn is_running(&self) -> bool {
        self.health().await.is_ok()
    }

    /// Poll until the daemon answers health checks.
    pub async fn wait_until_ready(&self, max_retries: u32, delay: Duration) -> Result<()> {
        for _ in 0..max_retries {
            if self.is_running().await {
                return Ok(());
            }
            tokio::time::sleep(delay).await;
        }
        bail!("daemon did not become ready at {}", self.base_url)
    }

    pub async fn start_server(&self, request: &StartServerRequest) -> Result<StartOutcome> {
        let response = self
            .http
            .post(format!("{}/servers", self.base_url))
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to connect to daemon at {}", self.base_url))?;

        if response.status() == StatusCode::BAD_REQUEST {
            let error: ErrorResponse = response
                .json()
                .await
                .context("failed to parse daemon error response")?;
            if error.kind == "already_exists" {
                return Ok(StartOutcome::AlreadyRunning);
            }
            bail!("{}", error.error);
        }

        let _: StartedResponse = parse(response).await?;
        Ok(StartOutcome::Started)
    }

    pub async fn list_servers(&self) -> Result<Vec<ServerInfo>> {
        let response = self
            .http
            .get(format!("{}/servers", self.base_url))
            .send()
            .await
            .with_context(|| format!("failed to connect to daemon at {}", self.base_url))?;
        parse(response).await
    }

    pub async fn list_tools(&self, server_id: &str) -> Result<ToolsResponse> {
        let response = self
            .http
            .get(format!("{}/servers/{}/tools", self.base_url, server_id))
            .send()
            .await
            .with_context(|| format!("failed to connect to daemon at {}", self.base_url))?;
        parse(response).await
    }

    pub async fn call_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        arguments: Value,
    ) -> Result<CallToolResponse> {
        let response = self
            .http
            .post(format!(
                "{}/servers/{}/tools/{}/call",
                self.base_url, server_id, tool_name
            ))
            .json(&CallToolRequest { arguments })
            .send()
            .await
            .with_context(|| format!("failed to connect to daemon at {}", self.base_url))?;
        parse(response).await
    }

    pub async fn stop_server(&self, server_id: &str) -> Result<MessageResponse> {
        let response = self
            .http
            .delete(format!("{}/servers/{}", self.base_url, server_id))
            .send()
            .await
            .with_context(|| format!("failed to connect to daemon at {}", self.base_url))?;
        parse(response).await
    }

    pub async fn stop_all_servers(&self) -> Result<MessageResponse> {
        let response = self
            .http
            .delete(format!("{}/servers", self.base_url))
            .send()
            .await
            .with_context(|| format!("failed to connect to daemon at {}", self.base_url))?;
        parse(response).await
    }
}

/// Deserialize a success body, or surface the daemon's error message.
async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    if response.status().is_success() {
        return response
            .json()
            .await
            .context("failed to parse daemon response");
    }

    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(error) => bail!("{}", error.error),
        Err(_) => bail!("daemon returned {}", status),
    }
}
