//! Direct server-management command handlers.

use anyhow::Result;

use crate::client::DaemonClient;
use crate::handlers::run;
use serde_json::json;

/// Handle `mcpd servers`.
pub async fn list(daemon_url: &str) -> Result<()> {
    let client = DaemonClient::new(daemon_url)?;
    let servers = client.list_servers().await?;

    if servers.is_empty() {
        println!("No servers running");
        return Ok(());
    }
    for server in servers {
        println!(
            "{}  {}  (last used {})",
            server.id, server.package_name, server.last_used
        );
    }
    Ok(())
}

/// Handle `mcpd tools <id>`.
pub async fn tools(daemon_url: &str, id: &str) -> Result<()> {
    let client = DaemonClient::new(daemon_url)?;
    run::list_tools(&client, id, true).await
}

/// Handle `mcpd call <id> <tool> [tokens...]`: resolve raw tokens against the
/// tool's schema, then invoke it.
pub async fn call(daemon_url: &str, id: &str, tool_name: &str, tokens: &[String]) -> Result<()> {
    let client = DaemonClient::new(daemon_url)?;
    run::call_tool_by_name(&client, id, tool_name, tokens, false).await
}

/// Handle `mcpd stop <id>`.
pub async fn stop(daemon_url: &str, id: &str) -> Result<()> {
    let client = DaemonClient::new(daemon_url)?;
    let response = client.stop_server(id).await?;
    println!("{}", response.message);
    Ok(())
}

/// Handle `mcpd stop-all`.
pub async fn stop_all(daemon_url: &str) -> Result<()> {
    let client = DaemonClient::new(daemon_url)?;
    let response = client.stop_all_servers().await?;
    println!("{}", response.message);
    Ok(())
}

/// Handle `mcpd health`.
pub async fn health(daemon_url: &str) -> Result<()> {
    let client = DaemonClient::new(daemon_url)?;
    let health = client.health().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "status": health.status,
            "servers": health.servers,
        }))?
    );
    Ok(())
}
