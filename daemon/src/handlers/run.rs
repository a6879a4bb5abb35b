//! `mcpd run` command handler: the one-shot package workflow.
//!
//! Ensures the daemon is reachable, ensures a server for the package is
//! running (reusing an existing one under the same derived id), then either
//! lists the server's tools or resolves arguments against the selected tool's
//! schema and calls it.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};

use crate::api::StartServerRequest;
use crate::cli::RunArgs;
use crate::client::{DaemonClient, StartOutcome};
use crate::mcp::ToolDescriptor;
use crate::resolve::{resolve_tool_args, split_server_args_and_tool};

pub async fn run(daemon_url: &str, args: RunArgs) -> Result<()> {
    let client = DaemonClient::new(daemon_url)?;
    if !client.is_running().await {
        bail!(
            "MCP daemon not running at {}. Start it with 'mcpd daemon start'",
            daemon_url
        );
    }

    let env = parse_env_pairs(&args.env)?;
    let split = split_server_args_and_tool(&args.args, args.tool.as_deref(), &args.tool_args);

    let server_id = args
        .server_id
        .clone()
        .unwrap_or_else(|| derive_server_id(&args.package, &split.server_args));

    let request = StartServerRequest {
        server_id: server_id.clone(),
        pkg: args.package.clone(),
        version: args.version.clone(),
        args: split.server_args.clone(),
        env,
        client_name: args.client_name.clone(),
        client_version: args.client_version.clone(),
    };

    match client.start_server(&request).await? {
        StartOutcome::Started => {
            if args.verbose {
                println!("Started MCP server: {} as {}", args.package, server_id);
            }
        }
        StartOutcome::AlreadyRunning => {
            if args.verbose {
                println!("Using existing MCP server: {}", server_id);
            }
        }
    }

    match &split.tool {
        Some(tool) => call_tool_by_name(&client, &server_id, tool, &split.tool_args, args.verbose).await,
        None => list_tools(&client, &server_id, args.verbose).await,
    }
}

/// Look a tool up by name, resolve its arguments, call it and print the
/// result.
pub async fn call_tool_by_name(
    client: &DaemonClient,
    server_id: &str,
    tool_name: &str,
    tokens: &[String],
    verbose: bool,
) -> Result<()> {
    let tools = client.list_tools(server_id).await?.tools;
    let tool = tools.iter().find(|t| t.name == tool_name).ok_or_else(|| {
        anyhow!(
            "Tool '{}' not found. Available tools: {}",
            tool_name,
            tool_names(&tools)
        )
    })?;

    let arguments = match &tool.input_schema {
        Some(schema) if !schema.properties.is_empty() => {
            Value::Object(resolve_tool_args(schema, tokens)?)
        }
        // Convention for schema-less tools: first token is a path.
        _ if !tokens.is_empty() => json!({"path": tokens[0]}),
        _ => json!({}),
    };

    if verbose {
        println!("Calling tool: {}", tool_name);
        println!("Arguments: {}", serde_json::to_string_pretty(&arguments)?);
    }

    let response = client.call_tool(server_id, tool_name, arguments).await?;

    if verbose {
        println!("\nTool Result:");
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&response.result)?);
    }
    Ok(())
}

/// Print a server's tool list.
pub async fn list_tools(client: &DaemonClient, server_id: &str, verbose: bool) -> Result<()> {
    let tools = client.list_tools(server_id).await?.tools;
    if tools.is_empty() {
        println!("No tools available");
        return Ok(());
    }

    if verbose {
        println!("Available tools:");
        for (i, tool) in tools.iter().enumerate() {
            match &tool.description {
                Some(description) => println!("{}. {} - {}", i + 1, tool.name, description),
                None => println!("{}. {}", i + 1, tool.name),
            }
            if let Some(schema) = &tool.input_schema {
                println!("   Schema: {}", serde_json::to_string_pretty(schema)?);
            }
        }
    } else {
        println!("{}", tool_names(&tools));
    }
    Ok(())
}

fn tool_names(tools: &[ToolDescriptor]) -> String {
    tools
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_env_pairs(pairs: &[String]) -> Result<HashMap<String, String>> {
    let mut env = HashMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                env.insert(key.to_string(), value.to_string());
            }
            _ => bail!("invalid --env '{}', expected KEY=VALUE", pair),
        }
    }
    Ok(env)
}

/// Deterministic id from package name and server args, so repeated
/// invocations of the same command line reuse the running instance.
fn derive_server_id(package: &str, server_args: &[String]) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    package.hash(&mut hasher);
    for arg in server_args {
        arg.hash(&mut hasher);
    }
    let short = package.rsplit('/').next().unwrap_or(package);
    format!("{}-{:08x}", short, hasher.finish() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_server_id_is_stable_and_arg_sensitive() {
        let a = derive_server_id("@scope/server-files", &["/tmp".to_string()]);
        let b = derive_server_id("@scope/server-files", &["/tmp".to_string()]);
        let c = derive_server_id("@scope/server-files", &["/home".to_string()]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("server-files-"));
    }

    #[test]
    fn test_parse_env_pairs() {
        let env = parse_env_pairs(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
        assert_eq!(env["A"], "1");
        assert_eq!(env["B"], "x=y");

        assert!(parse_env_pairs(&["novalue".to_string()]).is_err());
    }
}
