//! `mcpd daemon` command handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::client::DaemonClient;
use crate::config::{daemon_url, default_log_dir, default_log_path, default_pid_path};
use crate::registry::{NpxLauncher, Supervisor};
use crate::web;

/// Handle `mcpd daemon start`.
pub async fn start(port: u16, background: bool, startup_timeout: u64) -> Result<()> {
    let url = daemon_url(port);
    let client = DaemonClient::new(&url)?;

    if client.is_running().await {
        println!("mcpd daemon is already running at {}", url);
        return Ok(());
    }

    let pid_path = default_pid_path();
    let log_dir = default_log_dir();
    if let Some(parent) = pid_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::create_dir_all(&log_dir).await?;

    if background {
        println!("Starting mcpd daemon in background...");

        let log_file = default_log_path();
        let current_exe = std::env::current_exe()?;

        // Re-execute ourselves in the foreground, detached, logs to file.
        let child = std::process::Command::new(&current_exe)
            .arg("daemon")
            .arg("start")
            .arg("--port")
            .arg(port.to_string())
            .arg("--startup-timeout")
            .arg(startup_timeout.to_string())
            .stdin(std::process::Stdio::null())
            .stdout(std::fs::File::create(&log_file)?)
            .stderr(std::fs::File::create(log_dir.join("daemon.err"))?)
            .spawn()
            .context("failed to spawn daemon process")?;

        tokio::fs::write(&pid_path, child.id().to_string()).await?;

        match client
            .wait_until_ready(10, Duration::from_millis(500))
            .await
        {
            Ok(()) => {
                println!("mcpd daemon started.");
                println!("  PID: {}", child.id());
                println!("  URL: {}", url);
                println!("  Log: {}", log_file.display());
            }
            Err(_) => {
                println!("Warning: daemon may not have started. Check logs:");
                println!("  {}", log_file.display());
            }
        }
        return Ok(());
    }

    println!("Starting mcpd daemon on port {} (foreground)...", port);
    println!("  Press Ctrl+C to stop.");

    tokio::fs::write(&pid_path, std::process::id().to_string()).await?;

    let launcher = NpxLauncher {
        startup_timeout: Duration::from_secs(startup_timeout),
    };
    let supervisor = Arc::new(Supervisor::new(Arc::new(launcher)));
    let result = web::serve(port, supervisor).await;

    let _ = tokio::fs::remove_file(&pid_path).await;
    result
}

/// Handle `mcpd daemon stop`: signal the pid from the pid file; the daemon's
/// shutdown handler stops every managed server.
pub async fn stop(url: &str) -> Result<()> {
    let pid_path = default_pid_path();

    if !pid_path.exists() {
        let client = DaemonClient::new(url)?;
        if client.is_running().await {
            println!(
                "Daemon at {} is running but no pid file was found; stop it from its own terminal.",
                url
            );
        } else {
            println!("mcpd daemon is not running.");
        }
        return Ok(());
    }

    let pid_str = tokio::fs::read_to_string(&pid_path).await?;
    let pid: i32 = pid_str
        .trim()
        .parse()
        .with_context(|| format!("malformed pid file {}", pid_path.display()))?;

    #[cfg(unix)]
    {
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc == 0 {
            println!("Sent SIGTERM to daemon (pid {}).", pid);
        } else {
            println!("Daemon process {} was not running.", pid);
        }
    }
    #[cfg(not(unix))]
    {
        println!(
            "Cannot signal pid {} on this platform; stop the daemon from its own terminal.",
            pid
        );
    }

    let _ = tokio::fs::remove_file(&pid_path).await;
    Ok(())
}

/// Handle `mcpd daemon status`.
pub async fn status(url: &str) -> Result<()> {
    let client = DaemonClient::new(url)?;
    match client.health().await {
        Ok(health) => {
            println!("mcpd daemon at {}: {}", url, health.status);
            if health.servers.is_empty() {
                println!("  no servers registered");
            } else {
                for id in health.servers {
                    println!("  - {}", id);
                }
            }
        }
        Err(_) => println!("mcpd daemon is not running at {}", url),
    }
    Ok(())
}

/// Handle `mcpd daemon logs`.
pub async fn logs(lines: usize) -> Result<()> {
    let log_file = default_log_path();
    if !log_file.exists() {
        println!("No daemon log at {}", log_file.display());
        return Ok(());
    }

    let content = tokio::fs::read_to_string(&log_file).await?;
    let all: Vec<&str> = content.lines().collect();
    let start = if lines == 0 || lines >= all.len() {
        0
    } else {
        all.len() - lines
    };
    for line in &all[start..] {
        println!("{}", line);
    }
    Ok(())
}
