//! Child-process stdio transport.
//!
//! Spawns an MCP server through the npm package runner and hands its stdio
//! pipes to the protocol client. The transport is protocol-agnostic: it only
//! guarantees ordered byte delivery and process termination on close. The
//! child's stdout/stdin are reserved exclusively for protocol frames; stderr
//! is inherited so server logs land in the daemon's log, never in the pipe.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::SupervisorError;

/// Package-runner binary. Windows ships npx as a `.cmd` shim, which must be
/// named explicitly when spawning without a shell.
pub fn runner_command() -> &'static str {
    if cfg!(windows) {
        "npx.cmd"
    } else {
        "npx"
    }
}

/// Handle on a spawned child process. Closing kills and reaps the child;
/// `kill_on_drop` covers every other exit path.
pub struct StdioTransport {
    child: Child,
    closed: bool,
}

impl StdioTransport {
    /// Spawn `command args...` with piped stdio, returning the transport plus
    /// the pipe halves for the protocol client.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<(Self, ChildStdout, ChildStdin), SupervisorError> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        for (key, value) in env {
            let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
            cmd.env(key, expanded.as_ref());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| SupervisorError::Spawn(format!("{}: {}", command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SupervisorError::Spawn("child stdout not captured".to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SupervisorError::Spawn("child stdin not captured".to_string()))?;

        Ok((
            Self {
                child,
                closed: false,
            },
            stdout,
            stdin,
        ))
    }

    /// Terminate the child and reap it. A second close is a no-op.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.child.start_kill() {
            tracing::debug!("kill failed (child likely already exited): {}", e);
        }
        match self.child.wait().await {
            Ok(status) => tracing::debug!("child exited: {}", status),
            Err(e) => tracing::warn!("failed to reap child: {}", e),
        }
    }

    /// OS process id, if the child is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}
