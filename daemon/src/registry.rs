//! Server registry and supervisor.
//!
//! The supervisor owns the mapping from caller-chosen ids to running child
//! servers. Registry membership is the sole authority for "is this server
//! alive": an id is reserved under the lock before any spawn side effect, so a
//! duplicate start can never leak an orphan child, and a failed spawn or
//! handshake never leaves an entry behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::DEFAULT_STARTUP_TIMEOUT;
use crate::error::SupervisorError;
use crate::mcp::{runner_command, ClientInfo, McpSession, StdioTransport, ToolDescriptor};

/// Everything needed to launch one server.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Provider package name, e.g. `@modelcontextprotocol/server-filesystem`.
    pub package: String,
    /// Exact version or `latest`; `None` lets the runner pick.
    pub version: Option<String>,
    /// Arguments passed to the server binary after the package spec.
    pub args: Vec<String>,
    /// Extra environment overrides for the child.
    pub env: HashMap<String, String>,
    /// Identity announced during the handshake.
    pub client_name: Option<String>,
    pub client_version: Option<String>,
}

impl LaunchRequest {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: None,
            args: Vec::new(),
            env: HashMap::new(),
            client_name: None,
            client_version: None,
        }
    }

    /// Version-qualified package spec for the runner.
    pub fn package_spec(&self) -> String {
        match &self.version {
            Some(version) => format!("{}@{}", self.package, version),
            None => self.package.clone(),
        }
    }

    pub fn client_info(&self) -> ClientInfo {
        let default = ClientInfo::default();
        ClientInfo {
            name: self.client_name.clone().unwrap_or(default.name),
            version: self.client_version.clone().unwrap_or(default.version),
        }
    }
}

/// A live child connection: the session plus the process handle to kill on
/// close. Launchers that do not own a process (tests) leave the transport out.
pub struct Connection {
    pub session: McpSession,
    pub transport: Option<StdioTransport>,
}

impl Connection {
    async fn close(mut self) {
        self.session.close().await;
        if let Some(transport) = self.transport.as_mut() {
            transport.close().await;
        }
    }
}

/// Seam between the supervisor and process creation. Production launches
/// through the npm package runner; tests substitute a scripted fake.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, request: &LaunchRequest) -> Result<Connection, SupervisorError>;
}

/// Launches servers via `npx -y <pkg>[@version] <args...>`.
pub struct NpxLauncher {
    pub startup_timeout: Duration,
}

impl Default for NpxLauncher {
    fn default() -> Self {
        Self {
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

#[async_trait]
impl Launcher for NpxLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Connection, SupervisorError> {
        let mut args = vec!["-y".to_string(), request.package_spec()];
        args.extend(request.args.iter().cloned());

        let (mut transport, stdout, stdin) =
            StdioTransport::spawn(runner_command(), &args, &request.env)?;

        match McpSession::connect(stdout, stdin, request.client_info(), self.startup_timeout).await
        {
            Ok(session) => Ok(Connection {
                session,
                transport: Some(transport),
            }),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }
}

/// One running, handshaken server.
struct ManagedServer {
    package: String,
    connection: Connection,
    last_used: DateTime<Utc>,
}

/// Registry slot. `Starting` reserves the id while spawn + handshake run
/// outside the lock; the generation token identifies whose reservation it is,
/// so a start whose reservation was stopped and re-issued in the meantime
/// cannot remove or replace the newer occupant.
enum Slot {
    Starting(u64),
    Ready(ManagedServer),
}

/// Snapshot row returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub id: String,
    pub package_name: String,
    pub last_used: DateTime<Utc>,
}

/// Supervisor of all managed servers. Shared across control-surface handlers;
/// the inner lock is held only for map operations, never across spawn,
/// handshake or tool calls, so operations on unrelated ids never block each
/// other.
pub struct Supervisor {
    launcher: Arc<dyn Launcher>,
    servers: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn Launcher>) -> Self {
        Self {
            launcher,
            servers: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Spawn and register a new server under `id`.
    ///
    /// Fails with `AlreadyExists` if the id is present (ready or still
    /// starting); the membership check happens before the spawn, so a
    /// duplicate id never creates a child process.
    pub async fn start(&self, id: &str, request: LaunchRequest) -> Result<(), SupervisorError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut servers = self.servers.lock().await;
            if servers.contains_key(id) {
                return Err(SupervisorError::AlreadyExists(id.to_string()));
            }
            servers.insert(id.to_string(), Slot::Starting(generation));
        }

        tracing::info!("starting server '{}' ({})", id, request.package_spec());

        let connection = match self.launcher.launch(&request).await {
            Ok(connection) => connection,
            Err(e) => {
                // Remove only our own reservation: the id may have been
                // stopped and re-started by someone else while we were
                // launching, and that occupant is not ours to delete.
                let mut servers = self.servers.lock().await;
                if matches!(servers.get(id), Some(Slot::Starting(g)) if *g == generation) {
                    servers.remove(id);
                }
                tracing::warn!("server '{}' failed to start: {}", id, e);
                return Err(e);
            }
        };

        let mut servers = self.servers.lock().await;
        match servers.get(id) {
            Some(Slot::Starting(g)) if *g == generation => {
                servers.insert(
                    id.to_string(),
                    Slot::Ready(ManagedServer {
                        package: request.package,
                        connection,
                        last_used: Utc::now(),
                    }),
                );
                tracing::info!("server '{}' ready", id);
                Ok(())
            }
            // Stopped (or stopped and replaced) while we were connecting: the
            // reservation is gone, so this connection must not be registered.
            _ => {
                drop(servers);
                connection.close().await;
                Err(SupervisorError::NotFound(id.to_string()))
            }
        }
    }

    /// Registered ids, for the health endpoint.
    pub async fn ids(&self) -> Vec<String> {
        self.servers.lock().await.keys().cloned().collect()
    }

    /// Snapshot of ready servers. No side effects.
    pub async fn list(&self) -> Vec<ServerInfo> {
        self.servers
            .lock()
            .await
            .iter()
            .filter_map(|(id, slot)| match slot {
                Slot::Ready(server) => Some(ServerInfo {
                    id: id.clone(),
                    package_name: server.package.clone(),
                    last_used: server.last_used,
                }),
                Slot::Starting(_) => None,
            })
            .collect()
    }

    /// Enumerate tools of one server. Bumps its `last_used` on success.
    pub async fn list_tools(&self, id: &str) -> Result<Vec<ToolDescriptor>, SupervisorError> {
        let session = self.session_for(id).await?;
        let tools = session.list_tools().await?;
        self.touch(id).await;
        Ok(tools)
    }

    /// Invoke a tool on one server. The tool name is forwarded unvalidated;
    /// an unknown name is the child's error to report. Bumps `last_used` on
    /// success.
    pub async fn call_tool(
        &self,
        id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, SupervisorError> {
        let session = self.session_for(id).await?;
        let result = session.call_tool(tool, arguments).await?;
        self.touch(id).await;
        Ok(result)
    }

    /// Stop one server and remove it from the registry. A second stop of the
    /// same id reports `NotFound`. Close failures are logged, not surfaced:
    /// removal from the registry is what makes the server gone.
    pub async fn stop(&self, id: &str) -> Result<(), SupervisorError> {
        let slot = self
            .servers
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| SupervisorError::NotFound(id.to_string()))?;

        match slot {
            Slot::Ready(server) => {
                tracing::info!("stopping server '{}'", id);
                server.connection.close().await;
            }
            // Still starting: the reservation is gone and the in-flight start
            // will close its own connection when it finds the slot missing.
            Slot::Starting(_) => tracing::info!("cancelled start of server '{}'", id),
        }
        Ok(())
    }

    /// Stop every server and clear the registry. Always succeeds; a
    /// misbehaving child cannot block teardown of the others.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, Slot)> = self.servers.lock().await.drain().collect();
        for (id, slot) in drained {
            if let Slot::Ready(server) = slot {
                tracing::info!("stopping server '{}'", id);
                server.connection.close().await;
            }
        }
    }

    async fn session_for(&self, id: &str) -> Result<McpSession, SupervisorError> {
        let servers = self.servers.lock().await;
        match servers.get(id) {
            Some(Slot::Ready(server)) => Ok(server.connection.session.clone()),
            // A starting id has not completed registration yet; callers see
            // the same answer as for an unknown id and may retry.
            Some(Slot::Starting(_)) | None => Err(SupervisorError::NotFound(id.to_string())),
        }
    }

    async fn touch(&self, id: &str) {
        if let Some(Slot::Ready(server)) = self.servers.lock().await.get_mut(id) {
            server.last_used = Utc::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::sync::oneshot;

    /// In-memory scripted server connection: answers the handshake,
    /// advertises one `echo` tool, and echoes call arguments.
    async fn scripted_connection(request: &LaunchRequest) -> Result<Connection, SupervisorError> {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (server_read, mut server_write) = split(server_end);

        tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let frame: serde_json::Value = match serde_json::from_str(&line) {
                    Ok(frame) => frame,
                    Err(_) => continue,
                };
                let id = frame["id"].clone();
                let response = match frame["method"].as_str() {
                    Some("initialize") => json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"protocolVersion": "2024-11-05",
                                   "serverInfo": {"name": "fake", "version": "0"}}
                    }),
                    Some("tools/list") => json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"tools": [{"name": "echo"}]}
                    }),
                    Some("tools/call") => json!({
                        "jsonrpc": "2.0", "id": id,
                        "result": {"echoed": frame["params"]["arguments"]}
                    }),
                    _ => continue,
                };
                let mut buf = serde_json::to_vec(&response).unwrap();
                buf.push(b'\n');
                if server_write.write_all(&buf).await.is_err() {
                    break;
                }
            }
        });

        let (client_read, client_write) = split(client_end);
        let session = McpSession::connect(
            client_read,
            client_write,
            request.client_info(),
            Duration::from_secs(5),
        )
        .await?;

        Ok(Connection {
            session,
            transport: None,
        })
    }

    /// Launcher backed by `scripted_connection`.
    struct FakeLauncher {
        launches: AtomicUsize,
    }

    impl FakeLauncher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                launches: AtomicUsize::new(0),
            })
        }

        fn launch_count(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Launcher for FakeLauncher {
        async fn launch(&self, request: &LaunchRequest) -> Result<Connection, SupervisorError> {
            self.launches.fetch_add(1, Ordering::SeqCst);

            if request.package == "@test/broken" {
                return Err(SupervisorError::Spawn("no such package".to_string()));
            }

            scripted_connection(request).await
        }
    }

    /// Launcher whose first launch blocks until the test releases it, so the
    /// test can stop and re-start the id mid-launch. Later launches connect
    /// immediately.
    struct GatedLauncher {
        entered: std::sync::Mutex<Option<oneshot::Sender<()>>>,
        release: std::sync::Mutex<Option<oneshot::Receiver<bool>>>,
    }

    impl GatedLauncher {
        fn new() -> (Arc<Self>, oneshot::Receiver<()>, oneshot::Sender<bool>) {
            let (entered_tx, entered_rx) = oneshot::channel();
            let (release_tx, release_rx) = oneshot::channel();
            let launcher = Arc::new(Self {
                entered: std::sync::Mutex::new(Some(entered_tx)),
                release: std::sync::Mutex::new(Some(release_rx)),
            });
            (launcher, entered_rx, release_tx)
        }
    }

    #[async_trait]
    impl Launcher for GatedLauncher {
        async fn launch(&self, request: &LaunchRequest) -> Result<Connection, SupervisorError> {
            let gate = self.release.lock().unwrap().take();
            if let Some(gate) = gate {
                if let Some(entered) = self.entered.lock().unwrap().take() {
                    let _ = entered.send(());
                }
                match gate.await {
                    Ok(true) => {}
                    _ => return Err(SupervisorError::Spawn("gated launch failed".to_string())),
                }
            }
            scripted_connection(request).await
        }
    }

    fn supervisor() -> (Supervisor, Arc<FakeLauncher>) {
        let launcher = FakeLauncher::new();
        (Supervisor::new(launcher.clone()), launcher)
    }

    #[tokio::test]
    async fn test_duplicate_start_returns_already_exists() {
        let (supervisor, _) = supervisor();
        supervisor
            .start("fs", LaunchRequest::new("@test/files"))
            .await
            .unwrap();

        let err = supervisor
            .start("fs", LaunchRequest::new("@test/other"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyExists(_)));

        // First instance untouched.
        let servers = supervisor.list().await;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].package_name, "@test/files");
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found_and_spawns_nothing() {
        let (supervisor, launcher) = supervisor();

        assert!(matches!(
            supervisor.stop("ghost").await,
            Err(SupervisorError::NotFound(_))
        ));
        assert!(matches!(
            supervisor.list_tools("ghost").await,
            Err(SupervisorError::NotFound(_))
        ));
        assert!(matches!(
            supervisor.call_tool("ghost", "echo", json!({})).await,
            Err(SupervisorError::NotFound(_))
        ));
        assert_eq!(launcher.launch_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_launch_leaves_no_entry() {
        let (supervisor, _) = supervisor();
        let err = supervisor
            .start("bad", LaunchRequest::new("@test/broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn(_)));

        // The id is free again for a retry.
        assert!(supervisor.ids().await.is_empty());
        supervisor
            .start("bad", LaunchRequest::new("@test/files"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_then_start_same_id() {
        let (supervisor, launcher) = supervisor();
        supervisor
            .start("fs", LaunchRequest::new("@test/files"))
            .await
            .unwrap();
        supervisor.stop("fs").await.unwrap();

        assert!(matches!(
            supervisor.stop("fs").await,
            Err(SupervisorError::NotFound(_))
        ));

        supervisor
            .start("fs", LaunchRequest::new("@test/files"))
            .await
            .unwrap();
        assert_eq!(launcher.launch_count(), 2);
        assert_eq!(supervisor.ids().await, vec!["fs".to_string()]);
    }

    #[tokio::test]
    async fn test_tools_and_calls_route_to_instance() {
        let (supervisor, _) = supervisor();
        supervisor
            .start("fs", LaunchRequest::new("@test/files"))
            .await
            .unwrap();

        let tools = supervisor.list_tools("fs").await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let result = supervisor
            .call_tool("fs", "echo", json!({"path": "/tmp"}))
            .await
            .unwrap();
        assert_eq!(result["echoed"], json!({"path": "/tmp"}));
    }

    #[tokio::test]
    async fn test_call_bumps_last_used() {
        let (supervisor, _) = supervisor();
        supervisor
            .start("fs", LaunchRequest::new("@test/files"))
            .await
            .unwrap();

        let before = supervisor.list().await[0].last_used;
        tokio::time::sleep(Duration::from_millis(10)).await;
        supervisor.list_tools("fs").await.unwrap();
        let after = supervisor.list().await[0].last_used;
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_stop_all_clears_registry() {
        let (supervisor, _) = supervisor();
        supervisor
            .start("a", LaunchRequest::new("@test/one"))
            .await
            .unwrap();
        supervisor
            .start("b", LaunchRequest::new("@test/two"))
            .await
            .unwrap();

        supervisor.stop_all().await;
        assert!(supervisor.ids().await.is_empty());
        assert!(supervisor.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_cancels_inflight_start() {
        let (launcher, entered, release) = GatedLauncher::new();
        let supervisor = Arc::new(Supervisor::new(launcher));

        let first = {
            let supervisor = supervisor.clone();
            tokio::spawn(
                async move { supervisor.start("fs", LaunchRequest::new("@test/slow")).await },
            )
        };
        entered.await.unwrap();

        // The reservation is visible and stoppable while the launch runs,
        // but it is not listed and not callable until the handshake is done.
        assert_eq!(supervisor.ids().await, vec!["fs".to_string()]);
        assert!(supervisor.list().await.is_empty());
        assert!(matches!(
            supervisor.list_tools("fs").await,
            Err(SupervisorError::NotFound(_))
        ));
        supervisor.stop("fs").await.unwrap();

        // The launch completes, but its reservation is gone: the start
        // reports NotFound and registers nothing.
        release.send(true).unwrap();
        let result = first.await.unwrap();
        assert!(matches!(result, Err(SupervisorError::NotFound(_))));
        assert!(supervisor.ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_slow_start_leaves_replacement_untouched() {
        let (launcher, entered, release) = GatedLauncher::new();
        let supervisor = Arc::new(Supervisor::new(launcher));

        let first = {
            let supervisor = supervisor.clone();
            tokio::spawn(
                async move { supervisor.start("fs", LaunchRequest::new("@test/slow")).await },
            )
        };
        entered.await.unwrap();

        // Replace the in-flight instance while its launch is still running.
        supervisor.stop("fs").await.unwrap();
        supervisor
            .start("fs", LaunchRequest::new("@test/files"))
            .await
            .unwrap();

        // The earlier launch now fails; its cleanup must not remove the
        // replacement it does not own.
        release.send(false).unwrap();
        let result = first.await.unwrap();
        assert!(matches!(result, Err(SupervisorError::Spawn(_))));

        let servers = supervisor.list().await;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].package_name, "@test/files");
    }

    #[tokio::test]
    async fn test_successful_slow_start_does_not_replace_newer_instance() {
        let (launcher, entered, release) = GatedLauncher::new();
        let supervisor = Arc::new(Supervisor::new(launcher));

        let first = {
            let supervisor = supervisor.clone();
            tokio::spawn(
                async move { supervisor.start("fs", LaunchRequest::new("@test/slow")).await },
            )
        };
        entered.await.unwrap();

        supervisor.stop("fs").await.unwrap();
        supervisor
            .start("fs", LaunchRequest::new("@test/files"))
            .await
            .unwrap();

        // The earlier launch completes successfully, but the id now belongs
        // to the replacement: the late start reports NotFound and the
        // replacement keeps serving calls.
        release.send(true).unwrap();
        let result = first.await.unwrap();
        assert!(matches!(result, Err(SupervisorError::NotFound(_))));

        let servers = supervisor.list().await;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].package_name, "@test/files");
        supervisor
            .call_tool("fs", "echo", json!({"ok": true}))
            .await
            .unwrap();
    }

    #[test]
    fn test_package_spec_with_version() {
        let mut request = LaunchRequest::new("@scope/pkg");
        assert_eq!(request.package_spec(), "@scope/pkg");
        request.version = Some("1.2.3".to_string());
        assert_eq!(request.package_spec(), "@scope/pkg@1.2.3");
    }
}
