//! MCP protocol client.
//!
//! One `McpSession` per child process. Requests are correlated by id through a
//! pending map of oneshot channels, so any number of calls may be in flight on
//! the same session and each caller receives exactly its own response, whatever
//! order the server answers in. Closing the session fails every in-flight
//! request with `SessionClosed` instead of leaving callers hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::protocol::{
    CallToolParams, ClientInfo, Frame, InitializeParams, InitializeResult, Notification, Request,
    RpcError, ToolDescriptor, ToolsListResult, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::error::SupervisorError;

/// Why a pending request did not get a normal result.
#[derive(Debug)]
enum RpcFailure {
    /// The server answered with a JSON-RPC error object.
    Rpc(RpcError),
    /// The session was closed locally while the request was in flight.
    Closed,
    /// The byte stream went away (child exited, pipe broke, write failed).
    Transport(String),
}

impl RpcFailure {
    fn into_protocol(self) -> SupervisorError {
        match self {
            RpcFailure::Rpc(e) => {
                SupervisorError::Protocol(format!("rpc error {}: {}", e.code, e.message))
            }
            RpcFailure::Closed => SupervisorError::SessionClosed,
            RpcFailure::Transport(m) => SupervisorError::Protocol(m),
        }
    }

    fn message(&self) -> String {
        match self {
            RpcFailure::Rpc(e) => format!("rpc error {}: {}", e.code, e.message),
            RpcFailure::Closed => "session closed".to_string(),
            RpcFailure::Transport(m) => m.clone(),
        }
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, RpcFailure>>>;

struct SessionInner {
    next_id: AtomicU64,
    closed: AtomicBool,
    pending: Mutex<PendingMap>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Send + Unpin>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

/// Protocol session bound 1:1 to one child's stdio pipes. Cheap to clone;
/// clones share the correlation state.
#[derive(Clone)]
pub struct McpSession {
    inner: Arc<SessionInner>,
}

impl McpSession {
    /// Perform the MCP handshake over the given pipe halves. The session is
    /// returned only after the `initialize` response arrives; if the server
    /// does not answer within `timeout` the handshake fails and the pending
    /// state is torn down.
    pub async fn connect<R, W>(
        reader: R,
        writer: W,
        identity: ClientInfo,
        timeout: Duration,
    ) -> Result<Self, SupervisorError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let inner = Arc::new(SessionInner {
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            writer: AsyncMutex::new(Box::new(writer)),
            reader_task: Mutex::new(None),
        });
        let session = Self {
            inner: inner.clone(),
        };

        let handle = tokio::spawn(read_loop(reader, inner.clone()));
        if let Ok(mut slot) = inner.reader_task.lock() {
            *slot = Some(handle);
        }

        let params = serde_json::to_value(InitializeParams::new(identity))
            .map_err(|e| SupervisorError::Handshake(e.to_string()))?;

        let init = match tokio::time::timeout(timeout, session.request(METHOD_INITIALIZE, params))
            .await
        {
            Err(_) => {
                session.close().await;
                return Err(SupervisorError::Handshake(format!(
                    "no initialize response within {:?}",
                    timeout
                )));
            }
            Ok(Err(failure)) => {
                let msg = failure.message();
                session.close().await;
                return Err(SupervisorError::Handshake(msg));
            }
            Ok(Ok(value)) => value,
        };

        match serde_json::from_value::<InitializeResult>(init) {
            Ok(result) => {
                if let Some(server) = result.server_info {
                    tracing::debug!(
                        "connected to {} {}",
                        server.name,
                        server.version.as_deref().unwrap_or("?")
                    );
                }
            }
            Err(e) => {
                session.close().await;
                return Err(SupervisorError::Handshake(format!(
                    "malformed initialize result: {}",
                    e
                )));
            }
        }

        if let Err(e) = session
            .send_frame(&Notification::new(METHOD_INITIALIZED, json!({})))
            .await
        {
            session.close().await;
            return Err(SupervisorError::Handshake(e));
        }

        Ok(session)
    }

    /// Enumerate the server's tools.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SupervisorError> {
        let result = self
            .request(METHOD_TOOLS_LIST, json!({}))
            .await
            .map_err(RpcFailure::into_protocol)?;

        let parsed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| SupervisorError::Protocol(format!("malformed tools/list result: {}", e)))?;
        Ok(parsed.tools)
    }

    /// Invoke a tool by name. The raw result value is passed through verbatim;
    /// a JSON-RPC error from the child becomes `ToolError` with the child's
    /// message.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, SupervisorError> {
        let params = serde_json::to_value(CallToolParams { name, arguments })
            .map_err(|e| SupervisorError::Protocol(e.to_string()))?;

        match self.request(METHOD_TOOLS_CALL, params).await {
            Ok(value) => Ok(value),
            Err(RpcFailure::Rpc(e)) => Err(SupervisorError::Tool(e.message)),
            Err(RpcFailure::Closed) => Err(SupervisorError::SessionClosed),
            Err(RpcFailure::Transport(m)) => Err(SupervisorError::Protocol(m)),
        }
    }

    /// Tear down the session: stop the reader, fail in-flight requests with
    /// `SessionClosed`, shut the write half. Safe to call more than once.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        let handle = match self.inner.reader_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            handle.abort();
        }

        drain_pending(&self.inner, || RpcFailure::Closed);

        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Issue one request and wait for its correlated response.
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcFailure> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self
                .inner
                .pending
                .lock()
                .map_err(|_| RpcFailure::Transport("pending map poisoned".to_string()))?;
            // Checked under the same lock close() drains under, so a request
            // can never slip in after the drain and wait forever.
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(RpcFailure::Closed);
            }
            pending.insert(id, tx);
        }

        if let Err(e) = self.send_frame(&Request::new(id, method, params)).await {
            if let Ok(mut pending) = self.inner.pending.lock() {
                pending.remove(&id);
            }
            return Err(RpcFailure::Transport(e));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcFailure::Closed),
        }
    }

    async fn send_frame<T: Serialize>(&self, frame: &T) -> Result<(), String> {
        let mut buf = serde_json::to_vec(frame).map_err(|e| e.to_string())?;
        buf.push(b'\n');

        let mut writer = self.inner.writer.lock().await;
        writer
            .write_all(&buf)
            .await
            .map_err(|e| format!("write to server failed: {}", e))?;
        writer
            .flush()
            .await
            .map_err(|e| format!("write to server failed: {}", e))
    }
}

/// Reads frames off the child's stdout and dispatches responses to waiting
/// callers by id. Runs until the stream closes, then fails whatever is still
/// pending so no caller hangs on a dead child.
async fn read_loop<R>(reader: R, inner: Arc<SessionInner>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Frame>(line) {
                    Ok(frame) => dispatch(&inner, frame),
                    Err(e) => tracing::warn!("discarding unparseable frame: {}", e),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("server stream read error: {}", e);
                break;
            }
        }
    }

    inner.closed.store(true, Ordering::SeqCst);
    drain_pending(&inner, || {
        RpcFailure::Transport("connection closed by server".to_string())
    });
}

fn dispatch(inner: &SessionInner, frame: Frame) {
    match frame.id {
        Some(id) if frame.result.is_some() || frame.error.is_some() => {
            let waiter = match inner.pending.lock() {
                Ok(mut pending) => pending.remove(&id),
                Err(_) => None,
            };
            match waiter {
                Some(tx) => {
                    let result = match frame.error {
                        Some(e) => Err(RpcFailure::Rpc(e)),
                        None => Ok(frame.result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(result);
                }
                None => tracing::debug!("response for unknown request id {}", id),
            }
        }
        _ => {
            if let Some(method) = frame.method {
                // Server-initiated requests and notifications are out of scope.
                tracing::debug!("ignoring server-initiated message: {}", method);
            }
        }
    }
}

fn drain_pending<F: Fn() -> RpcFailure>(inner: &SessionInner, failure: F) {
    let drained: Vec<_> = match inner.pending.lock() {
        Ok(mut pending) => pending.drain().collect(),
        Err(_) => return,
    };
    for (_, tx) in drained {
        let _ = tx.send(Err(failure()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{split, AsyncWriteExt, DuplexStream};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn identity() -> ClientInfo {
        ClientInfo {
            name: "test-client".to_string(),
            version: "0.0.0".to_string(),
        }
    }

    async fn write_line(writer: &mut (impl AsyncWrite + Unpin), value: Value) {
        let mut buf = serde_json::to_vec(&value).unwrap();
        buf.push(b'\n');
        writer.write_all(&buf).await.unwrap();
        writer.flush().await.unwrap();
    }

    async fn read_frame(
        lines: &mut tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
    ) -> Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Answer the initialize request and swallow the initialized notification.
    async fn handshake(
        lines: &mut tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
        writer: &mut tokio::io::WriteHalf<DuplexStream>,
    ) {
        let init = read_frame(lines).await;
        assert_eq!(init["method"], "initialize");
        write_line(
            writer,
            json!({
                "jsonrpc": "2.0",
                "id": init["id"],
                "result": {
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": "fake-server", "version": "1.0.0"}
                }
            }),
        )
        .await;

        let initialized = read_frame(lines).await;
        assert_eq!(initialized["method"], "notifications/initialized");
    }

    #[tokio::test]
    async fn test_connect_and_list_tools() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = split(client_end);
        let (server_read, mut server_write) = split(server_end);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            handshake(&mut lines, &mut server_write).await;

            let req = read_frame(&mut lines).await;
            assert_eq!(req["method"], "tools/list");
            write_line(
                &mut server_write,
                json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "result": {"tools": [
                        {"name": "read_file", "description": "Read a file",
                         "inputSchema": {"type": "object",
                                         "properties": {"path": {"type": "string"}},
                                         "required": ["path"]}},
                        {"name": "list_directory"}
                    ]}
                }),
            )
            .await;
        });

        let session = McpSession::connect(client_read, client_write, identity(), TIMEOUT)
            .await
            .unwrap();
        let tools = session.list_tools().await.unwrap();

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "read_file");
        let schema = tools[0].input_schema.as_ref().unwrap();
        assert_eq!(schema.required, vec!["path"]);
        assert!(tools[1].input_schema.is_none());

        session.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_calls_matched_when_server_replies_out_of_order() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = split(client_end);
        let (server_read, mut server_write) = split(server_end);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            handshake(&mut lines, &mut server_write).await;

            // Hold the first response until both requests have arrived, then
            // answer in reverse order, echoing each request's tool name.
            let first = read_frame(&mut lines).await;
            let second = read_frame(&mut lines).await;
            for req in [second, first] {
                write_line(
                    &mut server_write,
                    json!({
                        "jsonrpc": "2.0",
                        "id": req["id"],
                        "result": {"echo": req["params"]["name"]}
                    }),
                )
                .await;
            }
        });

        let session = McpSession::connect(client_read, client_write, identity(), TIMEOUT)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            session.call_tool("alpha", json!({})),
            session.call_tool("beta", json!({}))
        );

        assert_eq!(a.unwrap()["echo"], "alpha");
        assert_eq!(b.unwrap()["echo"], "beta");

        session.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_fails_inflight_call() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = split(client_end);
        let (server_read, mut server_write) = split(server_end);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            handshake(&mut lines, &mut server_write).await;
            // Accept the call but never answer it.
            let _ = read_frame(&mut lines).await;
            loop {
                if lines.next_line().await.ok().flatten().is_none() {
                    break;
                }
            }
        });

        let session = McpSession::connect(client_read, client_write, identity(), TIMEOUT)
            .await
            .unwrap();

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.call_tool("slow", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.close().await;

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(SupervisorError::SessionClosed)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = split(client_end);
        let (server_read, _server_write) = split(server_end);

        // Reads requests but never answers; keeps the stream open so the
        // failure is the timeout, not a closed pipe.
        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let result = McpSession::connect(
            client_read,
            client_write,
            identity(),
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(SupervisorError::Handshake(_))));
        server.abort();
    }

    #[tokio::test]
    async fn test_server_disconnect_fails_request_with_protocol_error() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = split(client_end);
        let (server_read, mut server_write) = split(server_end);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            handshake(&mut lines, &mut server_write).await;
            // Read the tools/list request, then hang up.
            let _ = read_frame(&mut lines).await;
            drop(lines);
            drop(server_write);
        });

        let session = McpSession::connect(client_read, client_write, identity(), TIMEOUT)
            .await
            .unwrap();

        let result = session.list_tools().await;
        assert!(matches!(result, Err(SupervisorError::Protocol(_))));

        session.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_tool_error_carries_child_message() {
        let (client_end, server_end) = tokio::io::duplex(4096);
        let (client_read, client_write) = split(client_end);
        let (server_read, mut server_write) = split(server_end);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server_read).lines();
            handshake(&mut lines, &mut server_write).await;

            let req = read_frame(&mut lines).await;
            write_line(
                &mut server_write,
                json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "error": {"code": -32602, "message": "unknown tool: nope"}
                }),
            )
            .await;
        });

        let session = McpSession::connect(client_read, client_write, identity(), TIMEOUT)
            .await
            .unwrap();

        match session.call_tool("nope", json!({})).await {
            Err(SupervisorError::Tool(msg)) => assert_eq!(msg, "unknown tool: nope"),
            other => panic!("expected tool error, got {:?}", other.map(|_| ())),
        }

        session.close().await;
        server.await.unwrap();
    }
}
