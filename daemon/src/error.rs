//! Error types for the supervisor and the argument resolver.
//!
//! Every supervisor error carries a stable machine-readable kind (used in HTTP
//! error bodies) plus a human-readable message. Resolver errors are local to a
//! single CLI invocation and never reach the daemon.

use thiserror::Error;

/// Errors surfaced by the supervisor and the protocol client.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A server with this id is already registered (or currently starting).
    #[error("server '{0}' already exists")]
    AlreadyExists(String),

    /// No server with this id is registered.
    #[error("server '{0}' not found")]
    NotFound(String),

    /// The child process could not be started.
    #[error("failed to spawn server process: {0}")]
    Spawn(String),

    /// The child started but the protocol handshake failed or timed out.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A live child returned a malformed or unexpected frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The child reported a failure executing a specific tool.
    #[error("tool error: {0}")]
    Tool(String),

    /// The session was closed while a request was still in flight.
    #[error("session closed")]
    SessionClosed,
}

impl SupervisorError {
    /// Stable machine-readable kind for the HTTP error body.
    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorError::AlreadyExists(_) => "already_exists",
            SupervisorError::NotFound(_) => "not_found",
            SupervisorError::Spawn(_) => "spawn_error",
            SupervisorError::Handshake(_) => "handshake_error",
            SupervisorError::Protocol(_) => "protocol_error",
            SupervisorError::Tool(_) => "tool_error",
            SupervisorError::SessionClosed => "session_closed",
        }
    }
}

/// Errors from the CLI argument resolver.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// A required schema property has no value after resolution.
    #[error("missing required parameter: {0}")]
    MissingRequired(String),

    /// Malformed input that cannot be mapped onto the schema.
    #[error("invalid argument: {0}")]
    Invalid(String),
}
