//! MCP child-process plumbing.
//!
//! ```text
//! ┌──────────────┐   HTTP    ┌──────────────────┐
//! │  mcpd CLI    │ ←──────→  │  mcpd daemon     │
//! └──────────────┘           └────────┬─────────┘
//!                                     │ stdio JSON-RPC
//!                  ┌──────────────────┼──────────────────┐
//!                  ↓                  ↓                  ↓
//!          ┌───────────────┐ ┌───────────────┐ ┌───────────────┐
//!          │ server-fs     │ │ server-github │ │ server-...    │
//!          │ (npx child)   │ │ (npx child)   │ │ (npx child)   │
//!          └───────────────┘ └───────────────┘ └───────────────┘
//! ```
//!
//! `transport` spawns and kills the children, `protocol` defines the frames,
//! `client` runs the handshake and correlates concurrent requests.

mod client;
pub mod protocol;
mod transport;

pub use client::McpSession;
pub use protocol::{ClientInfo, PropertySchema, ToolDescriptor, ToolSchema};
pub use transport::{runner_command, StdioTransport};
