//! mcpd: a supervisor daemon for MCP tool servers.
//!
//! The daemon launches MCP servers as child processes through the npm package
//! runner, speaks the MCP stdio protocol to each of them, and republishes
//! their tools over a small HTTP control surface. The same binary is the CLI
//! that talks to that surface.

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod mcp;
pub mod registry;
pub mod resolve;
pub mod web;
