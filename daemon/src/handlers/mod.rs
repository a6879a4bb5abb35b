//! CLI command handlers.

pub mod daemon;
pub mod run;
pub mod servers;
