//! CLI argument definitions.

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_PORT;

#[derive(Parser)]
#[command(name = "mcpd")]
#[command(about = "Supervisor daemon for MCP tool servers launched over npx")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Daemon URL for client commands
    #[arg(
        long,
        env = "MCPD_URL",
        default_value = "http://localhost:3001",
        global = true
    )]
    pub daemon_url: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the daemon process
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
    /// Connect to an MCP server package; list its tools or call one
    Run(RunArgs),
    /// List running servers
    Servers,
    /// List tools on a running server
    Tools {
        /// Server id
        id: String,
    },
    /// Call a tool on a running server
    Call {
        /// Server id
        id: String,
        /// Tool name
        tool: String,
        /// Raw tool arguments (key=value pairs or positionals)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Stop a running server
    Stop {
        /// Server id
        id: String,
    },
    /// Stop all running servers
    StopAll,
    /// Check daemon health
    Health,
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Run the supervisor daemon
    Start {
        /// Port for the control surface
        #[arg(long, short, env = "MCPD_PORT", default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Detach and run in the background
        #[arg(long, short)]
        background: bool,
        /// Bound on spawn + handshake for a new server, in seconds
        #[arg(long, default_value_t = 30)]
        startup_timeout: u64,
    },
    /// Stop a background daemon
    Stop,
    /// Show daemon health and registered servers
    Status,
    /// View background daemon logs
    Logs {
        /// Number of lines to show (0 = all)
        #[arg(long, short, default_value_t = 50)]
        lines: usize,
    },
}

/// Arguments for `mcpd run`, mirroring the one-shot package workflow: ensure
/// daemon, ensure server, then list or call.
#[derive(Args)]
pub struct RunArgs {
    /// MCP server package name (e.g. @modelcontextprotocol/server-filesystem)
    pub package: String,

    /// Tool name to call (inferred from --args tokens if omitted)
    pub tool: Option<String>,

    /// Tool arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub tool_args: Vec<String>,

    /// Exact version or "latest"
    #[arg(long, short = 'v')]
    pub version: Option<String>,

    /// Args passed to the server binary (may trail into tool name + args;
    /// the split is inferred)
    #[arg(long = "args", short = 'a')]
    pub args: Vec<String>,

    /// Extra env vars (KEY=VALUE)
    #[arg(long = "env", short = 'e')]
    pub env: Vec<String>,

    /// Identify your app to the server
    #[arg(long)]
    pub client_name: Option<String>,

    /// Client version announced to the server
    #[arg(long)]
    pub client_version: Option<String>,

    /// Server id to use (derived from package + args if not provided)
    #[arg(long)]
    pub server_id: Option<String>,

    /// Show detailed output including tool schema and arguments
    #[arg(long, short = 'V')]
    pub verbose: bool,
}
