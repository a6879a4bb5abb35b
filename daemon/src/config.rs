//! Daemon configuration and well-known filesystem paths.

use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port for the daemon's control surface.
pub const DEFAULT_PORT: u16 = 3001;

/// Default bound on spawn + handshake for a new server.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for a daemon instance.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub startup_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

/// Base URL for a daemon listening on the given port.
pub fn daemon_url(port: u16) -> String {
    format!("http://localhost:{}", port)
}

fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("mcpd")
}

/// PID file written by a background daemon.
pub fn default_pid_path() -> PathBuf {
    cache_dir().join("mcpd.pid")
}

/// Directory for background daemon logs.
pub fn default_log_dir() -> PathBuf {
    cache_dir().join("logs")
}

/// Log file written by a background daemon.
pub fn default_log_path() -> PathBuf {
    default_log_dir().join("daemon.log")
}
