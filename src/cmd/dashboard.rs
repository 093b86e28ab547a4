//! Dashboard server command: `framework dashboard`.
//!
//! `FRAMEWORK_PROJECT_ROOT` and `FRAMEWORK_PORT` override the CLI values
//! so the server can be supervised without argument plumbing.

use std::path::Path;

use anyhow::Result;

use framework::dashboard::{start_server, ServerConfig};

pub async fn cmd_dashboard(root: &Path, port: u16) -> Result<()> {
    let root = match std::env::var("FRAMEWORK_PROJECT_ROOT") {
        Ok(env_root) if !env_root.is_empty() => std::path::PathBuf::from(env_root),
        _ => root.to_path_buf(),
    };
    let port = match std::env::var("FRAMEWORK_PORT") {
        Ok(env_port) => env_port.parse().unwrap_or(port),
        Err(_) => port,
    };

    start_server(ServerConfig { port, root }).await
}
