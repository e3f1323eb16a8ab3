use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One JSON request line from the portal shell.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Daemon-wide state: the selected workspace directory and its open
/// database handle.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
