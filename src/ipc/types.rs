use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::Session;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// The logged-in user; cleared on logout and whenever the workspace changes.
    pub session: Option<Session>,
}
