use crate::config::Config;
use crate::ipc::error::HandlerErr;
use rusqlite::Connection;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            workspace: None,
            db: None,
            config,
        }
    }

    pub fn conn(&self) -> Result<&Connection, HandlerErr> {
        self.db.as_ref().ok_or_else(HandlerErr::no_workspace)
    }

    pub fn workspace_path(&self) -> Result<&Path, HandlerErr> {
        self.workspace
            .as_deref()
            .ok_or_else(HandlerErr::no_workspace)
    }
}
