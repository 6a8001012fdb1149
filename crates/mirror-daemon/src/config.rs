//! Daemon configuration.

use clap::ValueEnum;
use mirror_core::{FullScan, ItemIndex, ListIndex};
use std::path::PathBuf;

/// Default DDP endpoint of the todos app.
pub const DEFAULT_DDP_URL: &str = "ws://localhost:3000/websocket";
/// Default address the bridge listens on for the desktop shell.
pub const DEFAULT_LISTEN: &str = "127.0.0.1:3030";
/// Folder created on the desktop for list files.
const ROOT_DIR_NAME: &str = "Todos";

/// How list files find their todos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum IndexKind {
    /// Scan every todo on each rewrite
    #[default]
    FullScan,
    /// Keep todos grouped by list
    ByList,
}

impl IndexKind {
    pub fn build(self) -> Box<dyn ItemIndex> {
        match self {
            Self::FullScan => Box::new(FullScan),
            Self::ByList => Box::new(ListIndex::new()),
        }
    }
}

/// Resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one `<list name>.txt` per list
    pub root: PathBuf,
    /// DDP WebSocket endpoint
    pub ddp_url: String,
    /// DDP protocol version requested in `connect`
    pub ddp_version: String,
    /// Bridge listen address
    pub listen: String,
    /// Todo selection strategy
    pub index: IndexKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: default_root(),
            ddp_url: DEFAULT_DDP_URL.to_string(),
            ddp_version: mirror_core::protocol::DDP_VERSION.to_string(),
            listen: DEFAULT_LISTEN.to_string(),
            index: IndexKind::default(),
        }
    }
}

impl Config {
    /// Check values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.ddp_url.starts_with("ws://") || self.ddp_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidDdpUrl(self.ddp_url.clone()));
        }
        if self.ddp_version.is_empty() {
            return Err(ConfigError::EmptyDdpVersion);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DDP URL must start with ws:// or wss://, got {0}")]
    InvalidDdpUrl(String),
    #[error("DDP version must not be empty")]
    EmptyDdpVersion,
}

/// `<desktop>/Todos`, falling back to the home directory, then the working directory.
pub fn default_root() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(ROOT_DIR_NAME)
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}
