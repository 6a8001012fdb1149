//! Bridge protocol messages.
//!
//! The desktop shell talks to the daemon with JSON text frames tagged by
//! `type`: it announces logins and asks where a list's file lives.

use serde::{Deserialize, Serialize};

/// Maximum bridge frame size (1MB); requests are a name or a token.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Request sent by the desktop shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeRequest {
    /// The user logged in to the web UI; carries the resume token
    #[serde(rename_all = "camelCase")]
    LoggedIn { login_token: String },
    /// Synchronous query for a list's file path
    #[serde(rename_all = "camelCase")]
    GetLocalPath { list_name: String },
}

/// Reply sent back on the same connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeResponse {
    LocalPath { path: String },
    Error { message: String },
}

impl BridgeRequest {
    /// Try to parse a request from frame data.
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

impl BridgeResponse {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("BridgeResponse serialization should not fail")
    }
}
