//! DDP wire messages.
//!
//! DDP frames are JSON objects tagged by their `msg` field. Only the client
//! subset the mirror needs is modelled: session handshake, heartbeats, method
//! calls, subscriptions and the data messages that drive the local mirror.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Protocol version we ask for in `connect`.
pub const DDP_VERSION: &str = "1";

/// Versions offered to the server, most preferred first.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["1", "pre2", "pre1"];

/// Document fields as they travel on the wire.
pub type Fields = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid DDP frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    Connect {
        version: String,
        support: Vec<String>,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Method {
        method: String,
        params: Vec<Value>,
        id: String,
    },
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },
}

impl ClientMessage {
    /// Session handshake for the given protocol version.
    pub fn connect(version: &str) -> Self {
        let mut support = vec![version.to_string()];
        support.extend(
            SUPPORTED_VERSIONS
                .iter()
                .filter(|v| **v != version)
                .map(|v| v.to_string()),
        );
        Self::Connect {
            version: version.to_string(),
            support,
        }
    }

    /// The `login` method call resuming a session with `token`.
    pub fn login(id: &str, token: &str) -> Self {
        Self::Method {
            method: "login".to_string(),
            params: vec![serde_json::json!({ "resume": token })],
            id: id.to_string(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ClientMessage serialization should not fail")
    }
}

/// Error object carried by `result`, `nosub` and login failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdpError {
    /// Error code; Meteor sends either a number or a string
    pub error: Value,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error_type: Option<String>,
}

impl Display for DdpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let code = match &self.error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match self.reason.as_deref().or(self.message.as_deref()) {
            Some(reason) => write!(f, "{} [{}]", reason, code),
            None => write!(f, "[{}]", code),
        }
    }
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "msg", rename_all = "camelCase")]
pub enum ServerMessage {
    Connected {
        session: String,
    },
    Failed {
        version: String,
    },
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
    Pong {
        #[serde(default)]
        id: Option<String>,
    },
    #[serde(rename = "result")]
    MethodResult {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<DdpError>,
    },
    Updated {
        methods: Vec<String>,
    },
    Ready {
        subs: Vec<String>,
    },
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<DdpError>,
    },
    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Fields,
    },
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Fields,
        #[serde(default)]
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    #[serde(rename = "error")]
    ProtocolError {
        reason: String,
        #[serde(default, rename = "offendingMessage")]
        offending_message: Option<Value>,
    },
    /// Frames we never act on (`addedBefore`, `movedBefore`, ...)
    #[serde(other)]
    Other,
}

impl ServerMessage {
    /// Parse a text frame.
    ///
    /// Frames without a `msg` field (like the initial `{"server_id":"0"}`)
    /// come back as `Ok(None)`.
    pub fn from_json(text: &str) -> Result<Option<Self>, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("msg").is_none() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Whether this frame mutates a collection.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Self::Added { .. } | Self::Changed { .. } | Self::Removed { .. }
        )
    }
}
