//! mirror-daemon library: Exposes internal modules for testing.
//!
//! This is a thin library layer over the daemon components,
//! allowing integration tests to access internal types.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod daemon;
pub mod message;
pub mod native_fs;
pub mod session;

// Re-export key types for convenience
pub use bridge::{BridgeEvent, BridgeServer};
pub use config::{Config, IndexKind};
pub use connection::DdpConnection;
pub use daemon::Daemon;
pub use message::{BridgeRequest, BridgeResponse, MAX_MESSAGE_SIZE};
pub use native_fs::NativeFs;
pub use session::{AuthError, Endpoint, Session};
