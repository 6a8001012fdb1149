//! mirror-core: Projects a DDP todos feed onto plain-text list files.
//!
//! This crate provides the transport-independent pieces:
//! - DDP wire messages
//! - The local mirror of remote collections and the events it emits
//! - Path resolution and the list file synchronizer
//! - FileSystem trait abstraction

pub mod events;
pub mod fs;
pub mod index;
pub mod mirror;
pub mod model;
pub mod paths;
pub mod protocol;
pub mod synchronizer;

pub use events::CollectionEvent;
pub use fs::{FileSystem, FsError, InMemoryFs};
pub use index::{FullScan, ItemIndex, ListIndex};
pub use mirror::{Collection, LocalMirror};
pub use paths::PathResolver;
pub use protocol::{ClientMessage, DdpError, Fields, ServerMessage};
pub use synchronizer::{Followup, ListSynchronizer, SyncError};
