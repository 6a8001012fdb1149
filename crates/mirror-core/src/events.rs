//! Collection events produced by applying DDP data messages to the mirror.
//!
//! Each event is emitted after the mirror has been updated, so handlers read
//! the post-mutation state and get whatever prior state they need from the
//! event itself.

use crate::protocol::Fields;
use serde::Serialize;

/// A mutation of one document in one remote collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CollectionEvent {
    /// Document inserted (or replaced) in the mirror.
    Added { collection: String, id: String },
    /// Document fields updated or cleared.
    Changed {
        collection: String,
        id: String,
        /// Values the updated and cleared fields held before this change.
        #[serde(rename = "oldFields")]
        old_fields: Fields,
        /// Field names that were removed from the document.
        cleared: Vec<String>,
        /// Values the updated fields hold now.
        #[serde(rename = "newFields")]
        new_fields: Fields,
    },
    /// Document removed; `prior` is its last known state.
    Removed {
        collection: String,
        id: String,
        prior: Fields,
    },
}

impl CollectionEvent {
    /// Name of the collection the event belongs to.
    pub fn collection(&self) -> &str {
        match self {
            Self::Added { collection, .. }
            | Self::Changed { collection, .. }
            | Self::Removed { collection, .. } => collection,
        }
    }

    /// Id of the mutated document.
    pub fn id(&self) -> &str {
        match self {
            Self::Added { id, .. } | Self::Changed { id, .. } | Self::Removed { id, .. } => id,
        }
    }
}
