//! LocalMirror: the in-memory copy of every subscribed remote collection.
//!
//! Documents keep arrival order. A removed document that is added again goes
//! to the end, which is the order list files are written in.

use crate::events::CollectionEvent;
use crate::protocol::{Fields, ServerMessage};
use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::warn;

/// One remote collection: document id -> fields, in arrival order.
pub type Collection = IndexMap<String, Fields>;

/// Mapping from collection name to its local mirror.
#[derive(Debug, Default)]
pub struct LocalMirror {
    collections: HashMap<String, Collection>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a collection by name, if any document was ever seen for it.
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    /// Get one document's fields.
    pub fn get(&self, collection: &str, id: &str) -> Option<&Fields> {
        self.collections.get(collection)?.get(id)
    }

    /// Number of documents held for `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }

    /// Apply a DDP data message, returning the resulting event.
    ///
    /// Non-data messages and mutations of unknown documents return `None`.
    pub fn apply(&mut self, msg: &ServerMessage) -> Option<CollectionEvent> {
        match msg {
            ServerMessage::Added {
                collection,
                id,
                fields,
            } => {
                self.collections
                    .entry(collection.clone())
                    .or_default()
                    .insert(id.clone(), fields.clone());
                Some(CollectionEvent::Added {
                    collection: collection.clone(),
                    id: id.clone(),
                })
            }
            ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } => {
                let Some(document) = self
                    .collections
                    .get_mut(collection)
                    .and_then(|c| c.get_mut(id))
                else {
                    warn!("Change for unknown document {}/{}, ignoring", collection, id);
                    return None;
                };

                let mut old_fields = Fields::new();
                let mut new_fields = Fields::new();
                for (key, value) in fields {
                    if let Some(old) = document.insert(key.clone(), value.clone()) {
                        old_fields.insert(key.clone(), old);
                    }
                    new_fields.insert(key.clone(), value.clone());
                }
                for key in cleared {
                    if let Some(old) = document.remove(key) {
                        old_fields.insert(key.clone(), old);
                    }
                }

                Some(CollectionEvent::Changed {
                    collection: collection.clone(),
                    id: id.clone(),
                    old_fields,
                    cleared: cleared.clone(),
                    new_fields,
                })
            }
            ServerMessage::Removed { collection, id } => {
                let Some(prior) = self
                    .collections
                    .get_mut(collection)
                    .and_then(|c| c.shift_remove(id))
                else {
                    warn!("Removal of unknown document {}/{}, ignoring", collection, id);
                    return None;
                };

                Some(CollectionEvent::Removed {
                    collection: collection.clone(),
                    id: id.clone(),
                    prior,
                })
            }
            _ => None,
        }
    }
}
