//! ListSynchronizer: turns collection events into list file writes.
//!
//! Every list is projected to one text file holding its todos' texts, one per
//! line. Files are only ever written, renamed or deleted, never read back.
//! Failures are logged and dropped so the next event still gets processed.

use crate::events::CollectionEvent;
use crate::fs::{FileSystem, FsError};
use crate::index::{FullScan, ItemIndex};
use crate::mirror::{Collection, LocalMirror};
use crate::model::{self, LISTS, TODOS};
use crate::paths::PathResolver;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("List not in mirror: {0}")]
    UnknownList(String),

    #[error("List {0} has no name")]
    UnnamedList(String),

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Work the synchronizer needs done on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Followup {
    /// Subscribe to the todos of a newly seen list.
    SubscribeTodos { list_id: String },
}

/// Render todo texts as file contents: each text followed by a newline.
pub fn render_list(texts: &[&str]) -> String {
    let mut content = String::with_capacity(texts.iter().map(|t| t.len() + 1).sum());
    for text in texts {
        content.push_str(text);
        content.push('\n');
    }
    content
}

/// Reacts to list and todo events by rewriting, renaming or deleting list files.
pub struct ListSynchronizer<F: FileSystem> {
    fs: F,
    resolver: PathResolver,
    index: Box<dyn ItemIndex>,
}

impl<F: FileSystem> ListSynchronizer<F> {
    /// Create a synchronizer that rescans all todos on every rewrite.
    pub fn new(fs: F, resolver: PathResolver) -> Self {
        Self::with_index(fs, resolver, Box::new(FullScan))
    }

    /// Create a synchronizer with a specific todo selection strategy.
    pub fn with_index(fs: F, resolver: PathResolver, index: Box<dyn ItemIndex>) -> Self {
        Self {
            fs,
            resolver,
            index,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Handle one event that has already been applied to `mirror`.
    pub async fn handle(&mut self, mirror: &LocalMirror, event: &CollectionEvent) -> Vec<Followup> {
        let empty = Collection::new();
        let todos = mirror.collection(TODOS).unwrap_or(&empty);
        self.index.observe(todos, event);

        match event.collection() {
            LISTS => self.on_list_event(mirror, event).await,
            TODOS => {
                self.on_todo_event(mirror, event).await;
                Vec::new()
            }
            other => {
                debug!("Ignoring event for collection {}", other);
                Vec::new()
            }
        }
    }

    async fn on_list_event(&self, mirror: &LocalMirror, event: &CollectionEvent) -> Vec<Followup> {
        match event {
            CollectionEvent::Added { id, .. } => {
                self.rewrite(mirror, id).await;
                vec![Followup::SubscribeTodos {
                    list_id: id.clone(),
                }]
            }
            CollectionEvent::Changed {
                id,
                old_fields,
                new_fields,
                ..
            } => {
                let Some(new_name) = model::list_name(new_fields) else {
                    return Vec::new();
                };
                match model::list_name(old_fields) {
                    Some(old_name) if old_name == new_name => {}
                    Some(old_name) => self.rename(old_name, new_name).await,
                    None => {
                        warn!("List {} had no previous name, writing {} fresh", id, new_name);
                        self.rewrite(mirror, id).await;
                    }
                }
                Vec::new()
            }
            CollectionEvent::Removed { id, prior, .. } => {
                match model::list_name(prior) {
                    Some(name) => self.remove(name).await,
                    None => warn!("Removed list {} had no name, nothing to delete", id),
                }
                Vec::new()
            }
        }
    }

    async fn on_todo_event(&self, mirror: &LocalMirror, event: &CollectionEvent) {
        match event {
            CollectionEvent::Added { id, .. } => match current_list(mirror, id) {
                Some(list_id) => self.rewrite(mirror, list_id).await,
                None => warn!("Todo {} has no listId, no file to update", id),
            },
            CollectionEvent::Changed { id, old_fields, .. } => {
                let list_id = current_list(mirror, id);
                match list_id {
                    Some(list_id) => self.rewrite(mirror, list_id).await,
                    None => warn!("Todo {} has no listId, no file to update", id),
                }
                // Moved between lists: the previous list loses a line
                if let Some(previous) = model::todo_list_id(old_fields) {
                    if Some(previous) != list_id {
                        self.rewrite(mirror, previous).await;
                    }
                }
            }
            CollectionEvent::Removed { id, prior, .. } => match model::todo_list_id(prior) {
                Some(list_id) => self.rewrite(mirror, list_id).await,
                None => warn!("Removed todo {} had no listId, no file to update", id),
            },
        }
    }

    /// Regenerate the file for `list_id` from the mirror.
    ///
    /// Returns the path written.
    pub async fn write_list(&self, mirror: &LocalMirror, list_id: &str) -> Result<PathBuf> {
        let list = mirror
            .get(LISTS, list_id)
            .ok_or_else(|| SyncError::UnknownList(list_id.to_string()))?;
        let name = model::list_name(list).ok_or_else(|| SyncError::UnnamedList(list_id.to_string()))?;

        let empty = Collection::new();
        let todos = mirror.collection(TODOS).unwrap_or(&empty);
        let texts = self.index.texts(todos, list_id);
        let content = render_list(&texts);

        let path = self.resolver.resolve(name);
        self.fs.write(&path, content.as_bytes()).await?;
        debug!("Wrote {} todo(s) to {}", texts.len(), path.display());
        Ok(path)
    }

    async fn rewrite(&self, mirror: &LocalMirror, list_id: &str) {
        if let Err(e) = self.write_list(mirror, list_id).await {
            error!("Failed to write list {}: {}", list_id, e);
        }
    }

    async fn rename(&self, old_name: &str, new_name: &str) {
        let from = self.resolver.resolve(old_name);
        let to = self.resolver.resolve(new_name);
        match self.fs.rename(&from, &to).await {
            Ok(()) => info!("Renamed {} -> {}", from.display(), to.display()),
            Err(e) => error!(
                "Failed to rename {} -> {}: {}",
                from.display(),
                to.display(),
                e
            ),
        }
    }

    async fn remove(&self, name: &str) {
        let path = self.resolver.resolve(name);
        match self.fs.remove(&path).await {
            Ok(()) => info!("Removed {}", path.display()),
            Err(e) => error!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

fn current_list<'a>(mirror: &'a LocalMirror, todo_id: &str) -> Option<&'a str> {
    mirror.get(TODOS, todo_id).and_then(model::todo_list_id)
}
