//! Selection of the todos that belong to a list.
//!
//! `FullScan` walks the whole todos collection on every rewrite. `ListIndex`
//! keeps `listId -> todo ids` up to date from collection events and orders its
//! answer by mirror position, so both produce the same file contents.

use crate::events::CollectionEvent;
use crate::mirror::Collection;
use crate::model::{self, TODOS};
use indexmap::IndexSet;
use std::collections::HashMap;

/// Strategy for finding a list's todos.
pub trait ItemIndex: Send + Sync {
    /// Observe a collection event after it has been applied to the mirror.
    fn observe(&mut self, _todos: &Collection, _event: &CollectionEvent) {}

    /// Texts of the todos in `list_id`, in mirror iteration order.
    fn texts<'a>(&self, todos: &'a Collection, list_id: &str) -> Vec<&'a str>;
}

/// Scan every todo on every rewrite.
#[derive(Debug, Default, Clone, Copy)]
pub struct FullScan;

impl ItemIndex for FullScan {
    fn texts<'a>(&self, todos: &'a Collection, list_id: &str) -> Vec<&'a str> {
        todos
            .values()
            .filter(|todo| model::todo_list_id(todo) == Some(list_id))
            .map(model::todo_text)
            .collect()
    }
}

/// Todo ids grouped by list.
#[derive(Debug, Default)]
pub struct ListIndex {
    by_list: HashMap<String, IndexSet<String>>,
}

impl ListIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, list_id: &str, todo_id: &str) {
        self.by_list
            .entry(list_id.to_string())
            .or_default()
            .insert(todo_id.to_string());
    }

    /// Drop `todo_id` from whichever list currently holds it.
    fn detach(&mut self, todo_id: &str) {
        let holders: Vec<String> = self
            .by_list
            .iter()
            .filter(|(_, ids)| ids.contains(todo_id))
            .map(|(list_id, _)| list_id.clone())
            .collect();
        for list_id in holders {
            self.remove(&list_id, todo_id);
        }
    }

    fn remove(&mut self, list_id: &str, todo_id: &str) {
        if let Some(ids) = self.by_list.get_mut(list_id) {
            ids.shift_remove(todo_id);
            if ids.is_empty() {
                self.by_list.remove(list_id);
            }
        }
    }
}

impl ItemIndex for ListIndex {
    fn observe(&mut self, todos: &Collection, event: &CollectionEvent) {
        if event.collection() != TODOS {
            return;
        }

        match event {
            CollectionEvent::Added { id, .. } => {
                // A re-sent document may have switched lists
                self.detach(id);
                if let Some(list_id) = todos.get(id).and_then(model::todo_list_id) {
                    self.insert(list_id, id);
                }
            }
            CollectionEvent::Changed {
                id,
                cleared,
                new_fields,
                ..
            } => {
                let moved = new_fields.contains_key(model::LIST_ID_FIELD)
                    || cleared.iter().any(|k| k == model::LIST_ID_FIELD);
                if !moved {
                    return;
                }
                self.detach(id);
                if let Some(new_list) = todos.get(id).and_then(model::todo_list_id) {
                    self.insert(new_list, id);
                }
            }
            CollectionEvent::Removed { id, prior, .. } => {
                if let Some(list_id) = model::todo_list_id(prior) {
                    self.remove(list_id, id);
                }
            }
        }
    }

    fn texts<'a>(&self, todos: &'a Collection, list_id: &str) -> Vec<&'a str> {
        let Some(ids) = self.by_list.get(list_id) else {
            return Vec::new();
        };

        let mut entries: Vec<(usize, &'a str)> = ids
            .iter()
            .filter_map(|id| todos.get_full(id.as_str()))
            .map(|(position, _, todo)| (position, model::todo_text(todo)))
            .collect();
        entries.sort_by_key(|(position, _)| *position);
        entries.into_iter().map(|(_, text)| text).collect()
    }
}
