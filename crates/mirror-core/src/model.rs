//! Names and field accessors for the todos app's remote schema.

use crate::protocol::Fields;

/// Collection holding lists.
pub const LISTS: &str = "lists";
/// Collection holding todos.
pub const TODOS: &str = "todos";

/// Publication of the authenticated user's private lists (no params).
pub const PRIVATE_LISTS_SUB: &str = "privateLists";
/// Publication of one list's todos (param: list id).
pub const TODOS_SUB: &str = "todos";

const NAME_FIELD: &str = "name";
const TEXT_FIELD: &str = "text";
/// Foreign key from a todo to its list.
pub const LIST_ID_FIELD: &str = "listId";

/// A list's display name.
pub fn list_name(fields: &Fields) -> Option<&str> {
    fields.get(NAME_FIELD)?.as_str()
}

/// The list a todo belongs to.
pub fn todo_list_id(fields: &Fields) -> Option<&str> {
    fields.get(LIST_ID_FIELD)?.as_str()
}

/// A todo's text. Missing or non-string text renders as an empty line.
pub fn todo_text(fields: &Fields) -> &str {
    fields
        .get(TEXT_FIELD)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}
