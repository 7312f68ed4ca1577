//! Canonical tool name constants.
//!
//! All tool-name string literals should reference these constants to avoid
//! scattered magic strings. When a tool is renamed, only this file needs
//! to change.

pub const SEARCH_FILES: &str = "search_files";
pub const READ_FILE: &str = "read_file";
pub const LIST_FILES: &str = "list_files";
pub const LIST_CODE_DEFINITION_NAMES: &str = "list_code_definition_names";
pub const EXECUTE_COMMAND: &str = "execute_command";
pub const RETRIEVE_METADATA: &str = "retrieve_metadata";
pub const DEPLOY_METADATA: &str = "deploy_metadata";
pub const APPLY_DIFF: &str = "apply_diff";
pub const UPDATE_TODO_LIST: &str = "update_todo_list";
pub const BROWSER_ACTION: &str = "browser_action";

/// Tools whose results are large and stale soon after the model reads them.
/// Their bodies are the first thing condensation removes.
pub const HIGH_VOLUME_TOOLS: &[&str] = &[
    SEARCH_FILES,
    READ_FILE,
    LIST_FILES,
    LIST_CODE_DEFINITION_NAMES,
    EXECUTE_COMMAND,
    RETRIEVE_METADATA,
    DEPLOY_METADATA,
    APPLY_DIFF,
    UPDATE_TODO_LIST,
];
