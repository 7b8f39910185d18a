//! Fixed workspace layout shared by the controller and the worker.

/// Mount point of the workspace inside the worker container.
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Read-only prompt input.
pub const PROMPT_FILE: &str = "prompt.md";

/// Worker-persisted conversation state.
pub const SESSION_FILE: &str = "session.json";

/// Temporary file the session is written to before it replaces
/// [`SESSION_FILE`].
pub const SESSION_TMP_FILE: &str = "session.json.tmp";

/// Completion marker; its presence means success.
pub const MARKER_FILE: &str = "complete.json";

/// Name of the structured action log for a task.
pub fn audit_log_name(task_id: &str) -> String {
    format!("{task_id}-audit.log")
}

/// True if `name` is a top-level workspace file only the worker itself may write.
pub fn is_reserved(name: &str) -> bool {
    name == PROMPT_FILE
        || name == SESSION_FILE
        || name == SESSION_TMP_FILE
        || name == MARKER_FILE
        || name.ends_with("-audit.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved("complete.json"));
        assert!(is_reserved("session.json.tmp"));
        assert!(is_reserved(&audit_log_name("abc")));
        assert!(!is_reserved("out.txt"));
    }
}
