//! Typed tool commands issued by the model.
//!
//! The wire form is a flat JSON object whose `tool` field selects the
//! operation, e.g. `{"tool":"create_file","path":"out.txt","content":"hi"}`.
//! Unknown tools and unknown or missing fields are rejected during
//! deserialization, so an invalid payload never becomes a `ToolCommand`.

use serde::{Deserialize, Serialize};

/// One validated instruction for the sandbox toolbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case", deny_unknown_fields)]
pub enum ToolCommand {
    /// Run a shell command with the workspace as working directory.
    #[serde(alias = "run_shell")]
    ExecuteShell {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
    },

    /// Create a new file. Fails if the path already exists.
    CreateFile { path: String, content: String },

    /// Read a file's content.
    ReadFile { path: String },

    /// Overwrite an existing file, or a 1-based inclusive line range of it.
    EditFile {
        path: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_line: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_line: Option<usize>,
    },

    /// List a directory.
    ListFiles {
        #[serde(default = "default_list_path")]
        path: String,
        #[serde(default)]
        recursive: bool,
    },

    /// Write the completion marker and end the session.
    #[serde(alias = "complete_task")]
    TaskComplete {
        #[serde(alias = "summary")]
        message: String,
    },
}

fn default_list_path() -> String {
    ".".to_string()
}

impl ToolCommand {
    /// Parse a raw model payload into a command.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Wire name of the tool.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ExecuteShell { .. } => "execute_shell",
            Self::CreateFile { .. } => "create_file",
            Self::ReadFile { .. } => "read_file",
            Self::EditFile { .. } => "edit_file",
            Self::ListFiles { .. } => "list_files",
            Self::TaskComplete { .. } => "task_complete",
        }
    }

    /// True for the one command that ends the worker loop.
    pub fn is_completion(&self) -> bool {
        matches!(self, Self::TaskComplete { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_create_file() {
        let cmd = ToolCommand::from_value(
            json!({"tool": "create_file", "path": "out.txt", "content": "hi"}),
        )
        .unwrap();
        assert_eq!(
            cmd,
            ToolCommand::CreateFile {
                path: "out.txt".to_string(),
                content: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_parse_aliases() {
        let cmd = ToolCommand::from_value(json!({"tool": "complete_task", "summary": "ok"}))
            .unwrap();
        assert_eq!(
            cmd,
            ToolCommand::TaskComplete {
                message: "ok".to_string()
            }
        );

        let cmd = ToolCommand::from_value(json!({"tool": "run_shell", "command": "ls"})).unwrap();
        assert_eq!(cmd.name(), "execute_shell");
    }

    #[test]
    fn test_list_files_defaults() {
        let cmd = ToolCommand::from_value(json!({"tool": "list_files"})).unwrap();
        assert_eq!(
            cmd,
            ToolCommand::ListFiles {
                path: ".".to_string(),
                recursive: false
            }
        );
    }

    #[test]
    fn test_rejects_unknown_tool() {
        let err = ToolCommand::from_value(json!({"tool": "delete_everything"})).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn test_rejects_missing_and_extra_fields() {
        assert!(ToolCommand::from_value(json!({"tool": "read_file"})).is_err());
        assert!(
            ToolCommand::from_value(json!({"tool": "read_file", "path": "a", "mode": "x"}))
                .is_err()
        );
        assert!(ToolCommand::from_value(json!({"path": "a"})).is_err());
    }

    #[test]
    fn test_serialized_form_reparses() {
        let cmd = ToolCommand::EditFile {
            path: "a.txt".to_string(),
            content: "x".to_string(),
            start_line: Some(2),
            end_line: None,
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["tool"], "edit_file");
        assert!(value.get("end_line").is_none());
        assert_eq!(ToolCommand::from_value(value).unwrap(), cmd);
    }
}
