//! Model reply validation.

use foreman_core::ToolCommand;
use foreman_model::ModelReply;

use crate::error::ValidationError;

/// Turn a model reply into a command, or explain why it is not one.
pub fn validate(reply: &ModelReply) -> Result<ToolCommand, ValidationError> {
    let value = match reply {
        ModelReply::Payload(value) => value.clone(),
        ModelReply::Text(_) => {
            return Err(ValidationError(
                "expected a JSON tool command, got free text".to_string(),
            ))
        }
    };

    let command = ToolCommand::from_value(value).map_err(|e| ValidationError(e.to_string()))?;
    check_arguments(&command)?;
    Ok(command)
}

fn check_arguments(command: &ToolCommand) -> Result<(), ValidationError> {
    match command {
        ToolCommand::ExecuteShell { command, .. } if command.trim().is_empty() => {
            Err(ValidationError("execute_shell needs a command".to_string()))
        }
        ToolCommand::CreateFile { path, .. }
        | ToolCommand::ReadFile { path }
        | ToolCommand::EditFile { path, .. }
            if path.trim().is_empty() =>
        {
            Err(ValidationError(format!("{} needs a path", command.name())))
        }
        ToolCommand::EditFile {
            start_line: None,
            end_line: Some(_),
            ..
        } => Err(ValidationError(
            "edit_file end_line requires start_line".to_string(),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_payload() {
        let reply = ModelReply::Payload(json!({"tool": "read_file", "path": "a.txt"}));
        assert_eq!(
            validate(&reply).unwrap(),
            ToolCommand::ReadFile {
                path: "a.txt".to_string()
            }
        );
    }

    #[test]
    fn test_free_text_is_rejected() {
        let err = validate(&ModelReply::Text("sure, on it".to_string())).unwrap_err();
        assert!(err.to_string().starts_with("malformed command:"));
    }

    #[test]
    fn test_unknown_tool_is_rejected() {
        let reply = ModelReply::Payload(json!({"tool": "launch_missiles"}));
        assert!(validate(&reply).is_err());
    }

    #[test]
    fn test_missing_argument_is_rejected() {
        let reply = ModelReply::Payload(json!({"tool": "create_file", "path": "a.txt"}));
        assert!(validate(&reply).is_err());
    }

    #[test]
    fn test_blank_arguments_are_rejected() {
        let shell = ModelReply::Payload(json!({"tool": "execute_shell", "command": "  "}));
        assert!(validate(&shell).is_err());

        let read = ModelReply::Payload(json!({"tool": "read_file", "path": ""}));
        assert!(validate(&read).is_err());
    }
}
