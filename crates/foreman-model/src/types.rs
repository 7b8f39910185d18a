//! Request and reply types for the model API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in the request history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    /// Create a new chat message.
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// One request: the ordered conversation so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
}

impl ModelRequest {
    /// Create a request from messages.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

/// One reply: free text, or a structured payload expected to be a tool command.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// Prose with no JSON object in it.
    Text(String),
    /// A JSON object, not yet validated.
    Payload(Value),
}

impl ModelReply {
    /// The reply as it should appear in the conversation history.
    pub fn raw(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Payload(value) => value.to_string(),
        }
    }
}

/// Interpret the text content of a model reply.
///
/// A reply that is (or is fenced as) a JSON object becomes a payload;
/// anything else is free text.
pub fn parse_reply(content: &str) -> ModelReply {
    let trimmed = content.trim();
    let unfenced = strip_code_fence(trimmed);

    match serde_json::from_str::<Value>(unfenced) {
        Ok(value @ Value::Object(_)) => ModelReply::Payload(value),
        _ => ModelReply::Text(content.to_string()),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop an optional language tag on the opening fence line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// OpenAI-compatible chat completion request body.
#[derive(Debug, Serialize)]
pub(crate) struct CompletionBody<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
}

/// The subset of a chat completion response the client reads.
#[derive(Debug, Deserialize)]
pub(crate) struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionChoice {
    pub message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_json_object() {
        let reply = parse_reply(r#"{"tool":"read_file","path":"a"}"#);
        assert_eq!(
            reply,
            ModelReply::Payload(json!({"tool": "read_file", "path": "a"}))
        );
    }

    #[test]
    fn test_parse_fenced_json() {
        let reply = parse_reply("```json\n{\"tool\":\"list_files\"}\n```");
        assert_eq!(reply, ModelReply::Payload(json!({"tool": "list_files"})));
    }

    #[test]
    fn test_parse_text_and_non_objects() {
        assert_eq!(
            parse_reply("I will now create the file."),
            ModelReply::Text("I will now create the file.".to_string())
        );
        assert!(matches!(parse_reply("[1, 2]"), ModelReply::Text(_)));
    }

    #[test]
    fn test_chat_role_serializes_lowercase() {
        let msg = ChatMessage::assistant("hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
    }
}
