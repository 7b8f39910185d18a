//! Prompt file loading.
//!
//! A prompt is markdown with an optional YAML front-matter block:
//!
//! ```text
//! ---
//! system: You are a careful build engineer.
//! ---
//! Create out.txt containing "hi".
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::WorkerError;

/// A parsed prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    /// Front-matter keys, empty when the file has none.
    pub front_matter: BTreeMap<String, serde_yaml::Value>,
    /// Markdown body; the first user turn.
    pub body: String,
}

impl Prompt {
    /// Read and parse a prompt file.
    pub async fn load(path: &Path) -> Result<Self, WorkerError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WorkerError::Prompt(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Split optional front matter from the body.
    pub fn parse(text: &str) -> Result<Self, WorkerError> {
        let Some(rest) = text
            .strip_prefix("---\n")
            .or_else(|| text.strip_prefix("---\r\n"))
        else {
            return Ok(Self {
                front_matter: BTreeMap::new(),
                body: text.trim().to_string(),
            });
        };

        let (yaml, body) = split_closing_fence(rest)
            .ok_or_else(|| WorkerError::Prompt("unterminated front matter".to_string()))?;

        let front_matter = if yaml.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| WorkerError::Prompt(format!("invalid front matter: {e}")))?
        };

        Ok(Self {
            front_matter,
            body: body.trim().to_string(),
        })
    }

    /// System instructions from the `system` key, if present.
    pub fn system(&self) -> Option<&str> {
        self.front_matter.get("system").and_then(|v| v.as_str())
    }
}

fn split_closing_fence(rest: &str) -> Option<(&str, &str)> {
    if let Some(body) = rest.strip_prefix("---") {
        return Some(("", body));
    }
    let idx = rest.find("\n---")?;
    let yaml = &rest[..idx];
    let after = &rest[idx + 4..];
    Some((yaml, after))
}
