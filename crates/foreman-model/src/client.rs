//! Ready-to-use `ModelClient` implementations that need no network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::trace;

use crate::error::ModelError;
use crate::protocol::ModelClient;
use crate::types::{ModelReply, ModelRequest};

/// A model that replays a fixed list of replies, one per request.
///
/// Used when no API key is configured and in tests. Once the script runs
/// out, every further request fails with [`ModelError::ScriptExhausted`].
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    /// Create a model from replies.
    pub fn new(replies: impl IntoIterator<Item = ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a model whose replies are all JSON payloads.
    pub fn from_payloads(payloads: impl IntoIterator<Item = Value>) -> Self {
        Self::new(payloads.into_iter().map(ModelReply::Payload))
    }

    /// The offline demo script: write `result.txt`, then complete.
    pub fn demo() -> Self {
        Self::from_payloads([
            json!({
                "tool": "create_file",
                "path": "result.txt",
                "content": "Hello from a Foreman worker!"
            }),
            json!({"tool": "task_complete", "message": "done"}),
        ])
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        match self.requests.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replies not yet handed out.
    pub fn remaining(&self) -> usize {
        match self.replies.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let next = match self.replies.lock() {
            Ok(mut replies) => replies.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        trace!(has_reply = next.is_some(), "Scripted model reply");
        next.ok_or(ModelError::ScriptExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new([
            ModelReply::Text("thinking".to_string()),
            ModelReply::Payload(json!({"tool": "list_files"})),
        ]);
        let request = ModelRequest::new(vec![ChatMessage::user("go")]);

        assert_eq!(
            model.complete(&request).await.unwrap(),
            ModelReply::Text("thinking".to_string())
        );
        assert!(matches!(
            model.complete(&request).await.unwrap(),
            ModelReply::Payload(_)
        ));
        assert!(matches!(
            model.complete(&request).await,
            Err(ModelError::ScriptExhausted)
        ));
        assert_eq!(model.requests().len(), 3);
    }

    #[test]
    fn test_demo_script_ends_with_completion() {
        let model = ScriptedModel::demo();
        assert_eq!(model.remaining(), 2);
    }
}
