//! The model collaborator contract.

use async_trait::async_trait;

use crate::error::ModelError;
use crate::types::{ModelReply, ModelRequest};

/// A language model the worker converses with.
///
/// Implementations own transport and retry concerns; the worker only sees one
/// reply per request. The call is the worker loop's single suspension point.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send the full conversation and await the next reply.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;
}
