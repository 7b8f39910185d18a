//! Model client for Foreman workers
//!
//! This crate provides the boundary between the worker loop and a remote
//! language model: a [`ModelClient`] trait taking the ordered conversation
//! and returning one structured reply, an OpenAI-compatible HTTP
//! implementation, and a scripted implementation for offline runs and tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use foreman_model::{ChatMessage, HttpModelClient, ModelClient, ModelRequest};
//!
//! async fn ask() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpModelClient::new("https://api.openai.com/v1")
//!         .with_api_key("sk-...")
//!         .with_model("gpt-4o");
//!
//!     let request = ModelRequest::new(vec![ChatMessage::user("List the workspace.")]);
//!     let reply = client.complete(&request).await?;
//!
//!     println!("Reply: {}", reply.raw());
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod http;
mod protocol;
mod types;

// Re-export main types
pub use client::ScriptedModel;
pub use error::ModelError;
pub use http::HttpModelClient;
pub use protocol::ModelClient;
pub use types::{parse_reply, ChatMessage, ChatRole, ModelReply, ModelRequest};
