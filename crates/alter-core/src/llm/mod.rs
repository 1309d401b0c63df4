//! LLM API client and types
//!
//! Supports both Claude API and OpenAI-compatible APIs. The chat flow only
//! sees the [`ReplyGenerator`] seam.

mod client;
mod types;

pub use client::{LlmClient, ReplyGenerator};
pub use types::*;
