//! Completion service contract
//!
//! The LLM is an external collaborator: fallible, slow, and never the only
//! route to an answer. Callers always hold a deterministic fallback.

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete `user_prompt` under `system_prompt`.
    /// With `wants_json` the service is asked for a bare JSON document.
    async fn complete(&self, system_prompt: &str, user_prompt: &str, wants_json: bool) -> Result<String>;
}

/// Strip a ```json fence the model may wrap around its output
pub fn strip_json_fence(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}
