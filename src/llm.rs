//! Language model capability consumed by the dialogue core.

use async_trait::async_trait;

use crate::conversation::Turn;
use crate::Result;

/// Produces a completion for a chronological message list.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate the next assistant message. `messages` ends with the newest
    /// user turn.
    async fn generate(&self, messages: &[Turn]) -> Result<String>;

    /// Model identifier, for logs.
    fn name(&self) -> &str;
}
