use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse, ProviderError};

/// Upstream chat-completion model.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}
