use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Role;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Content filtered: {0}")]
    ContentFiltered(String),

    #[error("Request failed (HTTP {status}): {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } | ProviderError::NetworkError(_) => true,
            ProviderError::RequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Text shown to the person chatting.
    pub fn user_message(&self) -> String {
        match self {
            ProviderError::ContentFiltered(_) => "Your message was filtered by the content policy. \
                Please rephrase your message and try again."
                .to_string(),
            ProviderError::RateLimited { .. } => {
                "Rate limit exceeded. Please wait a moment and try again.".to_string()
            }
            ProviderError::AuthError(_) => {
                "The chat service rejected the configured credentials.".to_string()
            }
            ProviderError::RequestFailed { message, .. } if !message.is_empty() => message.clone(),
            _ => "An unexpected error occurred. Please try again.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(ProviderError::RateLimited { retry_after_secs: None }.is_retryable());
        assert!(ProviderError::NetworkError("reset".into()).is_retryable());
        assert!(ProviderError::RequestFailed { status: 502, message: String::new() }.is_retryable());
        assert!(!ProviderError::RequestFailed { status: 400, message: String::new() }.is_retryable());
        assert!(!ProviderError::ContentFiltered("policy".into()).is_retryable());
        assert!(!ProviderError::AuthError("bad key".into()).is_retryable());
    }

    #[test]
    fn user_messages_explain_policy_and_rate_limits() {
        assert!(ProviderError::ContentFiltered("x".into())
            .user_message()
            .contains("content policy"));
        assert!(ProviderError::RateLimited { retry_after_secs: Some(3) }
            .user_message()
            .starts_with("Rate limit exceeded"));
        assert_eq!(
            ProviderError::RequestFailed { status: 404, message: "Deployment not found".into() }
                .user_message(),
            "Deployment not found"
        );
    }
}
