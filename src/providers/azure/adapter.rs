use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};

use super::models::*;
use crate::config::GatewayConfig;
use crate::providers::retry::{with_retry, RetryConfig};
use crate::providers::traits::ChatCompletion;
use crate::providers::types::{ChatMessage, ChatRequest, ChatResponse, ProviderError};

const CONTENT_POLICY_MARKER: &str = "content management policy";

/// Chat completions from an Azure OpenAI deployment.
pub struct AzureOpenAiProvider {
    client: Client,
    config: GatewayConfig,
    retry: RetryConfig,
}

impl AzureOpenAiProvider {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            retry: RetryConfig::default(),
        }
    }

    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment
        )
    }

    fn build_messages(messages: &[ChatMessage]) -> Vec<AzureMessage> {
        messages
            .iter()
            .map(|m| AzureMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    async fn parse_error(response: Response) -> ProviderError {
        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<AzureErrorResponse>(&body)
            .ok()
            .map(|parsed| parsed.error);

        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after_secs },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::AuthError(
                detail
                    .map(|d| d.message)
                    .unwrap_or_else(|| "Invalid API key".to_string()),
            ),
            StatusCode::BAD_REQUEST
                if detail.as_ref().is_some_and(|d| {
                    d.message.contains(CONTENT_POLICY_MARKER)
                        || d.code.as_deref() == Some("content_filter")
                }) =>
            {
                ProviderError::ContentFiltered(detail.map(|d| d.message).unwrap_or_default())
            }
            _ => ProviderError::RequestFailed {
                status: status.as_u16(),
                message: detail.map(|d| d.message).unwrap_or_default(),
            },
        }
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = AzureRequest {
            messages: Self::build_messages(&request.messages),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(self.completions_url())
            .query(&[("api-version", self.config.api_version.as_str())])
            .header("api-key", &self.config.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::parse_error(response).await);
        }

        let azure_response: AzureResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let choice = azure_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))?;

        let (tokens_in, tokens_out) = azure_response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((None, None));

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            model: azure_response
                .model
                .unwrap_or_else(|| self.config.deployment.clone()),
            tokens_in,
            tokens_out,
        })
    }
}

#[async_trait]
impl ChatCompletion for AzureOpenAiProvider {
    fn model_name(&self) -> &str {
        &self.config.deployment
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let request = &request;
        with_retry(&self.retry, move || self.send_once(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COMPLETIONS_PATH: &str = "/openai/deployments/gpt-4o/chat/completions";

    fn provider(server: &MockServer) -> AzureOpenAiProvider {
        AzureOpenAiProvider::new(GatewayConfig {
            api_key: "azure-key".to_string(),
            endpoint: format!("{}/", server.uri()),
            deployment: "gpt-4o".to_string(),
            api_version: "2024-12-01-preview".to_string(),
        })
        .with_retry(RetryConfig {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_multiplier: 2,
        })
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![ChatMessage {
                role: Role::User,
                content: "Where should I go in March?".to_string(),
            }],
            temperature: Some(0.7),
            max_tokens: Some(2000),
        }
    }

    #[tokio::test]
    async fn completes_with_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .and(query_param("api-version", "2024-12-01-preview"))
            .and(header("api-key", "azure-key"))
            .and(body_partial_json(json!({
                "messages": [{"role": "user", "content": "Where should I go in March?"}],
                "max_tokens": 2000
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-4o-2024-08-06",
                "choices": [{"message": {"role": "assistant", "content": "Consider Portugal or Morocco."}}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 6}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider(&server).complete(request()).await.unwrap();
        assert_eq!(response.content, "Consider Portugal or Morocco.");
        assert_eq!(response.model, "gpt-4o-2024-08-06");
        assert_eq!(response.tokens_in, Some(12));
        assert_eq!(response.tokens_out, Some(6));
    }

    #[tokio::test]
    async fn missing_content_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": null}}]
            })))
            .mount(&server)
            .await;

        let provider = provider(&server);
        let response = provider.complete(request()).await.unwrap();
        assert_eq!(response.content, "");
        assert_eq!(response.model, provider.model_name());
    }

    #[tokio::test]
    async fn content_policy_rejection_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "code": "content_filter",
                    "message": "The response was filtered due to the prompt triggering Azure OpenAI's content management policy."
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ContentFiltered(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .expect(3)
            .mount(&server)
            .await;

        let err = provider(&server).complete(request()).await.unwrap_err();
        match err {
            ProviderError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, Some(7)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn server_error_recovers_on_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "recovered"}}]
            })))
            .mount(&server)
            .await;

        let response = provider(&server).complete(request()).await.unwrap();
        assert_eq!(response.content, "recovered");
    }

    #[tokio::test]
    async fn bad_credentials_are_an_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"code": "401", "message": "Access denied due to invalid subscription key."}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server).complete(request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthError(_)));
    }
}
