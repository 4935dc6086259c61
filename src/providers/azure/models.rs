use serde::{Deserialize, Serialize};

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct AzureRequest {
    pub messages: Vec<AzureMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AzureMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
pub struct AzureResponse {
    pub choices: Vec<AzureChoice>,
    pub model: Option<String>,
    pub usage: Option<AzureUsage>,
}

#[derive(Debug, Deserialize)]
pub struct AzureChoice {
    pub message: AzureMessage,
}

#[derive(Debug, Deserialize)]
pub struct AzureUsage {
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
}

// --- Error types ---

#[derive(Debug, Deserialize)]
pub struct AzureErrorResponse {
    pub error: AzureErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct AzureErrorDetail {
    pub message: String,
    pub code: Option<String>,
}
