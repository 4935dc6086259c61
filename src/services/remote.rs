use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::RemoteConfig;
use crate::models::{Conversation, Message, Role};

const CONVERSATIONS_TABLE: &str = "conversations";
const MESSAGES_TABLE: &str = "messages";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid remote configuration: {0}")]
    Config(String),

    #[error("Remote store unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Remote store rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid remote response: {0}")]
    Decode(String),
}

/// Hosted relational store with a `conversations` and a `messages` table.
///
/// Upserts are keyed by `id` and replace the whole row.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), RemoteError>;

    async fn upsert_message(&self, message: &Message) -> Result<(), RemoteError>;

    /// Newest `updated_at` first.
    async fn select_conversations(&self) -> Result<Vec<Conversation>, RemoteError>;

    /// Oldest `created_at` first.
    async fn select_messages(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<Vec<Message>, RemoteError>;

    async fn delete_conversation(&self, id: &str) -> Result<(), RemoteError>;

    async fn delete_messages_by_conversation(&self, conversation_id: &str)
        -> Result<(), RemoteError>;
}

// --- Wire rows ---

#[derive(Debug, Serialize)]
struct ConversationRow<'a> {
    id: &'a str,
    title: &'a str,
    user_id: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> From<&'a Conversation> for ConversationRow<'a> {
    fn from(c: &'a Conversation) -> Self {
        Self {
            id: &c.id,
            title: &c.title,
            user_id: &c.user_id,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct MessageRow<'a> {
    id: &'a str,
    conversation_id: &'a str,
    role: Role,
    content: &'a str,
    metadata: &'a Map<String, Value>,
    created_at: DateTime<Utc>,
}

impl<'a> From<&'a Message> for MessageRow<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            id: &m.id,
            conversation_id: &m.conversation_id,
            role: m.role,
            content: &m.content,
            metadata: &m.metadata,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
}

/// `RemoteStore` over a PostgREST endpoint (`{base}/rest/v1/{table}`).
#[derive(Clone, Debug)]
pub struct PostgrestRemote {
    client: Client,
    base_url: String,
    service_key: String,
}

impl PostgrestRemote {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        if config.service_key.trim().is_empty() {
            return Err(RemoteError::Config("service key cannot be empty".to_string()));
        }
        url::Url::parse(&config.url)
            .map_err(|e| RemoteError::Config(format!("invalid url {}: {}", config.url, e)))?;

        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn upsert<T: Serialize + Sync>(&self, table: &str, row: &T) -> Result<(), RemoteError> {
        let req = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);
        let response = self.authorize(req).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, RemoteError> {
        let req = self.client.get(self.table_url(table)).query(query);
        let response = Self::check(self.authorize(req).send().await?).await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn delete_where(&self, table: &str, column: &str, id: &str) -> Result<(), RemoteError> {
        let req = self
            .client
            .delete(self.table_url(table))
            .query(&[(column, format!("eq.{}", id))]);
        Self::check(self.authorize(req).send().await?).await?;
        Ok(())
    }

    async fn check(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message: Self::parse_error_message(status, &body),
        })
    }

    fn parse_error_message(status: StatusCode, body: &str) -> String {
        serde_json::from_str::<PostgrestErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.message)
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            })
    }
}

#[async_trait]
impl RemoteStore for PostgrestRemote {
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), RemoteError> {
        self.upsert(CONVERSATIONS_TABLE, &ConversationRow::from(conversation))
            .await
    }

    async fn upsert_message(&self, message: &Message) -> Result<(), RemoteError> {
        self.upsert(MESSAGES_TABLE, &MessageRow::from(message)).await
    }

    async fn select_conversations(&self) -> Result<Vec<Conversation>, RemoteError> {
        self.select(
            CONVERSATIONS_TABLE,
            &[
                ("select", "*".to_string()),
                ("order", "updated_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn select_messages(
        &self,
        conversation_id: Option<&str>,
    ) -> Result<Vec<Message>, RemoteError> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("order", "created_at.asc".to_string()),
        ];
        if let Some(id) = conversation_id {
            query.push(("conversation_id", format!("eq.{}", id)));
        }
        self.select(MESSAGES_TABLE, &query).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<(), RemoteError> {
        self.delete_where(CONVERSATIONS_TABLE, "id", id).await
    }

    async fn delete_messages_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<(), RemoteError> {
        self.delete_where(MESSAGES_TABLE, "conversation_id", conversation_id)
            .await
    }
}
