use std::sync::Arc;

use thiserror::Error;

use super::conversation::title_from_message;
use super::settings::ChatSettings;
use super::store::ConversationStore;
use crate::models::{Message, NewMessage, Role};
use crate::providers::{ChatCompletion, ChatMessage, ChatRequest, ProviderError};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Conversation not found: {0}")]
    UnknownConversation(String),

    #[error("No user message to answer in conversation {0}")]
    NothingToRegenerate(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ChatError {
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Provider(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// One completed user/assistant exchange.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub conversation_id: String,
    pub user_message: Message,
    pub reply: Message,
}

/// Runs chat turns: persists each turn through the store and asks the
/// completion gateway for the assistant's reply.
pub struct ChatService {
    store: Arc<ConversationStore>,
    gateway: Arc<dyn ChatCompletion>,
    settings: ChatSettings,
}

impl ChatService {
    pub fn new(
        store: Arc<ConversationStore>,
        gateway: Arc<dyn ChatCompletion>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            settings,
        }
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: ChatSettings) {
        self.settings = settings;
    }

    /// Send `content` as a user turn. Without a conversation id a new
    /// conversation is started and titled after the message.
    ///
    /// The user message is stored before the gateway is called, so it is
    /// kept even when the completion fails.
    pub async fn send_message(
        &self,
        conversation_id: Option<&str>,
        content: &str,
    ) -> Result<ChatExchange, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let conversation = match conversation_id {
            Some(id) => self
                .store
                .get_conversation(id)
                .await
                .ok_or_else(|| ChatError::UnknownConversation(id.to_string()))?,
            None => self.store.create_conversation(&title_from_message(content)),
        };

        let user_message = self
            .store
            .save_message(NewMessage::new(&conversation.id, Role::User, content));

        let history = self.store.get_all_messages(Some(&conversation.id)).await;
        let reply = self.complete_and_save(&conversation.id, &history).await?;

        Ok(ChatExchange {
            conversation_id: conversation.id,
            user_message,
            reply,
        })
    }

    /// Ask for a fresh reply to the latest user message. Earlier replies stay
    /// stored; they are only left out of the request.
    pub async fn regenerate(&self, conversation_id: &str) -> Result<Message, ChatError> {
        let history = self.store.get_all_messages(Some(conversation_id)).await;
        let last_user = history
            .iter()
            .rposition(|m| m.role == Role::User)
            .ok_or_else(|| ChatError::NothingToRegenerate(conversation_id.to_string()))?;

        self.complete_and_save(conversation_id, &history[..=last_user])
            .await
    }

    async fn complete_and_save(
        &self,
        conversation_id: &str,
        history: &[Message],
    ) -> Result<Message, ChatError> {
        let request = self.build_request(history);
        tracing::debug!(
            "Requesting completion for {} with {} messages",
            conversation_id,
            request.messages.len()
        );
        let response = self.gateway.complete(request).await?;

        let mut reply = NewMessage::new(conversation_id, Role::Assistant, response.content)
            .with_metadata("model", response.model);
        if let Some(tokens_in) = response.tokens_in {
            reply = reply.with_metadata("tokens_in", tokens_in);
        }
        if let Some(tokens_out) = response.tokens_out {
            reply = reply.with_metadata("tokens_out", tokens_out);
        }

        Ok(self.store.save_message(reply))
    }

    fn build_request(&self, history: &[Message]) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = self.settings.system_prompt.as_deref() {
            if !prompt.trim().is_empty() {
                messages.push(ChatMessage {
                    role: Role::System,
                    content: prompt.to_string(),
                });
            }
        }
        messages.extend(history.iter().map(|m| ChatMessage {
            role: m.role,
            content: m.content.clone(),
        }));

        ChatRequest {
            messages,
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
        }
    }
}
