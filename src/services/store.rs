use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use super::clock::MonotonicClock;
use super::conversation::normalize_title;
use super::ids::new_id;
use super::local_cache::LocalCache;
use super::merge::{merge_conversations, merge_messages};
use super::remote::RemoteStore;
use crate::config::ANONYMOUS_USER_ID;
use crate::models::{Conversation, Message, NewMessage};

/// Conversation and message store over two tiers: the on-device cache and
/// an optional remote store.
///
/// Writes land in the local cache before returning and are mirrored to the
/// remote store in detached tasks whose failures are only logged. Reads
/// merge both tiers from scratch on every call; the merged view is never
/// written back to the local cache.
pub struct ConversationStore {
    local: LocalCache,
    // Serializes read-modify-write cycles on the local slots.
    local_writes: Mutex<()>,
    remote: Option<Arc<dyn RemoteStore>>,
    sync: Option<RemoteSync>,
    clock: MonotonicClock,
    user_id: String,
}

impl ConversationStore {
    /// Remote mirroring needs a Tokio runtime; outside one the store keeps
    /// working against the local cache and skips the remote writes.
    pub fn new(local: LocalCache, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let sync = remote.as_ref().and_then(|remote| match Handle::try_current() {
            Ok(runtime) => Some(RemoteSync::new(remote.clone(), runtime)),
            Err(_) => {
                tracing::warn!("No async runtime available; remote mirroring disabled");
                None
            }
        });

        Self {
            local,
            local_writes: Mutex::new(()),
            remote,
            sync,
            clock: MonotonicClock::new(),
            user_id: ANONYMOUS_USER_ID.to_string(),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    // --- Writes ---

    pub fn create_conversation(&self, title: &str) -> Conversation {
        let guard = self.lock_local();
        let now = self.clock.now();
        let conversation = Conversation {
            id: new_id(),
            title: normalize_title(title),
            user_id: self.user_id.clone(),
            created_at: now,
            updated_at: now,
            message_count: Some(0),
        };

        if let Some(mut conversations) = self.load_conversations() {
            conversations.insert(0, conversation.clone());
            self.local.write_conversations(&conversations);
        }
        drop(guard);

        tracing::debug!("Created conversation {}", conversation.id);
        self.mirror(SyncOp::UpsertConversation(conversation.clone()));
        conversation
    }

    /// Upsert a full conversation row. `created_at` and the message count of
    /// an existing row are kept; `updated_at` is always refreshed.
    pub fn save_conversation(&self, conversation: Conversation) -> Conversation {
        let guard = self.lock_local();
        let now = self.clock.now();
        let conversation = Conversation {
            title: normalize_title(&conversation.title),
            updated_at: now,
            ..conversation
        };

        let saved = match self.load_conversations() {
            Some(mut conversations) => {
                let saved = match conversations.iter_mut().find(|c| c.id == conversation.id) {
                    Some(existing) => {
                        let message_count = conversation.message_count.or(existing.message_count);
                        *existing = Conversation {
                            created_at: existing.created_at,
                            message_count,
                            ..conversation
                        };
                        existing.clone()
                    }
                    None => {
                        conversations.insert(0, conversation.clone());
                        conversation
                    }
                };
                self.local.write_conversations(&conversations);
                saved
            }
            None => conversation,
        };
        drop(guard);

        self.mirror(SyncOp::UpsertConversation(saved.clone()));
        saved
    }

    /// Retitle a conversation held in the local cache. `None` when the id is
    /// unknown locally or the cache cannot be read.
    pub fn rename_conversation(&self, id: &str, title: &str) -> Option<Conversation> {
        let guard = self.lock_local();
        let mut conversations = self.load_conversations()?;
        let existing = conversations.iter_mut().find(|c| c.id == id)?;
        existing.title = normalize_title(title);
        existing.updated_at = self.clock.now();
        let renamed = existing.clone();
        self.local.write_conversations(&conversations);
        drop(guard);

        self.mirror(SyncOp::UpsertConversation(renamed.clone()));
        Some(renamed)
    }

    /// Append a message and refresh its parent's `updated_at` and message count.
    pub fn save_message(&self, new_message: NewMessage) -> Message {
        let guard = self.lock_local();
        let now = self.clock.now();
        let message = Message {
            id: new_id(),
            conversation_id: new_message.conversation_id,
            role: new_message.role,
            content: new_message.content,
            metadata: new_message.metadata,
            created_at: now,
        };

        let parent = self.load_messages().and_then(|mut messages| {
            messages.push(message.clone());
            self.local.write_messages(&messages);

            let count = messages
                .iter()
                .filter(|m| m.conversation_id == message.conversation_id)
                .count();
            self.refresh_parent(&message, count)
        });
        drop(guard);

        self.mirror(SyncOp::UpsertMessage(message.clone()));
        if let Some(parent) = parent {
            self.mirror(SyncOp::UpsertConversation(parent));
        }
        message
    }

    /// Remove a conversation and its messages. The local delete is final even
    /// if the remote delete fails, in which case the remote row shows up again
    /// on the next merged read.
    ///
    /// Returns whether the conversation was present in the local cache.
    pub fn delete_conversation(&self, id: &str) -> bool {
        let guard = self.lock_local();
        let removed = match self.load_conversations() {
            Some(mut conversations) => {
                let before = conversations.len();
                conversations.retain(|c| c.id != id);
                let removed = conversations.len() != before;
                self.local.write_conversations(&conversations);
                removed
            }
            None => false,
        };

        if let Some(mut messages) = self.load_messages() {
            messages.retain(|m| m.conversation_id != id);
            self.local.write_messages(&messages);
        }
        drop(guard);

        self.mirror(SyncOp::DeleteConversation(id.to_string()));
        removed
    }

    // --- Reads ---

    pub async fn get_all_conversations(&self) -> Vec<Conversation> {
        let local = self.local.read_conversations();
        let remote = match &self.remote {
            Some(remote) => remote.select_conversations().await.unwrap_or_else(|e| {
                tracing::warn!("Failed to fetch remote conversations: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        merge_conversations(local, remote)
    }

    pub async fn get_all_messages(&self, conversation_id: Option<&str>) -> Vec<Message> {
        let local = self.local.read_messages(conversation_id);
        let remote = match &self.remote {
            Some(remote) => remote
                .select_messages(conversation_id)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to fetch remote messages: {}", e);
                    Vec::new()
                }),
            None => Vec::new(),
        };
        merge_messages(local, remote)
    }

    pub async fn get_conversation(&self, id: &str) -> Option<Conversation> {
        self.get_all_conversations()
            .await
            .into_iter()
            .find(|c| c.id == id)
    }

    /// Wait for every remote mirror issued so far to finish or fail.
    pub async fn flush(&self) {
        if let Some(sync) = &self.sync {
            sync.flush().await;
        }
    }

    /// Bump the cached parent of `message`. Caller holds the local write lock.
    fn refresh_parent(&self, message: &Message, count: usize) -> Option<Conversation> {
        let mut conversations = self.load_conversations()?;
        let Some(parent) = conversations
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            tracing::debug!(
                "Conversation {} not in local cache; message {} saved without parent update",
                message.conversation_id,
                message.id
            );
            return None;
        };
        parent.message_count = Some(count);
        parent.updated_at = message.created_at;
        let parent = parent.clone();
        self.local.write_conversations(&conversations);
        Some(parent)
    }

    // A failed read must not be followed by a write: the slot would be
    // replaced with only the new rows.
    fn load_conversations(&self) -> Option<Vec<Conversation>> {
        match self.local.load_conversations() {
            Ok(conversations) => Some(conversations),
            Err(e) => {
                tracing::error!("Local conversations unreadable, skipping local write: {:#}", e);
                None
            }
        }
    }

    fn load_messages(&self) -> Option<Vec<Message>> {
        match self.local.load_messages() {
            Ok(messages) => Some(messages),
            Err(e) => {
                tracing::error!("Local messages unreadable, skipping local write: {:#}", e);
                None
            }
        }
    }

    fn lock_local(&self) -> MutexGuard<'_, ()> {
        self.local_writes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mirror(&self, op: SyncOp) {
        if let Some(sync) = &self.sync {
            sync.dispatch(op);
        }
    }
}

#[derive(Debug)]
enum SyncOp {
    UpsertConversation(Conversation),
    UpsertMessage(Message),
    DeleteConversation(String),
}

impl SyncOp {
    async fn run(self, remote: &dyn RemoteStore) {
        match self {
            SyncOp::UpsertConversation(conversation) => {
                if let Err(e) = remote.upsert_conversation(&conversation).await {
                    tracing::warn!("Failed to sync conversation {}: {}", conversation.id, e);
                }
            }
            SyncOp::UpsertMessage(message) => {
                if let Err(e) = remote.upsert_message(&message).await {
                    tracing::warn!("Failed to sync message {}: {}", message.id, e);
                }
            }
            SyncOp::DeleteConversation(id) => {
                if let Err(e) = remote.delete_conversation(&id).await {
                    tracing::warn!("Failed to delete remote conversation {}: {}", id, e);
                }
                if let Err(e) = remote.delete_messages_by_conversation(&id).await {
                    tracing::warn!("Failed to delete remote messages of {}: {}", id, e);
                }
            }
        }
    }
}

/// Detached executor for remote mirror writes.
struct RemoteSync {
    remote: Arc<dyn RemoteStore>,
    tasks: TaskTracker,
    runtime: Handle,
}

impl RemoteSync {
    fn new(remote: Arc<dyn RemoteStore>, runtime: Handle) -> Self {
        Self {
            remote,
            tasks: TaskTracker::new(),
            runtime,
        }
    }

    fn dispatch(&self, op: SyncOp) {
        let remote = self.remote.clone();
        self.tasks
            .spawn_on(async move { op.run(remote.as_ref()).await }, &self.runtime);
    }

    async fn flush(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}
