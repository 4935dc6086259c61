use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{CONVERSATIONS_SLOT, MESSAGES_SLOT};
use crate::models::{Conversation, Message};

/// Synchronous key-value storage scoped to this device.
pub trait CacheMedium: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;
}

#[cfg(test)]
pub use memory::MemoryMedium;

#[cfg(test)]
mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::{anyhow, Result};

    use super::CacheMedium;

    /// Volatile medium for tests.
    #[derive(Debug, Default)]
    pub struct MemoryMedium {
        slots: Mutex<HashMap<String, String>>,
    }

    impl MemoryMedium {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl CacheMedium for MemoryMedium {
        fn get(&self, key: &str) -> Result<Option<String>> {
            let slots = self.slots.lock().map_err(|_| anyhow!("Slot lock poisoned"))?;
            Ok(slots.get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            let mut slots = self.slots.lock().map_err(|_| anyhow!("Slot lock poisoned"))?;
            slots.insert(key.to_string(), value.to_string());
            Ok(())
        }
    }
}

/// Full conversation and message collections, each serialized as JSON into its own slot.
///
/// `read_*` never fail: a missing, unreadable or corrupt slot is logged and
/// treated as empty. `load_*` still surface an unreadable medium. Without a medium (`detached`) every read is empty and
/// every write is a no-op.
#[derive(Clone)]
pub struct LocalCache {
    medium: Option<Arc<dyn CacheMedium>>,
}

impl LocalCache {
    pub fn new(medium: Arc<dyn CacheMedium>) -> Self {
        Self {
            medium: Some(medium),
        }
    }

    pub fn detached() -> Self {
        Self { medium: None }
    }

    pub fn is_detached(&self) -> bool {
        self.medium.is_none()
    }

    pub fn read_conversations(&self) -> Vec<Conversation> {
        self.read_slot(CONVERSATIONS_SLOT).unwrap_or_default()
    }

    pub fn write_conversations(&self, conversations: &[Conversation]) {
        self.write_slot(CONVERSATIONS_SLOT, conversations);
    }

    pub fn read_messages(&self, conversation_id: Option<&str>) -> Vec<Message> {
        let messages: Vec<Message> = self.read_slot(MESSAGES_SLOT).unwrap_or_default();
        match conversation_id {
            Some(id) => messages
                .into_iter()
                .filter(|m| m.conversation_id == id)
                .collect(),
            None => messages,
        }
    }

    pub fn write_messages(&self, messages: &[Message]) {
        self.write_slot(MESSAGES_SLOT, messages);
    }

    /// Read and decode one slot. `None` when absent, unreadable or unparsable.
    pub fn read_slot<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.load_slot(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Error reading {} from local cache: {:#}", key, e);
                None
            }
        }
    }

    /// Like `read_slot`, but a failing medium is an error rather than an
    /// empty slot. Read-modify-write paths use this so a failed read never
    /// replaces the stored collection.
    pub fn load_slot<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(medium) = self.medium.as_ref() else {
            return Ok(None);
        };
        let Some(raw) = medium.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::error!("Error parsing {} from local cache: {}", key, e);
                Ok(None)
            }
        }
    }

    pub fn load_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.load_slot(CONVERSATIONS_SLOT)?.unwrap_or_default())
    }

    pub fn load_messages(&self) -> Result<Vec<Message>> {
        Ok(self.load_slot(MESSAGES_SLOT)?.unwrap_or_default())
    }

    /// Replace one slot with the serialized value in a single store operation.
    pub fn write_slot<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let Some(medium) = self.medium.as_ref() else {
            return;
        };
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize {} for local cache: {}", key, e);
                return;
            }
        };
        if let Err(e) = medium.set(key, &json) {
            tracing::error!("Failed to write {} to local cache: {}", key, e);
        }
    }
}
