use serde::{Deserialize, Serialize};

use super::local_cache::LocalCache;
use crate::config::SETTINGS_SLOT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
            system_prompt: None,
        }
    }
}

pub struct SettingsService;

impl SettingsService {
    pub fn load(cache: &LocalCache) -> ChatSettings {
        cache.read_slot(SETTINGS_SLOT).unwrap_or_default()
    }

    pub fn save(cache: &LocalCache, settings: &ChatSettings) {
        cache.write_slot(SETTINGS_SLOT, settings);
    }
}
