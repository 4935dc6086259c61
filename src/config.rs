use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Owner recorded on conversations when no authenticated user exists.
pub const ANONYMOUS_USER_ID: &str = "00000000-0000-0000-0000-000000000000";

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

pub const CONVERSATIONS_SLOT: &str = "chat-conversations";
pub const MESSAGES_SLOT: &str = "chat-messages";
pub const SETTINGS_SLOT: &str = "chat-settings";

const DEFAULT_API_VERSION: &str = "2024-12-01-preview";
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub service_key: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_key", &"***")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .field("api_version", &self.api_version)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub user_id: String,
    pub data_dir: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
    pub gateway: GatewayConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let remote = match (var("SUPABASE_URL"), var("SUPABASE_SERVICE_KEY")) {
            (Some(url), Some(service_key)) => {
                let timeout_secs = match var("TANDEM_REMOTE_TIMEOUT_SECS") {
                    Some(raw) => raw
                        .parse::<u64>()
                        .with_context(|| format!("Invalid TANDEM_REMOTE_TIMEOUT_SECS: {}", raw))?,
                    None => DEFAULT_REMOTE_TIMEOUT_SECS,
                };
                Some(RemoteConfig {
                    url,
                    service_key,
                    timeout: Duration::from_secs(timeout_secs),
                })
            }
            _ => None,
        };

        let gateway = GatewayConfig {
            api_key: var("AZURE_OPENAI_API_KEY").context("Missing env.AZURE_OPENAI_API_KEY")?,
            endpoint: var("AZURE_OPENAI_ENDPOINT").context("Missing env.AZURE_OPENAI_ENDPOINT")?,
            deployment: var("AZURE_OPENAI_DEPLOYMENT_NAME")
                .context("Missing env.AZURE_OPENAI_DEPLOYMENT_NAME")?,
            api_version: var("AZURE_OPENAI_API_VERSION")
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
        };

        let data_dir = var("TANDEM_DATA_DIR").map(PathBuf::from).or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .or_else(|| var("HOME").map(|home| PathBuf::from(home).join(".local/share")))
                .map(|dir| dir.join("tandem"))
        });

        Ok(Self {
            user_id: var("TANDEM_USER_ID").unwrap_or_else(|| ANONYMOUS_USER_ID.to_string()),
            data_dir,
            remote,
            gateway,
        })
    }

    pub fn db_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("tandem.db"))
    }
}
