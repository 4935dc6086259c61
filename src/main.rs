mod config;
mod models;
mod providers;
mod repl;
mod services;

use std::sync::Arc;

use anyhow::Result;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use providers::azure::AzureOpenAiProvider;
use providers::ChatCompletion;
use repl::Repl;
use services::remote::RemoteStore;
use services::{
    ChatService, ConversationStore, LocalCache, PostgrestRemote, SettingsService, SqliteMedium,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    let cache = open_local_cache(&config);
    let remote = connect_remote(&config);

    let store = Arc::new(ConversationStore::new(cache.clone(), remote).with_user_id(&config.user_id));
    if store.has_remote() {
        tracing::info!("Mirroring conversations to {}", remote_host(&config));
    }

    let gateway = Arc::new(AzureOpenAiProvider::new(config.gateway.clone()));
    tracing::info!("Chatting with deployment {}", gateway.model_name());
    let chat = ChatService::new(store.clone(), gateway, SettingsService::load(&cache));

    let mut repl = Repl::new(store.clone(), chat, cache);
    let result = repl
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await;

    store.flush().await;
    result
}

/// Without a usable data directory the session runs against an empty,
/// write-discarding cache.
fn open_local_cache(config: &AppConfig) -> LocalCache {
    let Some(path) = config.db_path() else {
        tracing::warn!("No data directory found; local cache disabled");
        return LocalCache::detached();
    };
    let cache = match SqliteMedium::open(&path) {
        Ok(medium) => LocalCache::new(Arc::new(medium)),
        Err(e) => {
            tracing::warn!("Failed to open local cache at {}: {:#}", path.display(), e);
            LocalCache::detached()
        }
    };
    if !cache.is_detached() {
        tracing::info!("Local cache at {}", path.display());
    }
    cache
}

fn remote_host(config: &AppConfig) -> String {
    config
        .remote
        .as_ref()
        .and_then(|remote| url::Url::parse(&remote.url).ok())
        .and_then(|url| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "remote store".to_string())
}

fn connect_remote(config: &AppConfig) -> Option<Arc<dyn RemoteStore>> {
    let Some(remote_config) = &config.remote else {
        tracing::info!("Remote store not configured; running local-only");
        return None;
    };
    match PostgrestRemote::new(remote_config) {
        Ok(remote) => Some(Arc::new(remote)),
        Err(e) => {
            tracing::warn!("Remote store disabled: {}", e);
            None
        }
    }
}
