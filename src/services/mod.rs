pub mod chat;
pub mod clock;
pub mod conversation;
pub mod database;
pub mod export;
pub mod ids;
pub mod local_cache;
pub mod merge;
pub mod remote;
pub mod settings;
pub mod store;

pub use chat::ChatService;
pub use database::SqliteMedium;
pub use local_cache::LocalCache;
pub use remote::PostgrestRemote;
pub use settings::SettingsService;
pub use store::ConversationStore;
