pub mod azure;
pub mod retry;
pub mod traits;
pub mod types;

pub use traits::ChatCompletion;
pub use types::{ChatMessage, ChatRequest, ProviderError};
