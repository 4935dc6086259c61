use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ANONYMOUS_USER_ID;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default = "anonymous_user")]
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Advisory count kept in the local cache only; never sent to the remote store.
    #[serde(rename = "messageCount", default, skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
}

fn anonymous_user() -> String {
    ANONYMOUS_USER_ID.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_row_without_owner_gets_anonymous_user() {
        let raw = r#"{"id":"c1","title":"Trip","created_at":"2024-03-01T10:00:00Z","updated_at":"2024-03-01T10:05:00Z","messageCount":2}"#;
        let conv: Conversation = serde_json::from_str(raw).unwrap();
        assert_eq!(conv.user_id, ANONYMOUS_USER_ID);
        assert_eq!(conv.message_count, Some(2));
    }

    #[test]
    fn message_count_is_omitted_when_unknown() {
        let raw = r#"{"id":"c1","title":"Trip","user_id":"u","created_at":"2024-03-01T10:00:00Z","updated_at":"2024-03-01T10:00:00Z"}"#;
        let conv: Conversation = serde_json::from_str(raw).unwrap();
        assert_eq!(conv.message_count, None);

        let json = serde_json::to_value(&conv).unwrap();
        assert!(json.get("messageCount").is_none());
    }
}
