//! Merge-on-read reconciliation of the local cache and the remote store.
//!
//! Rows are collected into an insertion-ordered map keyed by `id`, seeded
//! with the local rows. An overriding remote row takes over the slot of the
//! local row it replaces; remote-only rows are appended in remote order.
//! The final stable sort therefore breaks ties local-before-remote.

use std::collections::HashMap;

use crate::models::{Conversation, Message};

struct OrderedById<T> {
    index: HashMap<String, usize>,
    rows: Vec<T>,
}

impl<T> OrderedById<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            rows: Vec::with_capacity(capacity),
        }
    }

    /// Insert `row`, or hand the existing row to `resolve` to decide whether it is replaced.
    fn upsert(&mut self, id: &str, row: T, resolve: impl FnOnce(&T, T) -> Option<T>) {
        match self.index.get(id) {
            Some(&slot) => {
                if let Some(winner) = resolve(&self.rows[slot], row) {
                    self.rows[slot] = winner;
                }
            }
            None => {
                self.index.insert(id.to_string(), self.rows.len());
                self.rows.push(row);
            }
        }
    }

    fn into_rows(self) -> Vec<T> {
        self.rows
    }
}

/// Last-writer-wins by `updated_at`; a remote row wins ties.
///
/// The advisory `message_count` only lives in the local cache, so a winning
/// remote row inherits it from the local row it replaces.
/// Result is ordered by `updated_at`, newest first.
pub fn merge_conversations(local: Vec<Conversation>, remote: Vec<Conversation>) -> Vec<Conversation> {
    let mut merged = OrderedById::with_capacity(local.len() + remote.len());

    for conv in local {
        let id = conv.id.clone();
        merged.upsert(&id, conv, |_, incoming| Some(incoming));
    }

    for conv in remote {
        let id = conv.id.clone();
        merged.upsert(&id, conv, |existing, mut incoming| {
            if incoming.updated_at >= existing.updated_at {
                if incoming.message_count.is_none() {
                    incoming.message_count = existing.message_count;
                }
                Some(incoming)
            } else {
                None
            }
        });
    }

    let mut rows = merged.into_rows();
    rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    rows
}

/// Messages are immutable, so a remote row found by id always replaces the
/// local copy without comparing timestamps.
/// Result is ordered by `created_at`, oldest first.
pub fn merge_messages(local: Vec<Message>, remote: Vec<Message>) -> Vec<Message> {
    let mut merged = OrderedById::with_capacity(local.len() + remote.len());

    for msg in local {
        let id = msg.id.clone();
        merged.upsert(&id, msg, |_, incoming| Some(incoming));
    }

    for msg in remote {
        let id = msg.id.clone();
        merged.upsert(&id, msg, |_, incoming| Some(incoming));
    }

    let mut rows = merged.into_rows();
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
    }

    fn conv(id: &str, title: &str, updated: u32) -> Conversation {
        Conversation {
            id: id.to_string(),
            title: title.to_string(),
            user_id: "u1".to_string(),
            created_at: at(0),
            updated_at: at(updated),
            message_count: None,
        }
    }

    fn msg(id: &str, content: &str, created: u32) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            role: Role::User,
            content: content.to_string(),
            metadata: Default::default(),
            created_at: at(created),
        }
    }

    fn ids<T, F: Fn(&T) -> &str>(rows: &[T], id: F) -> Vec<String> {
        rows.iter().map(|r| id(r).to_string()).collect()
    }

    #[test]
    fn identical_sources_merge_to_the_same_set() {
        let rows = vec![conv("a", "A", 3), conv("b", "B", 2), conv("c", "C", 1)];

        let merged = merge_conversations(rows.clone(), rows.clone());
        assert_eq!(merged, rows);

        let messages = vec![msg("m1", "x", 1), msg("m2", "y", 2)];
        assert_eq!(merge_messages(messages.clone(), messages.clone()), messages);
    }

    #[test]
    fn merge_is_independent_of_which_side_holds_a_row() {
        let a = vec![conv("a", "A", 3), conv("b", "B", 2)];
        let b = vec![conv("b", "B", 2), conv("c", "C", 1)];

        let left = merge_conversations(a.clone(), b.clone());
        let right = merge_conversations(b, a);
        assert_eq!(left, right);
        assert_eq!(ids(&left, |c| c.id.as_str()), vec!["a", "b", "c"]);
    }

    #[test]
    fn newer_remote_conversation_wins() {
        let mut local = conv("c1", "Local title", 1);
        local.message_count = Some(4);
        let remote = conv("c1", "Remote title", 2);

        let merged = merge_conversations(vec![local], vec![remote]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Remote title");
        assert_eq!(merged[0].message_count, Some(4));
    }

    #[test]
    fn older_remote_conversation_loses() {
        let local = conv("c1", "Local title", 5);
        let remote = conv("c1", "Remote title", 2);

        let merged = merge_conversations(vec![local], vec![remote]);
        assert_eq!(merged[0].title, "Local title");
    }

    #[test]
    fn equal_timestamps_prefer_remote() {
        let merged = merge_conversations(vec![conv("c1", "Local", 2)], vec![conv("c1", "Remote", 2)]);
        assert_eq!(merged[0].title, "Remote");
    }

    #[test]
    fn conversations_sort_newest_first_with_local_ties_first() {
        let local = vec![conv("l1", "L1", 1), conv("tie-local", "T", 5)];
        let remote = vec![conv("tie-remote", "T", 5), conv("r1", "R1", 9)];

        let merged = merge_conversations(local, remote);
        assert_eq!(
            ids(&merged, |c| c.id.as_str()),
            vec!["r1", "tie-local", "tie-remote", "l1"]
        );
    }

    #[test]
    fn remote_message_replaces_local_copy_regardless_of_time() {
        let local = msg("m1", "local copy", 5);
        let remote = msg("m1", "remote copy", 1);

        let merged = merge_messages(vec![local], vec![remote]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "remote copy");
    }

    #[test]
    fn messages_sort_oldest_first() {
        let local = vec![msg("m3", "third", 3), msg("m1", "first", 1)];
        let remote = vec![msg("m2", "second", 2)];

        let merged = merge_messages(local, remote);
        assert_eq!(ids(&merged, |m| m.id.as_str()), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn message_ties_keep_local_before_remote() {
        let local = vec![msg("local", "a", 1)];
        let remote = vec![msg("remote", "b", 1)];

        let merged = merge_messages(local, remote);
        assert_eq!(ids(&merged, |m| m.id.as_str()), vec!["local", "remote"]);
    }

    #[test]
    fn empty_sources_merge_to_empty() {
        assert!(merge_conversations(Vec::new(), Vec::new()).is_empty());
        assert!(merge_messages(Vec::new(), Vec::new()).is_empty());
    }
}
