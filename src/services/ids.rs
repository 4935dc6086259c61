use uuid::Uuid;

/// Generate a new record id: 36 lowercase hex characters in the hyphenated v4 layout.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
