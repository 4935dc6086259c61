use crate::config::DEFAULT_CONVERSATION_TITLE;

const TITLE_CHARS: usize = 50;

/// Trimmed title, or the default title when nothing is left.
pub fn normalize_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        DEFAULT_CONVERSATION_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Title for a conversation started by `text`: its first 50 characters,
/// followed by "..." when the text was longer.
pub fn title_from_message(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(TITLE_CHARS) {
        Some((boundary, _)) => format!("{}...", &text[..boundary]),
        None => normalize_title(text),
    }
}
