//! Text processing utilities.

/// True when the fragment carries no visible characters.
pub fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

/// Truncate `text` to at most `max_chars` characters, appending an ellipsis
/// when anything was cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
