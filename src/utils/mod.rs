pub mod candle;
pub mod db_connect;
pub mod env;
pub mod merge_config;
pub mod progress_config;

/// Truncates `text` to at most `max_chars` characters for log lines.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
