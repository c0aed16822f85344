//! Sanitizers for text that leaves the process.

/// Longest error message ever broadcast to clients.
pub const MAX_MESSAGE_LEN: usize = 240;

/// Fallback used when a failure carries no usable text.
pub const GENERIC_FAILURE: &str = "Conversion failed";

/// Reduce an arbitrary failure description to a single short line.
///
/// Only the first non-empty line survives (stack traces and nested causes
/// are dropped), control characters are stripped and the result is capped
/// at [`MAX_MESSAGE_LEN`] characters.
pub fn sanitize_message(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    let cleaned: String = line
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_MESSAGE_LEN)
        .collect();

    if cleaned.trim().is_empty() {
        GENERIC_FAILURE.to_string()
    } else {
        cleaned.trim().to_string()
    }
}

/// Reduce a client-supplied file name to a safe base name.
///
/// Directory components are dropped and anything outside
/// `[A-Za-z0-9._ -]` becomes `_`. Returns `None` when nothing usable is
/// left.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}
