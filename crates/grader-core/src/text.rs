//! Small string helpers shared by the runner, judge prompts and reports.

/// Longest prefix of `s` that is at most `max_bytes` long and ends on a
/// char boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncate and append a marker saying how much was dropped.
pub fn excerpt(s: &str, max_bytes: usize) -> String {
    let kept = truncate_utf8(s, max_bytes);
    if kept.len() == s.len() {
        return s.to_string();
    }
    format!("{kept}\n[... truncated {} bytes]", s.len() - kept.len())
}
