//! Utility functions for IRC line handling.

/// Truncates a string to at most `max_bytes` bytes without breaking
/// a multi-byte UTF-8 codepoint at the end.
///
/// # Examples
///
/// ```
/// use slirc_engine::util::truncate_utf8_safe;
///
/// assert_eq!(truncate_utf8_safe("hello world", 5), "hello");
///
/// // Multi-byte chars are not split
/// let emoji = "Hello 👋 World";
/// assert_eq!(truncate_utf8_safe(emoji, 8), "Hello ");
///
/// assert_eq!(truncate_utf8_safe("hi", 10), "hi");
/// ```
#[inline]
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// Returns the text of a CTCP `ACTION`, or `None` if `message` is not one.
///
/// ```
/// use slirc_engine::util::ctcp_action;
///
/// assert_eq!(ctcp_action("\x01ACTION waves\x01"), Some("waves"));
/// assert_eq!(ctcp_action("waves"), None);
/// ```
pub fn ctcp_action(message: &str) -> Option<&str> {
    message
        .strip_prefix("\x01ACTION ")
        .and_then(|rest| rest.strip_suffix('\x01'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_exact_boundary() {
        assert_eq!(truncate_utf8_safe("abc", 3), "abc");
        assert_eq!(truncate_utf8_safe("abc", 0), "");
    }

    #[test]
    fn test_truncate_two_byte_chars() {
        // "é" is 2 bytes; cutting at 3 would split the second one
        assert_eq!(truncate_utf8_safe("éé", 3), "é");
    }

    #[test]
    fn test_ctcp_action_requires_terminator() {
        assert_eq!(ctcp_action("\x01ACTION waves"), None);
        assert_eq!(ctcp_action("\x01ACTION \x01"), Some(""));
        assert_eq!(ctcp_action("\x01VERSION\x01"), None);
    }
}
