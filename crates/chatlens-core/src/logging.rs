//! Logging helpers that keep key material and message text out of logs.
//!
//! Media keys, keystreams and search keywords pass through the engine on
//! every request. These wrappers let `tracing` fields reference them
//! without printing their contents.

use std::fmt;

/// Media key shown as its first and last two characters.
///
/// Short or non-ASCII keys are hidden entirely.
#[derive(Clone, Copy)]
pub struct RedactedKey<'a>(pub &'a str);

impl fmt::Display for RedactedKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            key if key.len() > 8 && key.is_ascii() => {
                write!(f, "{}..{}", &key[..2], &key[key.len() - 2..])
            }
            _ => f.write_str("[REDACTED KEY]"),
        }
    }
}

impl fmt::Debug for RedactedKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RedactedKey({})", self)
    }
}

/// Buffer shown by size only.
#[derive(Clone, Copy)]
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl fmt::Display for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl fmt::Debug for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Words that mark free text as unsafe to log.
const SENSITIVE_MARKERS: &[&str] = &["password", "passwd", "secret", "key", "token", "pin"];

/// Longest free-text prefix written to logs.
const LOGGED_TEXT_CHARS: usize = 16;

/// Whether free text mentions a credential.
pub fn appears_sensitive(s: &str) -> bool {
    let folded = s.to_lowercase();
    SENSITIVE_MARKERS.iter().any(|m| folded.contains(m))
}

/// Free text (e.g. a search keyword) in a form fit for logs: replaced
/// when it looks sensitive, otherwise cut to a short prefix.
pub fn sanitize_for_log(s: &str) -> String {
    if appears_sensitive(s) {
        return "[REDACTED]".to_string();
    }
    match s.char_indices().nth(LOGGED_TEXT_CHARS) {
        Some((cut, _)) => format!("{}…", &s[..cut]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shows_edges_only() {
        assert_eq!(RedactedKey("2851934502318").to_string(), "28..18");
        assert_eq!(format!("{:?}", RedactedKey("2851934502318")), "RedactedKey(28..18)");
        assert_eq!(RedactedKey("1234").to_string(), "[REDACTED KEY]");
        assert_eq!(RedactedKey("密钥密钥密钥密钥密钥").to_string(), "[REDACTED KEY]");
    }

    #[test]
    fn test_bytes_show_length() {
        assert_eq!(RedactedBytes(&[0u8; 42]).to_string(), "[42 bytes]");
    }

    #[test]
    fn test_sensitive_markers() {
        assert!(appears_sensitive("my PIN is"));
        assert!(appears_sensitive("media key"));
        assert!(!appears_sensitive("lunch on friday"));
    }

    #[test]
    fn test_keyword_sanitizing() {
        assert_eq!(sanitize_for_log("lunch"), "lunch");
        assert_eq!(sanitize_for_log("the password is"), "[REDACTED]");
        assert_eq!(sanitize_for_log("abcdefghijklmnopqrstuvwxyz"), "abcdefghijklmnop…");
        assert_eq!(sanitize_for_log("一二三四五六七八九十一二三四五六七"), "一二三四五六七八九十一二三四五六…");
    }
}
