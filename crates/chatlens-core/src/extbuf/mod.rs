//! Group ext-buffer parsing.
//!
//! The ext-buffer attached to a group record is an undocumented,
//! length-prefixed serialization holding per-member attributes. The only
//! part we read is the member identifier / group nickname pair:
//!
//! ```text
//! 0x0A <varint L1> <L1 bytes: identifier> [0x12 <varint L2> <L2 bytes: nickname>]
//! ```
//!
//! There is no outer framing, so the parser scans byte by byte and only
//! accepts records that pass every validation heuristic. Anything it does
//! not recognise is skipped; malformed input yields an empty table.

pub mod varint;

pub use varint::{read_varint, MAX_VARINT_LEN};

use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Tag byte introducing an identifier field.
pub const TAG_IDENTIFIER: u8 = 0x0A;

/// Tag byte introducing a nickname field.
pub const TAG_NICKNAME: u8 = 0x12;

/// Largest identifier field accepted from the wire.
pub const MAX_IDENTIFIER_FIELD_LEN: usize = 96;

/// Bounds on a plausible identifier, in characters.
pub const MIN_IDENTIFIER_LEN: usize = 4;
/// Upper bound on a plausible identifier, in characters.
pub const MAX_IDENTIFIER_LEN: usize = 80;

/// Largest nickname accepted, in bytes after cleaning.
pub const MAX_NICKNAME_LEN: usize = 128;

/// Largest nickname field read from the wire. Control characters are
/// stripped afterwards, so the raw field may exceed [`MAX_NICKNAME_LEN`].
pub const MAX_NICKNAME_FIELD_LEN: usize = 4 * MAX_NICKNAME_LEN;

const CHATROOM_MARKER: &str = "@chatroom";

/// Lowercase index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Folded {
    Unique { identifier: String, nickname: String },
    Ambiguous,
}

/// Identifier → nickname lookup built from one ext-buffer.
///
/// Raw-case keys are always trusted. Lowercase keys are only answered
/// when every raw identifier folding onto them carries the same nickname.
#[derive(Debug, Clone, Default)]
pub struct NicknameTable {
    exact: HashMap<String, String>,
    folded: HashMap<String, Folded>,
}

impl NicknameTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an identifier/nickname pair. The first nickname seen for a
    /// raw identifier wins.
    pub fn insert(&mut self, identifier: &str, nickname: &str) {
        self.exact
            .entry(identifier.to_string())
            .or_insert_with(|| nickname.to_string());

        let lower = identifier.to_lowercase();
        match self.folded.get(&lower) {
            None => {
                self.folded.insert(
                    lower,
                    Folded::Unique {
                        identifier: identifier.to_string(),
                        nickname: nickname.to_string(),
                    },
                );
            }
            // Only a different raw identifier can make the key ambiguous; a
            // repeated one keeps its first nickname, as in the exact map.
            Some(Folded::Unique {
                identifier: seen,
                nickname: existing,
            }) if seen != identifier && existing != nickname => {
                self.folded.insert(lower, Folded::Ambiguous);
            }
            Some(_) => {}
        }
    }

    /// Exact-case lookup.
    pub fn get_exact(&self, identifier: &str) -> Option<&str> {
        self.exact.get(identifier).map(String::as_str)
    }

    /// Case-insensitive lookup; `None` when the lowercase key is ambiguous.
    pub fn get_folded(&self, identifier: &str) -> Option<&str> {
        match self.folded.get(&identifier.to_lowercase()) {
            Some(Folded::Unique { nickname, .. }) => Some(nickname.as_str()),
            _ => None,
        }
    }

    /// Exact match first, then an unambiguous lowercase match.
    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.get_exact(identifier)
            .or_else(|| self.get_folded(identifier))
    }

    /// Whether the key is answerable, raw or lowercase.
    pub fn contains_key(&self, identifier: &str) -> bool {
        self.get(identifier).is_some()
    }

    /// Resolve one logical member from its identifier variants.
    ///
    /// Every candidate is tried for an exact match before any candidate is
    /// tried case-insensitively.
    pub fn resolve<S: AsRef<str>>(&self, candidates: &[S]) -> Option<&str> {
        candidates
            .iter()
            .find_map(|c| self.get_exact(c.as_ref().trim()))
            .or_else(|| {
                candidates
                    .iter()
                    .find_map(|c| self.get_folded(c.as_ref().trim()))
            })
    }

    /// Number of raw identifiers.
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    /// Whether no record was accepted.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Iterate raw identifier/nickname pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.exact.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Scanner decision at one position.
enum Step {
    Accept {
        identifier: String,
        nickname: String,
        next: usize,
    },
    SkipTo(usize),
    Retry,
}

/// Extract group nicknames from an ext-buffer.
///
/// With a non-empty `candidates` set, only those identifiers
/// (case-insensitively) are extracted; other records are skipped whole.
pub fn parse_nicknames<I, S>(blob: &[u8], candidates: I) -> NicknameTable
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let wanted: HashSet<String> = candidates
        .into_iter()
        .map(|c| c.as_ref().trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();

    let mut table = NicknameTable::new();
    let mut pos = 0usize;

    while pos < blob.len() {
        match scan_record(blob, pos, &wanted) {
            Step::Accept {
                identifier,
                nickname,
                next,
            } => {
                table.insert(&identifier, &nickname);
                pos = next;
            }
            Step::SkipTo(next) => pos = next,
            Step::Retry => pos += 1,
        }
    }

    debug!(
        blob_len = blob.len(),
        candidates = wanted.len(),
        entries = table.len(),
        "parsed ext-buffer"
    );
    table
}

/// Read a tagged length-prefixed field at `pos`.
///
/// Returns the body and the offset just past it.
fn read_field(blob: &[u8], pos: usize, tag: u8, max_len: usize) -> Option<(&[u8], usize)> {
    if blob.get(pos) != Some(&tag) {
        return None;
    }
    let (len, consumed) = read_varint(blob, pos + 1)?;
    let len = usize::try_from(len).ok()?;
    if len == 0 || len > max_len {
        return None;
    }
    let start = pos + 1 + consumed;
    let end = start.checked_add(len)?;
    let body = blob.get(start..end)?;
    Some((body, end))
}

fn scan_record(blob: &[u8], pos: usize, wanted: &HashSet<String>) -> Step {
    let Some((id_bytes, id_end)) = read_field(blob, pos, TAG_IDENTIFIER, MAX_IDENTIFIER_FIELD_LEN)
    else {
        return Step::Retry;
    };
    let Ok(identifier) = std::str::from_utf8(id_bytes) else {
        return Step::Retry;
    };
    if !is_plausible_identifier(identifier) {
        return Step::Retry;
    }

    let nickname_field = read_field(blob, id_end, TAG_NICKNAME, MAX_NICKNAME_FIELD_LEN);
    let record_end = nickname_field.map_or(id_end, |(_, end)| end);

    if !wanted.is_empty() && !wanted.contains(&identifier.to_lowercase()) {
        return Step::SkipTo(record_end);
    }

    let Some((nick_bytes, nick_end)) = nickname_field else {
        return Step::SkipTo(id_end);
    };
    let Ok(raw_nickname) = std::str::from_utf8(nick_bytes) else {
        return Step::Retry;
    };
    let nickname = clean_nickname(raw_nickname);
    if !is_plausible_nickname(&nickname) {
        return Step::Retry;
    }

    Step::Accept {
        identifier: identifier.to_string(),
        nickname,
        next: nick_end,
    }
}

/// Whether `s` looks like an account identifier.
pub fn is_plausible_identifier(s: &str) -> bool {
    let len = s.chars().count();
    if !(MIN_IDENTIFIER_LEN..=MAX_IDENTIFIER_LEN).contains(&len) {
        return false;
    }
    let mut chars = s.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '-')) {
        return false;
    }
    !s.contains(CHATROOM_MARKER)
}

/// Strip control characters and surrounding whitespace.
pub fn clean_nickname(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Whether a cleaned string is a believable display nickname.
pub fn is_plausible_nickname(s: &str) -> bool {
    if s.is_empty() || s.len() > MAX_NICKNAME_LEN {
        return false;
    }
    if s.contains(CHATROOM_MARKER) {
        return false;
    }

    let mut chars = s.chars();
    if let (Some(only), None) = (chars.next(), chars.next()) {
        if !is_cjk(only) {
            return false;
        }
    }

    if looks_like_wxid(s) {
        return false;
    }

    !s.chars().all(|c| matches!(c, '"' | '\'' | '@' | '“' | '”' | '‘' | '’'))
}

/// `wxid_[a-z0-9_]+`, compared case-insensitively.
fn looks_like_wxid(s: &str) -> bool {
    let lower = s.to_lowercase();
    match lower.strip_prefix("wxid_") {
        Some(rest) => {
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        None => false,
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF       // kana
        | 0x3400..=0x4DBF     // CJK extension A
        | 0x4E00..=0x9FFF     // CJK unified
        | 0xAC00..=0xD7AF     // hangul
        | 0xF900..=0xFAFF     // compatibility ideographs
        | 0x20000..=0x2A6DF)  // extension B
}

/// Identifier variants for a single member: the trimmed raw name and, for
/// `wxid_` accounts carrying a 4-character directory suffix, the name with
/// that suffix removed.
pub fn candidate_variants(username: &str) -> Vec<String> {
    let raw = username.trim();
    if raw.is_empty() {
        return Vec::new();
    }

    let mut out = vec![raw.to_string()];
    if let Some(cleaned) = strip_account_suffix(raw) {
        if cleaned != raw {
            out.push(cleaned.to_string());
        }
    }
    out
}

fn strip_account_suffix(name: &str) -> Option<&str> {
    if !name.to_ascii_lowercase().starts_with("wxid_") {
        return None;
    }
    let idx = name.rfind('_')?;
    if idx < "wxid_".len() {
        return None;
    }
    let suffix = &name[idx + 1..];
    if suffix.len() == 4 && suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(&name[..idx])
    } else {
        None
    }
}
