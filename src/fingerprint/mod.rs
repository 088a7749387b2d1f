//! Deterministic fingerprints of a post: structural (LIP), text-full,
//! text-core and media. Used by the filter pipeline's duplicate-detection
//! stages (priorities 10, 40, 41, 42).

use serde::{Deserialize, Serialize};

/// Bumped whenever normalization rules change. A stored post whose
/// `fingerprint_version` is older than this needs re-derivation before its
/// fingerprints can be trusted for comparison.
pub const CURRENT_FINGERPRINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub lip: String,
    pub text_full: String,
    pub text_core: String,
    pub media: Vec<String>,
    pub version: u32,
}

/// Minimal view of a post's raw fields needed to compute fingerprints.
/// Deliberately decoupled from the persisted `Post` model so this module
/// has no dependency on the store.
pub struct FingerprintInput<'a> {
    pub owner_id: i64,
    pub post_id: i64,
    pub text: &'a str,
    pub media_ids: &'a [String],
}

pub fn fingerprint(input: &FingerprintInput) -> Fingerprints {
    let normalized = normalize_text(input.text);
    Fingerprints {
        lip: lip(input.owner_id, input.post_id),
        text_full: hash_text(&normalized),
        text_core: hash_text(&text_core(&normalized)),
        media: media_fingerprint(input.media_ids),
        version: CURRENT_FINGERPRINT_VERSION,
    }
}

pub fn lip(owner_id: i64, post_id: i64) -> String {
    format!("{owner_id}_{post_id}")
}

/// Lowercase, collapse whitespace, strip zero-width/control characters, keep
/// only Cyrillic, Latin, digits, and whitespace.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if is_zero_width_or_control(ch) {
            continue;
        }
        for lower in ch.to_lowercase() {
            let keep = lower.is_whitespace()
                || lower.is_ascii_digit()
                || is_cyrillic(lower)
                || lower.is_ascii_alphabetic();
            if !keep {
                continue;
            }
            if lower.is_whitespace() {
                if last_was_space {
                    continue;
                }
                out.push(' ');
                last_was_space = true;
            } else {
                out.push(lower);
                last_was_space = false;
            }
        }
    }
    out.trim().to_string()
}

fn is_zero_width_or_control(ch: char) -> bool {
    matches!(ch, '\u{200B}'..='\u{200F}' | '\u{FEFF}' | '\u{202A}'..='\u{202E}')
        || (ch.is_control() && ch != '\n' && ch != ' ' && ch != '\t')
}

fn is_cyrillic(ch: char) -> bool {
    matches!(ch, '\u{0400}'..='\u{04FF}')
}

/// Middle 20–70% slice (half-open) of the text, used for near-duplicate
/// detection that's robust to boilerplate headers/footers. Falls back to the
/// full text when it's too short to slice meaningfully.
pub fn text_core(normalized: &str) -> String {
    let chars: Vec<char> = normalized.chars().collect();
    let len = chars.len();
    if len < 50 {
        return normalized.to_string();
    }
    let start = (len as f64 * 0.20).floor() as usize;
    let end = (len as f64 * 0.70).floor() as usize;
    chars[start..end].iter().collect()
}

/// Sorted set of photo/video attachment ids; other attachment types don't
/// contribute to the media fingerprint.
pub fn media_fingerprint(media_ids: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = media_ids.to_vec();
    ids.sort();
    ids.dedup();
    ids
}

/// 64-bit FNV-1a over normalized UTF-8 bytes, rendered as lowercase hex.
/// Cheap, deterministic and restart-stable; no cryptographic strength is
/// needed for a near-duplicate signal.
pub fn hash_text(normalized: &str) -> String {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for byte in normalized.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{hash:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lip_is_owner_underscore_post() {
        assert_eq!(lip(-100, 42), "-100_42");
    }

    #[test]
    fn normalize_collapses_whitespace_and_strips_control_chars() {
        let input = "Hello\u{200B}   World\n\tTest";
        let normalized = normalize_text(input);
        assert_eq!(normalized, "hello world test");
    }

    #[test]
    fn normalize_keeps_cyrillic() {
        let normalized = normalize_text("Привет мир");
        assert_eq!(normalized, "привет мир");
    }

    #[test]
    fn short_text_core_is_full_text() {
        let text = "short text";
        assert_eq!(text_core(text), text);
    }

    #[test]
    fn text_core_is_middle_slice() {
        let text: String = ('a'..='z').cycle().take(100).collect();
        let core = text_core(&text);
        let chars: Vec<char> = text.chars().collect();
        let expected: String = chars[20..70].iter().collect();
        assert_eq!(core, expected);
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_text("abc"), hash_text("abc"));
        assert_ne!(hash_text("abc"), hash_text("abd"));
    }

    #[test]
    fn fingerprint_stable_under_equivalent_whitespace() {
        let a = fingerprint(&FingerprintInput {
            owner_id: -1,
            post_id: 1,
            text: "Hello   World",
            media_ids: &[],
        });
        let b = fingerprint(&FingerprintInput {
            owner_id: -1,
            post_id: 1,
            text: "Hello World",
            media_ids: &[],
        });
        assert_eq!(a.text_full, b.text_full);
    }

    #[test]
    fn media_fingerprint_is_sorted_and_deduped() {
        let ids = vec!["b".to_string(), "a".to_string(), "a".to_string()];
        assert_eq!(media_fingerprint(&ids), vec!["a".to_string(), "b".to_string()]);
    }
}
