//! Issue ID generation: SHA256 + base36 hash IDs, and sequential IDs.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Base36 alphabet (0-9, a-z).
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// How IDs are minted for a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdMode {
    /// Short content hash suffix (default).
    #[default]
    Hash,
    /// Monotonic counter suffix.
    Sequential,
}

/// Converts a byte slice to a base36 string of the specified length.
pub fn encode_base36(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(36u32);
    let zero = BigUint::zero();

    // Build the string in reverse.
    let mut chars: Vec<u8> = Vec::with_capacity(length);
    while num > zero {
        let rem = &num % &base;
        num /= &base;
        // rem < 36, so it fits in a single u32 digit.
        let digits = rem.to_u32_digits();
        let i = if digits.is_empty() { 0 } else { digits[0] as usize };
        chars.push(BASE36_ALPHABET[i]);
    }
    chars.reverse();

    let mut s = String::from_utf8(chars).expect("base36 chars are valid UTF-8");

    if s.len() < length {
        let padding = "0".repeat(length - s.len());
        s = padding + &s;
    }
    // Keep least significant digits when too long.
    if s.len() > length {
        s = s[s.len() - length..].to_owned();
    }

    s
}

/// Creates a hash-based ID for an issue.
///
/// The suffix is a base36 encoding of the leading bytes of
/// `sha256(title|description|actor|created_at_nanos|nonce)`. The `length`
/// parameter is expected to be 3-8; other values fall back to a 3-char width.
pub fn generate_hash_id(
    prefix: &str,
    title: &str,
    description: &str,
    actor: &str,
    created_at: DateTime<Utc>,
    length: usize,
    nonce: i32,
) -> String {
    let content = format!(
        "{}|{}|{}|{}|{}",
        title,
        description,
        actor,
        created_at.timestamp_nanos_opt().unwrap_or(0),
        nonce
    );

    let hash = Sha256::digest(content.as_bytes());

    let num_bytes = match length {
        3 => 2,
        4 => 3,
        5 | 6 => 4,
        7 | 8 => 5,
        _ => 2,
    };

    let suffix = encode_base36(&hash[..num_bytes], length.clamp(3, 8));
    format!("{}-{}", prefix, suffix)
}

/// Creates a sequential ID from a counter value.
pub fn generate_sequential_id(prefix: &str, counter: u64) -> String {
    format!("{}-{}", prefix, counter)
}

/// Computes the collision probability via the birthday paradox approximation:
/// `P(collision) ~ 1 - e^(-n^2 / 2N)` with `N = 36^length`.
fn collision_probability(num_issues: usize, id_length: usize) -> f64 {
    let total: f64 = 36.0_f64.powi(id_length as i32);
    let exponent = -(num_issues as f64).powi(2) / (2.0 * total);
    1.0 - exponent.exp()
}

/// Determines the shortest hash length that keeps the collision probability
/// at or below `max_collision_prob` for the current issue count.
pub fn compute_adaptive_length(
    num_issues: usize,
    min_length: usize,
    max_length: usize,
    max_collision_prob: f64,
) -> usize {
    for length in min_length..=max_length {
        if collision_probability(num_issues, length) <= max_collision_prob {
            return length;
        }
    }
    max_length
}

/// Default adaptive ID configuration constants.
pub mod adaptive_defaults {
    /// Default collision probability threshold (25%).
    pub const MAX_COLLISION_PROB: f64 = 0.25;
    /// Default minimum hash length.
    pub const MIN_LENGTH: usize = 3;
    /// Default maximum hash length.
    pub const MAX_LENGTH: usize = 8;
    /// Nonce attempts before giving up on a unique hash ID.
    pub const MAX_NONCES: i32 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_base36_basic() {
        assert_eq!(encode_base36(&[], 4), "0000");
    }

    #[test]
    fn encode_base36_length() {
        assert_eq!(encode_base36(&[0xFF, 0xFF], 4).len(), 4);
        assert_eq!(encode_base36(&[0xFF, 0xFF, 0xFF, 0xFF], 3).len(), 3);
    }

    #[test]
    fn generate_hash_id_format() {
        let ts = chrono::Utc::now();
        let id = generate_hash_id("br", "Test Title", "desc", "alice", ts, 6, 0);
        assert!(id.starts_with("br-"));
        assert_eq!(id.len(), "br-".len() + 6);
    }

    #[test]
    fn generate_hash_id_deterministic() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id1 = generate_hash_id("br", "Title", "Desc", "alice", ts, 6, 0);
        let id2 = generate_hash_id("br", "Title", "Desc", "alice", ts, 6, 0);
        assert_eq!(id1, id2);
    }

    #[test]
    fn generate_hash_id_nonce_changes_output() {
        let ts = chrono::Utc::now();
        let id1 = generate_hash_id("br", "Title", "Desc", "alice", ts, 6, 0);
        let id2 = generate_hash_id("br", "Title", "Desc", "alice", ts, 6, 1);
        assert_ne!(id1, id2);
    }

    #[test]
    fn sequential_ids() {
        assert_eq!(generate_sequential_id("proj", 1), "proj-1");
        assert_eq!(generate_sequential_id("proj", 42), "proj-42");
    }

    #[test]
    fn adaptive_length_small_repo() {
        assert_eq!(compute_adaptive_length(10, 3, 8, 0.25), 3);
    }

    #[test]
    fn adaptive_length_large_repo() {
        assert!(compute_adaptive_length(100_000, 3, 8, 0.25) >= 6);
    }

    #[test]
    fn adaptive_length_capped_at_max() {
        assert_eq!(compute_adaptive_length(10_000_000, 3, 8, 0.01), 8);
    }
}
