//! Arrival-token codec.
//!
//! Tokens are short deterministic codes presented at the studio door:
//! `MF-ARR-{4 id-derived}-{4 hash-derived}`. The hash segment is FNV-1a
//! 32-bit over `"{reservation_id}:{version}"`, so rotating the version
//! yields a fresh token without any stored secret. Tokens are not
//! confidential; only uniqueness within the reservation-version space
//! matters.

use chrono::{DateTime, Duration, Utc};
use subtle::ConstantTimeEq;

const TOKEN_PREFIX: &str = "MF-ARR";
const SEGMENT_LEN: usize = 4;
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Hours an arrival token stays valid past issuance, at minimum.
pub const TOKEN_VALIDITY_HOURS: i64 = 36;

// ---------------------------------------------------------------------------
// FNV-1a
// ---------------------------------------------------------------------------

/// FNV-1a 32-bit over the input bytes.
pub fn fnv1a32(input: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Format the arrival token for a reservation at a given token version.
pub fn format_arrival_token(reservation_id: &str, version: u32) -> String {
    format!(
        "{}-{}-{}",
        TOKEN_PREFIX,
        id_segment(reservation_id),
        hash_segment(reservation_id, version)
    )
}

/// Last four alphanumerics of the reservation id, uppercased and
/// left-padded with `0`.
fn id_segment(reservation_id: &str) -> String {
    let alnum: Vec<char> = reservation_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let tail: String = alnum
        .iter()
        .rev()
        .take(SEGMENT_LEN)
        .rev()
        .collect();
    format!("{:0>width$}", tail, width = SEGMENT_LEN)
}

/// Base-36 rendering of `fnv1a32("{id}:{version}")`, kept to the final
/// four characters and left-padded with `0`.
fn hash_segment(reservation_id: &str, version: u32) -> String {
    let mut value = fnv1a32(&format!("{reservation_id}:{version}"));
    let mut digits = Vec::new();
    if value == 0 {
        digits.push(b'0');
    }
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    let encoded: String = digits.iter().map(|b| *b as char).collect();
    let tail: String = encoded
        .chars()
        .rev()
        .take(SEGMENT_LEN)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{:0>width$}", tail, width = SEGMENT_LEN)
}

// ---------------------------------------------------------------------------
// Lookup keys
// ---------------------------------------------------------------------------

/// Normalize a presented token into its lookup key: uppercase ASCII
/// alphanumerics only, separators dropped.
pub fn normalize_lookup_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Constant-time comparison of two tokens after normalization.
pub fn tokens_match(presented: &str, stored: &str) -> bool {
    let a = normalize_lookup_key(presented);
    let b = normalize_lookup_key(stored);
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Expiry for a freshly issued token: `now + 36h`, extended to the end
/// of the preferred window when that is later.
pub fn arrival_token_expiry(
    now: DateTime<Utc>,
    preferred_latest: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let floor = now + Duration::hours(TOKEN_VALIDITY_HOURS);
    match preferred_latest {
        Some(latest) if latest > floor => latest,
        _ => floor,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a32_known_vectors() {
        // Standard FNV-1a test vectors.
        assert_eq!(fnv1a32(""), 0x811c9dc5);
        assert_eq!(fnv1a32("a"), 0xe40c292c);
        assert_eq!(fnv1a32("foobar"), 0xbf9cf968);
    }

    #[test]
    fn token_shape() {
        let token = format_arrival_token("res-1a2b3c", 1);
        let parts: Vec<&str> = token.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "MF");
        assert_eq!(parts[1], "ARR");
        assert_eq!(parts[2].len(), 4);
        assert_eq!(parts[3].len(), 4);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn short_ids_are_left_padded() {
        let token = format_arrival_token("a1", 1);
        assert!(token.starts_with("MF-ARR-00A1-"));
    }

    #[test]
    fn version_changes_token() {
        let v1 = format_arrival_token("res-abc123", 1);
        let v2 = format_arrival_token("res-abc123", 2);
        assert_ne!(v1, v2);
        // The id segment stays stable across rotations.
        assert_eq!(&v1[..12], &v2[..12]);
    }

    #[test]
    fn lookup_key_drops_separators_and_uppercases() {
        assert_eq!(normalize_lookup_key("MF-ARR-C123-9XYZ"), "MFARRC1239XYZ");
        assert_eq!(normalize_lookup_key("mf arr c123 9xyz"), "MFARRC1239XYZ");
    }

    #[test]
    fn roundtrip_format_then_normalize() {
        for version in 1..=5u32 {
            let token = format_arrival_token("res-55aa77", version);
            let key = normalize_lookup_key(&token);
            assert_eq!(key, normalize_lookup_key(&token.to_lowercase()));
            assert!(tokens_match(&token, &token.replace('-', " ")));
        }
    }

    #[test]
    fn mismatched_tokens_do_not_match() {
        let a = format_arrival_token("res-1", 1);
        let b = format_arrival_token("res-1", 2);
        assert!(!tokens_match(&a, &b));
    }

    #[test]
    fn expiry_is_at_least_36_hours() {
        let now = Utc::now();
        let expiry = arrival_token_expiry(now, None);
        assert_eq!(expiry, now + Duration::hours(36));

        let later = now + Duration::hours(100);
        assert_eq!(arrival_token_expiry(now, Some(later)), later);

        let earlier = now + Duration::hours(2);
        assert_eq!(
            arrival_token_expiry(now, Some(earlier)),
            now + Duration::hours(36)
        );
    }
}
