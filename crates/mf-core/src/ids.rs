//! Deterministic document ids and request-id generation.
//!
//! Deterministic ids are SHA-256 over a namespacing prefix plus the
//! unit-separator-joined parts, rendered as a 32-character hex prefix.
//! The same `(prefix, parts)` pair always lands on the same document,
//! which is what makes create/reserve/pay replays idempotent.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use uuid::Uuid;

const ID_HEX_LEN: usize = 32;
const REQUEST_ID_BYTES: usize = 12;

fn hex_prefix(bytes: &[u8], chars: usize) -> String {
    let mut out = String::with_capacity(chars);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
        if out.len() >= chars {
            break;
        }
    }
    out.truncate(chars);
    out
}

/// SHA-256-derived deterministic id: `prefix` and each part joined by
/// the ASCII unit separator, hashed, hex-prefixed to 32 chars.
pub fn deterministic_id(prefix: &str, parts: &[&str]) -> String {
    let mut buf = String::from(prefix);
    for part in parts {
        buf.push('\u{1f}');
        buf.push_str(part);
    }
    let d = digest(&SHA256, buf.as_bytes());
    hex_prefix(d.as_ref(), ID_HEX_LEN)
}

/// Reservation document id for an owner-supplied `client_request_id`.
pub fn reservation_id(owner_uid: &str, client_request_id: &str) -> String {
    deterministic_id("reservation", &[owner_uid, client_request_id])
}

/// Agent reservation id derived from the quote.
pub fn agent_reservation_id(uid: &str, quote_id: &str) -> String {
    deterministic_id("agent-reservation", &[uid, quote_id])
}

/// Agent order id derived from the idempotency key (or, absent one, the
/// reservation id).
pub fn agent_order_id(uid: &str, key: &str) -> String {
    deterministic_id("agent-order", &[uid, key])
}

/// Idempotency-ledger slot id for a namespaced operation.
pub fn idempotency_id(operation_prefix: &str, actor_uid: &str, key: &str) -> String {
    deterministic_id(operation_prefix, &[actor_uid, key])
}

/// Evidence document id for a queue-fairness action.
pub fn fairness_evidence_id(reservation_id: &str, action: &str, request_id: &str) -> String {
    let qualifier = format!("{action}:{request_id}");
    deterministic_id("reservation-fairness", &[reservation_id, qualifier.as_str()])
}

/// Terms-acceptance record id for one `(uid, mode, credential, version)`.
pub fn terms_acceptance_id(uid: &str, mode: &str, credential: &str, version: &str) -> String {
    deterministic_id("agent-terms", &[uid, mode, credential, version])
}

/// Outbound request id: `req_` plus 12 random bytes, base64url without
/// padding. Falls back to a UUID-derived form if the system RNG fails.
pub fn generate_request_id() -> String {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; REQUEST_ID_BYTES];
    if rng.fill(&mut bytes).is_ok() {
        format!("req_{}", URL_SAFE_NO_PAD.encode(bytes))
    } else {
        format!("req_{}", Uuid::new_v4().as_simple())
    }
}

/// Generated piece id: `MF-RES-{6 id-derived}-{ordinal}{6 hash-derived}`.
pub fn generate_piece_id(reservation_id: &str, ordinal: usize) -> String {
    let alnum: String = reservation_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let tail: String = alnum
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let id_segment = format!("{tail:0>6}");
    let d = digest(&SHA256, format!("{reservation_id}:{ordinal}").as_bytes());
    let hash_segment = hex_prefix(d.as_ref(), 6).to_ascii_uppercase();
    format!("MF-RES-{id_segment}-{ordinal}{hash_segment}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_ids_are_stable() {
        let a = reservation_id("u1", "abc");
        let b = reservation_id("u1", "abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(reservation_id("u1", "abc"), reservation_id("u2", "abc"));
        assert_ne!(reservation_id("u1", "abc"), reservation_id("u1", "abd"));
        // Part boundaries matter: ("ab","c") must not collide with ("a","bc").
        assert_ne!(
            deterministic_id("x", &["ab", "c"]),
            deterministic_id("x", &["a", "bc"])
        );
    }

    #[test]
    fn namespaces_do_not_collide() {
        assert_ne!(
            agent_reservation_id("u1", "q1"),
            agent_order_id("u1", "q1")
        );
    }

    #[test]
    fn request_id_format() {
        let id = generate_request_id();
        assert!(id.starts_with("req_"));
        assert!(id.len() <= 128);
        assert!(id[4..]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn piece_id_format() {
        let id = generate_piece_id("1f2e3d4c5b6a", 3);
        assert!(id.starts_with("MF-RES-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[2].len(), 6);
        assert!(parts[3].starts_with('3'));
        assert_eq!(parts[3].len(), 7);
    }
}
