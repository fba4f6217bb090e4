//! Canonical hashing for signed structures (spec §4.1).
//!
//! Every signable type defines its own small "canonical form" struct whose
//! field order is fixed by declaration order, serializes via `serde_json`
//! (which preserves struct field order), and is hashed with sha256. This
//! takes the JSON-encoding alternative the spec explicitly permits instead
//! of hand-rolling a big-endian byte encoder: two parties hashing the same
//! logical value must always produce the same digest, and `serde_json` over
//! a non-flattened struct already guarantees that.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// The sha256 digest of an arbitrary byte sequence.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Serialize `value` to canonical JSON and hash the result.
///
/// Panics only if `T`'s `Serialize` impl itself panics or produces a value
/// `serde_json` cannot encode (e.g. a non-finite float) — neither occurs for
/// the plain-old-data canonical-form structs this is used with.
pub fn canonical_hash<T: Serialize>(value: &T) -> [u8; 32] {
    let bytes = serde_json::to_vec(value).expect("canonical form is always serializable");
    sha256(&bytes)
}

pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// (De)serialize an `Option<i64>` instant as a plain integer, with `0`
/// denoting "absent" — the encoding spec §4.1 mandates for canonical forms.
pub mod opt_instant {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(value.unwrap_or(0))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = i64::deserialize(deserializer)?;
        Ok(if raw == 0 { None } else { Some(raw) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Canon {
        a: u32,
        #[serde(with = "opt_instant")]
        b: Option<i64>,
    }

    #[test]
    fn same_logical_value_hashes_equal() {
        let x = Canon { a: 1, b: Some(5) };
        let y = Canon { a: 1, b: Some(5) };
        assert_eq!(canonical_hash(&x), canonical_hash(&y));
    }

    #[test]
    fn different_value_hashes_differ() {
        let x = Canon { a: 1, b: None };
        let y = Canon { a: 1, b: Some(0) };
        // Both encode b as 0, so these legitimately collide: absence and
        // the literal instant zero are indistinguishable by design (§4.1).
        assert_eq!(canonical_hash(&x), canonical_hash(&y));

        let z = Canon { a: 2, b: None };
        assert_ne!(canonical_hash(&x), canonical_hash(&z));
    }
}
