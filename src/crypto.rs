//! The abstract signature primitive (spec §9): key generation, signing,
//! verification, and key-id derivation, backed by Ed25519.

use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair};
use sha2::{Digest, Sha256};

/// An Ed25519 key pair capable of signing.
pub struct SigningKey {
    pair: Ed25519KeyPair,
}

impl SigningKey {
    /// Generate a new key pair.
    pub fn generate() -> Result<(Self, [u8; 32]), CryptoError> {
        let rng = SystemRandom::new();
        let pkcs8 =
            Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| CryptoError::MalformedKey)?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| CryptoError::MalformedKey)?;
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(pair.public_key().as_ref());
        Ok((Self { pair }, public_key))
    }

    /// Load a signing key from PKCS#8 DER bytes, e.g. as read from a key
    /// file on disk.
    pub fn from_pkcs8(bytes: &[u8]) -> Result<Self, CryptoError> {
        let pair = Ed25519KeyPair::from_pkcs8(bytes).map_err(|_| CryptoError::MalformedKey)?;
        Ok(Self { pair })
    }

    /// Generate a new key pair, also returning its PKCS#8 DER encoding so a
    /// caller can persist it (e.g. the daemon's own audit-signing key,
    /// which — unlike policy party keys — it owns the full lifecycle of).
    pub fn generate_with_pkcs8() -> Result<(Self, Vec<u8>), CryptoError> {
        let rng = SystemRandom::new();
        let pkcs8 =
            Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| CryptoError::MalformedKey)?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|_| CryptoError::MalformedKey)?;
        Ok((Self { pair }, pkcs8.as_ref().to_vec()))
    }

    /// This key's 32-byte public key.
    pub fn public_key(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.pair.public_key().as_ref());
        out
    }

    /// Sign a message, returning a 64-byte Ed25519 signature.
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.pair.sign(msg).as_ref().to_vec()
    }
}

/// Verify a signature against a public key and message.
pub fn verify(public_key: &[u8], msg: &[u8], sig: &[u8]) -> bool {
    signature::UnparsedPublicKey::new(&signature::ED25519, public_key)
        .verify(msg, sig)
        .is_ok()
}

/// Derive the stable short identifier for a public key: `hex(sha256(pk)[:8])`.
pub fn key_id(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    hex_encode(&digest[..8])
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("malformed signing key")]
    MalformedKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trips() {
        let (key, pk) = SigningKey::generate().unwrap();
        assert_eq!(key.public_key(), pk);
        let sig = key.sign(b"hello world");
        assert!(verify(&pk, b"hello world", &sig));
        assert!(!verify(&pk, b"goodbye world", &sig));
    }

    #[test]
    fn key_id_is_stable_and_short() {
        let (_, pk) = SigningKey::generate().unwrap();
        let id1 = key_id(&pk);
        let id2 = key_id(&pk);
        assert_eq!(id1, id2);
        assert_eq!(id1.len(), 16);
    }

    #[test]
    fn tampered_signature_fails() {
        let (key, pk) = SigningKey::generate().unwrap();
        let mut sig = key.sign(b"payload");
        sig[0] ^= 0xff;
        assert!(!verify(&pk, b"payload", &sig));
    }
}
