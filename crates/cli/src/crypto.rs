//! Local signing support, mirroring `airgapperd`'s signature primitive
//! closely enough to produce signatures the daemon accepts, without
//! depending on its crate.

use ring::signature::{Ed25519KeyPair, KeyPair};
use sha2::{Digest, Sha256};

pub struct SigningKey {
    pair: Ed25519KeyPair,
}

impl SigningKey {
    /// Load a PKCS#8-encoded Ed25519 key pair from disk.
    pub fn load(path: &camino::Utf8Path) -> Result<Self, String> {
        let bytes =
            std::fs::read(path).map_err(|err| format!("couldn't read key file {path}: {err}"))?;
        let pair = Ed25519KeyPair::from_pkcs8(&bytes)
            .map_err(|_| format!("{path} is not a valid PKCS#8 Ed25519 key"))?;
        Ok(Self { pair })
    }

    pub fn public_key(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.pair.public_key().as_ref());
        out
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.pair.sign(msg).as_ref().to_vec()
    }
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
