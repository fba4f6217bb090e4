//! The tamper-evident audit chain (spec §3, §4.4).

use std::sync::Mutex;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::crypto::SigningKey;
use crate::hash::{self, to_hex};
use crate::util;

pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

//----------- AuditRecord -----------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub sequence: u64,
    pub timestamp: i64,
    pub op: String,
    pub path: String,
    pub details: String,
    pub success: bool,
    pub error: Option<String>,
    pub previous_hash: [u8; 32],
    pub this_hash: [u8; 32],
    pub signature: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct Canonical<'a> {
    sequence: u64,
    timestamp: i64,
    op: &'a str,
    path: &'a str,
    details: &'a str,
    success: bool,
    error: &'a Option<String>,
    previous_hash: [u8; 32],
}

impl AuditRecord {
    fn compute_hash(
        sequence: u64,
        timestamp: i64,
        op: &str,
        path: &str,
        details: &str,
        success: bool,
        error: &Option<String>,
        previous_hash: [u8; 32],
    ) -> [u8; 32] {
        hash::canonical_hash(&Canonical {
            sequence,
            timestamp,
            op,
            path,
            details,
            success,
            error,
            previous_hash,
        })
    }
}

//----------- Operation tags --------------------------------------------------------

/// Operation tags used in audit records (spec §3's examples).
pub mod op {
    pub const DELETE: &str = "DELETE";
    pub const DELETE_DENIED: &str = "DELETE_DENIED";
    pub const SNAPSHOT_CREATE: &str = "SNAPSHOT_CREATE";
    pub const POLICY_SET: &str = "POLICY_SET";
    pub const WRITE_DENIED: &str = "WRITE_DENIED";
}

//----------- AuditChain -------------------------------------------------------------

/// A break found while verifying a chain: the first bad sequence number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("audit chain broken at sequence {0}")]
pub struct BrokenAt(pub u64);

/// The append-only, hash-chained, optionally-signed event log.
pub struct AuditChain {
    path: Utf8PathBuf,
    signing_key: Option<SigningKey>,
    records: Mutex<Vec<AuditRecord>>,
    enabled: bool,
}

impl AuditChain {
    /// Load a chain from `path`, or start a fresh one if absent/corrupt.
    /// Enabled by default; see [`AuditChain::set_enabled`].
    pub fn load(path: Utf8PathBuf, signing_key: Option<SigningKey>) -> std::io::Result<Self> {
        let bytes = util::read_file_or_empty(&path)?;
        let records = if bytes.is_empty() {
            Vec::new()
        } else {
            match serde_json::from_slice::<Vec<AuditRecord>>(&bytes) {
                Ok(records) => records,
                Err(err) => {
                    tracing::warn!(%path, error = %err, "audit log is truncated or corrupt; starting a fresh chain");
                    Vec::new()
                }
            }
        };

        Ok(Self {
            path,
            signing_key,
            records: Mutex::new(records),
            enabled: true,
        })
    }

    /// Toggle whether `record` actually appends anything (the
    /// `audit_enabled` verification switch, spec §6). Disabled chains still
    /// answer `tail`/`verify` against whatever was recorded before being
    /// turned off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Append a new record under the audit lock, persisting synchronously
    /// so the on-disk log and the in-memory tail never diverge (spec §5).
    pub fn record(
        &self,
        op: &str,
        path: &str,
        details: &str,
        success: bool,
        error: Option<String>,
        now: i64,
    ) -> std::io::Result<AuditRecord> {
        if !self.enabled {
            return Ok(AuditRecord {
                sequence: 0,
                timestamp: now,
                op: op.to_string(),
                path: path.to_string(),
                details: details.to_string(),
                success,
                error,
                previous_hash: GENESIS_HASH,
                this_hash: GENESIS_HASH,
                signature: None,
            });
        }

        let mut records = self.records.lock().unwrap();

        let sequence = records.len() as u64;
        let previous_hash = records.last().map(|r| r.this_hash).unwrap_or(GENESIS_HASH);
        let this_hash =
            AuditRecord::compute_hash(sequence, now, op, path, details, success, &error, previous_hash);
        let signature = self.signing_key.as_ref().map(|key| key.sign(&this_hash));

        let record = AuditRecord {
            sequence,
            timestamp: now,
            op: op.to_string(),
            path: path.to_string(),
            details: details.to_string(),
            success,
            error,
            previous_hash,
            this_hash,
            signature,
        };

        records.push(record.clone());
        self.persist(&records)?;
        Ok(record)
    }

    fn persist(&self, records: &[AuditRecord]) -> std::io::Result<()> {
        let bytes = serde_json::to_vec(records)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        util::write_file(&self.path, &bytes)
    }

    /// Walk the whole chain, recomputing hashes (and signatures, if
    /// signing is enabled), returning the first broken sequence.
    pub fn verify(&self) -> Result<(), BrokenAt> {
        let records = self.records.lock().unwrap();
        let mut previous_hash = GENESIS_HASH;

        for record in records.iter() {
            let expected_hash = AuditRecord::compute_hash(
                record.sequence,
                record.timestamp,
                &record.op,
                &record.path,
                &record.details,
                record.success,
                &record.error,
                previous_hash,
            );

            if record.previous_hash != previous_hash || record.this_hash != expected_hash {
                return Err(BrokenAt(record.sequence));
            }

            if let Some(key) = &self.signing_key {
                let valid = record
                    .signature
                    .as_ref()
                    .is_some_and(|sig| crate::crypto::verify(&key.public_key(), &record.this_hash, sig));
                if !valid {
                    return Err(BrokenAt(record.sequence));
                }
            }

            previous_hash = record.this_hash;
        }

        Ok(())
    }

    /// The last `n` records, most recent last.
    pub fn tail(&self, n: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap();
        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for AuditChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditChain")
            .field("path", &self.path)
            .field("signed", &self.signing_key.is_some())
            .field("len", &self.len())
            .finish()
    }
}

pub fn hex_hash(hash: &[u8; 32]) -> String {
    to_hex(hash)
}

impl From<&AuditRecord> for airgapper_api::AuditRecordWire {
    fn from(record: &AuditRecord) -> Self {
        Self {
            sequence: record.sequence,
            timestamp: record.timestamp,
            op: record.op.clone(),
            path: record.path.clone(),
            details: record.details.clone(),
            success: record.success,
            error: record.error.clone(),
            previous_hash: hex_hash(&record.previous_hash),
            this_hash: hex_hash(&record.this_hash),
            signed: record.signature.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(signed: bool) -> AuditChain {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("audit.json")).unwrap();
        std::mem::forget(dir); // keep the tempdir alive for the test's duration
        let key = signed.then(|| SigningKey::generate().unwrap().0);
        AuditChain::load(path, key).unwrap()
    }

    #[test]
    fn p4_and_p5_fresh_chain_verifies_and_links() {
        let chain = chain(false);
        chain.record(op::SNAPSHOT_CREATE, "snapshots/s1", "", true, None, 1).unwrap();
        chain.record(op::DELETE, "snapshots/s1", "", true, None, 2).unwrap();
        assert!(chain.verify().is_ok());

        let records = chain.tail(10);
        assert_eq!(records[0].previous_hash, GENESIS_HASH);
        assert_eq!(records[1].previous_hash, records[0].this_hash);
    }

    #[test]
    fn p4_tamper_is_detected_at_first_break() {
        let chain = chain(true);
        chain.record(op::SNAPSHOT_CREATE, "s1", "", true, None, 1).unwrap();
        chain.record(op::DELETE, "s1", "", true, None, 2).unwrap();
        chain.record(op::DELETE_DENIED, "s1", "denied", false, Some("nope".into()), 3).unwrap();

        {
            let mut records = chain.records.lock().unwrap();
            records[1].details = "tampered".to_string();
        }

        assert_eq!(chain.verify(), Err(BrokenAt(1)));
    }

    #[test]
    fn scenario_6_ticket_usage_sequence() {
        let chain = chain(false);
        chain.record(op::SNAPSHOT_CREATE, "snapshots/s1", "", true, None, 0).unwrap();
        chain.record(op::DELETE, "snapshots/s1", "use 1", true, None, 1).unwrap();
        chain.record(op::DELETE, "snapshots/s1", "use 2", true, None, 2).unwrap();
        chain
            .record(op::DELETE_DENIED, "snapshots/s1", "exhausted", false, Some("exhausted".into()), 3)
            .unwrap();
        chain
            .record(op::DELETE_DENIED, "snapshots/s2", "scope mismatch", false, Some("scope mismatch".into()), 4)
            .unwrap();

        assert!(chain.verify().is_ok());
        let ops: Vec<_> = chain.tail(10).into_iter().map(|r| r.op).collect();
        assert_eq!(
            ops,
            vec![
                op::SNAPSHOT_CREATE,
                op::DELETE,
                op::DELETE,
                op::DELETE_DENIED,
                op::DELETE_DENIED,
            ]
        );
    }

    #[test]
    fn reload_from_disk_preserves_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("audit.json")).unwrap();

        {
            let chain = AuditChain::load(path.clone(), None).unwrap();
            chain.record(op::POLICY_SET, "", "installed", true, None, 0).unwrap();
        }

        let reloaded = AuditChain::load(path, None).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.verify().is_ok());
    }
}
