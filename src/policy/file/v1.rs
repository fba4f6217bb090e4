//! Version 1 of the policy file.

use serde::{Deserialize, Serialize};

use crate::policy::{DeletionMode, Party, Policy};

//----------- Spec ----------------------------------------------------------------

/// The on-disk shape of a [`Policy`] at wire version 1.
///
/// This mirrors `Policy` field-for-field; the indirection exists so that a
/// future wire version can diverge from the in-memory representation
/// without touching the rest of the engine, the same way the policy-file
/// format is versioned independently of the domain type it parses into.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Spec {
    pub id: String,
    pub name: Option<String>,
    pub owner: Party,
    pub host: Party,
    pub retention_days: u32,
    pub deletion_mode: DeletionMode,
    pub append_only_locked: bool,
    pub max_storage_bytes: u64,
    pub created_at: i64,
    pub effective_at: i64,
    pub expires_at: Option<i64>,
    pub owner_signature: Option<Vec<u8>>,
    pub host_signature: Option<Vec<u8>>,
}

impl Spec {
    pub fn parse(self) -> Policy {
        Policy {
            version: 1,
            id: self.id,
            name: self.name,
            owner: self.owner,
            host: self.host,
            retention_days: self.retention_days,
            deletion_mode: self.deletion_mode,
            append_only_locked: self.append_only_locked,
            max_storage_bytes: self.max_storage_bytes,
            created_at: self.created_at,
            effective_at: self.effective_at,
            expires_at: self.expires_at,
            owner_signature: self.owner_signature,
            host_signature: self.host_signature,
        }
    }

    pub fn build(policy: &Policy) -> Self {
        Self {
            id: policy.id.clone(),
            name: policy.name.clone(),
            owner: policy.owner.clone(),
            host: policy.host.clone(),
            retention_days: policy.retention_days,
            deletion_mode: policy.deletion_mode,
            append_only_locked: policy.append_only_locked,
            max_storage_bytes: policy.max_storage_bytes,
            created_at: policy.created_at,
            effective_at: policy.effective_at,
            expires_at: policy.expires_at,
            owner_signature: policy.owner_signature.clone(),
            host_signature: policy.host_signature.clone(),
        }
    }
}
