//! Wire types for airgapperd's admin surface (`/admin/*`), shared between
//! the daemon and `airgapper-cli` so the CLI never needs to depend on the
//! daemon's internal engine types.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

//----------- Policy -----------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartyWire {
    pub display_name: Option<String>,
    pub key_id: String,
    pub public_key: [u8; 32],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionModeWire {
    BothRequired,
    OwnerOnly,
    TimeLockOnly,
    Never,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyWire {
    pub version: u32,
    pub id: String,
    pub name: Option<String>,
    pub owner: PartyWire,
    pub host: PartyWire,
    pub retention_days: u32,
    pub deletion_mode: DeletionModeWire,
    pub append_only_locked: bool,
    pub max_storage_bytes: u64,
    pub created_at: i64,
    pub effective_at: i64,
    pub expires_at: Option<i64>,
    pub owner_signature: Option<Vec<u8>>,
    pub host_signature: Option<Vec<u8>>,
}

//----------- Deletion tickets ---------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketScopeWire {
    pub repository: String,
    pub snapshot_id: Option<String>,
    pub path_prefix: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageRecordWire {
    pub timestamp: i64,
    pub paths: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketWire {
    pub ticket_id: String,
    pub issuer_key_id: String,
    pub signature: Option<Vec<u8>>,
    pub scope: TicketScopeWire,
    pub issued_at: i64,
    pub valid_from: i64,
    pub valid_until: i64,
    pub max_uses: u32,
    pub current_uses: u32,
    pub used_by: Vec<UsageRecordWire>,
}

//----------- Audit --------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecordWire {
    pub sequence: u64,
    pub timestamp: i64,
    pub op: String,
    pub path: String,
    pub details: String,
    pub success: bool,
    pub error: Option<String>,
    pub previous_hash: String,
    pub this_hash: String,
    pub signed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditTailResponse {
    pub records: Vec<AuditRecordWire>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditVerifyResponse {
    pub ok: bool,
    pub broken_at: Option<u64>,
}

//----------- Status --------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusWire {
    pub running: bool,
    pub start_time: i64,
    pub now: i64,
    pub request_count: u64,
    pub total_bytes: u64,
    pub base_path: Utf8PathBuf,
    pub append_only: bool,
    pub policy_id: Option<String>,
    pub disk_used_pct: Option<f64>,
}

//----------- Canonical hashing ---------------------------------------------------

/// Byte-exact canonical hashing for [`PolicyWire`] and [`TicketWire`],
/// matched field-for-field against the daemon's own canonical forms
/// (`airgapperd::policy::Canonical`, `airgapperd::tickets::Canonical`) so
/// `airgapper-cli` can sign a policy or ticket without depending on the
/// daemon's internal crate.
pub mod canonical {
    use serde::Serialize;
    use sha2::{Digest, Sha256};

    use super::{DeletionModeWire, PartyWire, PolicyWire, TicketScopeWire, TicketWire};

    fn hash_of<T: Serialize>(value: &T) -> [u8; 32] {
        let bytes = serde_json::to_vec(value).expect("canonical form is always serializable");
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    /// (De)serialize an `Option<i64>` instant as a plain integer, with `0`
    /// denoting "absent" — matches the daemon's `hash::opt_instant`.
    mod opt_instant {
        use serde::{Serialize, Serializer};

        pub fn serialize<S: Serializer>(value: &Option<i64>, serializer: S) -> Result<S::Ok, S::Error> {
            value.unwrap_or(0).serialize(serializer)
        }
    }

    #[derive(Serialize)]
    struct PolicyCanonical<'a> {
        version: u32,
        id: &'a str,
        name: &'a Option<String>,
        owner: &'a PartyWire,
        host: &'a PartyWire,
        retention_days: u32,
        deletion_mode: DeletionModeWire,
        append_only_locked: bool,
        max_storage_bytes: u64,
        created_at: i64,
        effective_at: i64,
        #[serde(with = "opt_instant")]
        expires_at: Option<i64>,
    }

    pub fn policy_hash(policy: &PolicyWire) -> [u8; 32] {
        hash_of(&PolicyCanonical {
            version: policy.version,
            id: &policy.id,
            name: &policy.name,
            owner: &policy.owner,
            host: &policy.host,
            retention_days: policy.retention_days,
            deletion_mode: policy.deletion_mode,
            append_only_locked: policy.append_only_locked,
            max_storage_bytes: policy.max_storage_bytes,
            created_at: policy.created_at,
            effective_at: policy.effective_at,
            expires_at: policy.expires_at,
        })
    }

    #[derive(Serialize)]
    struct TicketCanonical<'a> {
        ticket_id: &'a str,
        issuer_key_id: &'a str,
        scope: &'a TicketScopeWire,
        issued_at: i64,
        valid_from: i64,
        valid_until: i64,
        max_uses: u32,
    }

    pub fn ticket_hash(ticket: &TicketWire) -> [u8; 32] {
        hash_of(&TicketCanonical {
            ticket_id: &ticket.ticket_id,
            issuer_key_id: &ticket.issuer_key_id,
            scope: &ticket.scope,
            issued_at: ticket.issued_at,
            valid_from: ticket.valid_from,
            valid_until: ticket.valid_until,
            max_uses: ticket.max_uses,
        })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn policy_hash_ignores_signatures() {
            let policy = PolicyWire {
                version: 1,
                id: "abc".to_string(),
                name: None,
                owner: PartyWire {
                    display_name: None,
                    key_id: "k1".to_string(),
                    public_key: [1; 32],
                },
                host: PartyWire {
                    display_name: None,
                    key_id: "k2".to_string(),
                    public_key: [2; 32],
                },
                retention_days: 30,
                deletion_mode: DeletionModeWire::BothRequired,
                append_only_locked: true,
                max_storage_bytes: 0,
                created_at: 1_000,
                effective_at: 1_000,
                expires_at: None,
                owner_signature: None,
                host_signature: None,
            };
            let mut signed = policy.clone();
            signed.owner_signature = Some(vec![1, 2, 3]);
            assert_eq!(policy_hash(&policy), policy_hash(&signed));
        }
    }
}
