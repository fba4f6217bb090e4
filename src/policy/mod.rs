//! The signed bilateral retention contract (spec §3, §4.2).

use serde::{Deserialize, Serialize};

use crate::clock::ceil_days;
use crate::crypto::{self, SigningKey};
use crate::hash::{self, opt_instant};

pub mod file;

const DEFAULT_RETENTION_DAYS: u32 = 30;

//----------- Party -------------------------------------------------------------

/// One party to the contract: the owner or the host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub display_name: Option<String>,
    pub key_id: String,
    pub public_key: [u8; 32],
}

impl Party {
    pub fn new(display_name: Option<String>, public_key: [u8; 32]) -> Self {
        Self {
            display_name,
            key_id: crypto::key_id(&public_key),
            public_key,
        }
    }
}

//----------- DeletionMode -------------------------------------------------------

/// The policy's deletion mode (spec §4.2's decision table), a closed sum
/// type rather than the source's loose string constant (spec §9).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeletionMode {
    BothRequired,
    OwnerOnly,
    TimeLockOnly,
    Never,
}

impl std::fmt::Display for DeletionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::BothRequired => "both-required",
            Self::OwnerOnly => "owner-only",
            Self::TimeLockOnly => "time-lock-only",
            Self::Never => "never",
        })
    }
}

//----------- Policy --------------------------------------------------------------

/// The retention contract between an owner and a host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub version: u32,
    pub id: String,
    pub name: Option<String>,
    pub owner: Party,
    pub host: Party,
    pub retention_days: u32,
    pub deletion_mode: DeletionMode,
    pub append_only_locked: bool,
    /// `0` means unlimited (spec §3).
    pub max_storage_bytes: u64,
    pub created_at: i64,
    pub effective_at: i64,
    pub expires_at: Option<i64>,
    pub owner_signature: Option<Vec<u8>>,
    pub host_signature: Option<Vec<u8>>,
}

/// The subset of fields that is covered by the canonical hash (spec
/// invariant I1: every field except the two signatures).
#[derive(Serialize)]
struct Canonical<'a> {
    version: u32,
    id: &'a str,
    name: &'a Option<String>,
    owner: &'a Party,
    host: &'a Party,
    retention_days: u32,
    deletion_mode: DeletionMode,
    append_only_locked: bool,
    max_storage_bytes: u64,
    created_at: i64,
    effective_at: i64,
    #[serde(with = "opt_instant")]
    expires_at: Option<i64>,
}

/// Why `Policy::verify` failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PolicyVerifyError {
    #[error("owner signature is missing")]
    MissingOwnerSig,
    #[error("host signature is missing")]
    MissingHostSig,
    #[error("owner signature does not verify")]
    BadOwnerSig,
    #[error("host signature does not verify")]
    BadHostSig,
}

impl Policy {
    /// Create a new, unsigned policy with the spec's stated defaults.
    pub fn new(id: String, owner: Party, host: Party, now: i64) -> Self {
        Self {
            version: 1,
            id,
            name: None,
            owner,
            host,
            retention_days: DEFAULT_RETENTION_DAYS,
            deletion_mode: DeletionMode::BothRequired,
            append_only_locked: true,
            max_storage_bytes: 0,
            created_at: now,
            effective_at: now,
            expires_at: None,
            owner_signature: None,
            host_signature: None,
        }
    }

    fn canonical(&self) -> Canonical<'_> {
        Canonical {
            version: self.version,
            id: &self.id,
            name: &self.name,
            owner: &self.owner,
            host: &self.host,
            retention_days: self.retention_days,
            deletion_mode: self.deletion_mode,
            append_only_locked: self.append_only_locked,
            max_storage_bytes: self.max_storage_bytes,
            created_at: self.created_at,
            effective_at: self.effective_at,
            expires_at: self.expires_at,
        }
    }

    /// The canonical hash covering every field except the signatures (I1).
    pub fn canonical_hash(&self) -> [u8; 32] {
        hash::canonical_hash(&self.canonical())
    }

    /// Sign as the owner. Fails only on a malformed key.
    pub fn sign_as_owner(&mut self, key: &SigningKey) {
        let digest = self.canonical_hash();
        self.owner_signature = Some(key.sign(&digest));
    }

    /// Sign as the host. Fails only on a malformed key.
    pub fn sign_as_host(&mut self, key: &SigningKey) {
        let digest = self.canonical_hash();
        self.host_signature = Some(key.sign(&digest));
    }

    /// Verify both signatures against the current (possibly mutated)
    /// fields. Any post-signing mutation causes this to fail (I2).
    pub fn verify(&self) -> Result<(), PolicyVerifyError> {
        let digest = self.canonical_hash();

        let owner_sig = self
            .owner_signature
            .as_ref()
            .ok_or(PolicyVerifyError::MissingOwnerSig)?;
        if !crypto::verify(&self.owner.public_key, &digest, owner_sig) {
            return Err(PolicyVerifyError::BadOwnerSig);
        }

        let host_sig = self
            .host_signature
            .as_ref()
            .ok_or(PolicyVerifyError::MissingHostSig)?;
        if !crypto::verify(&self.host.public_key, &digest, host_sig) {
            return Err(PolicyVerifyError::BadHostSig);
        }

        Ok(())
    }

    /// Whether both signatures are present and verify.
    pub fn is_fully_signed(&self) -> bool {
        self.verify().is_ok()
    }

    /// Whether the policy is currently active: `effective_at <= now` and
    /// (`expires_at` absent or `now <= expires_at`).
    pub fn is_active(&self, now: i64) -> bool {
        self.effective_at <= now && self.expires_at.is_none_or(|exp| now <= exp)
    }

    /// The §4.2 decision table: whether a file created at `file_created_at`
    /// may be deleted at `now`, and the human reason if not.
    pub fn can_delete(&self, file_created_at: i64, now: i64) -> (bool, String) {
        let age_secs = now.saturating_sub(file_created_at);
        let retention_secs = i64::from(self.retention_days) * 86_400;
        let meets_retention = age_secs >= retention_secs;

        if !meets_retention {
            let remaining = ceil_days(retention_secs - age_secs);
            return (
                false,
                format!("retention period not met: {remaining} days remaining"),
            );
        }

        match self.deletion_mode {
            DeletionMode::Never => (false, "prohibits deletion".to_string()),
            DeletionMode::TimeLockOnly => (true, String::new()),
            DeletionMode::OwnerOnly => (false, "requires owner approval".to_string()),
            DeletionMode::BothRequired => (false, "requires both approvals".to_string()),
        }
    }

    /// The (owner-key-id, host-key-id) tuple used to decide whether a
    /// replacement policy may supersede this one (spec §9: "Policy
    /// equality for replacement... expressed structurally").
    pub fn parties(&self) -> (&str, &str) {
        (&self.owner.key_id, &self.host.key_id)
    }

    /// Full serialization including signatures.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Policy always serializes")
    }

    /// Deserialize from the format produced by [`Self::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Whether `next` may replace `current` under the mutation rule (spec §1:
/// "permits replacement only by the same two key identities").
pub fn may_replace(current: &Policy, next: &Policy) -> bool {
    current.parties() == next.parties()
}

//----------- Wire conversions -----------------------------------------------------

impl From<&Party> for airgapper_api::PartyWire {
    fn from(party: &Party) -> Self {
        Self {
            display_name: party.display_name.clone(),
            key_id: party.key_id.clone(),
            public_key: party.public_key,
        }
    }
}

impl From<airgapper_api::PartyWire> for Party {
    fn from(wire: airgapper_api::PartyWire) -> Self {
        Self {
            display_name: wire.display_name,
            key_id: wire.key_id,
            public_key: wire.public_key,
        }
    }
}

impl From<DeletionMode> for airgapper_api::DeletionModeWire {
    fn from(mode: DeletionMode) -> Self {
        match mode {
            DeletionMode::BothRequired => Self::BothRequired,
            DeletionMode::OwnerOnly => Self::OwnerOnly,
            DeletionMode::TimeLockOnly => Self::TimeLockOnly,
            DeletionMode::Never => Self::Never,
        }
    }
}

impl From<airgapper_api::DeletionModeWire> for DeletionMode {
    fn from(mode: airgapper_api::DeletionModeWire) -> Self {
        match mode {
            airgapper_api::DeletionModeWire::BothRequired => Self::BothRequired,
            airgapper_api::DeletionModeWire::OwnerOnly => Self::OwnerOnly,
            airgapper_api::DeletionModeWire::TimeLockOnly => Self::TimeLockOnly,
            airgapper_api::DeletionModeWire::Never => Self::Never,
        }
    }
}

impl From<&Policy> for airgapper_api::PolicyWire {
    fn from(policy: &Policy) -> Self {
        Self {
            version: policy.version,
            id: policy.id.clone(),
            name: policy.name.clone(),
            owner: (&policy.owner).into(),
            host: (&policy.host).into(),
            retention_days: policy.retention_days,
            deletion_mode: policy.deletion_mode.into(),
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

impl From<airgapper_api::PolicyWire> for Policy {
    fn from(wire: airgapper_api::PolicyWire) -> Self {
        Self {
            version: wire.version,
            id: wire.id,
            name: wire.name,
            owner: wire.owner.into(),
            host: wire.host.into(),
            retention_days: wire.retention_days,
            deletion_mode: wire.deletion_mode.into(),
            append_only_locked: wire.append_only_locked,
            max_storage_bytes: wire.max_storage_bytes,
            created_at: wire.created_at,
            effective_at: wire.effective_at,
            expires_at: wire.expires_at,
            owner_signature: wire.owner_signature,
            host_signature: wire.host_signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(seed: u8) -> (Party, SigningKey) {
        let (key, pk) = SigningKey::generate().unwrap();
        let _ = seed;
        (Party::new(Some("tester".to_string()), pk), key)
    }

    fn signed_policy(now: i64) -> (Policy, SigningKey, SigningKey) {
        let (owner, owner_key) = party(1);
        let (host, host_key) = party(2);
        let mut policy = Policy::new("0123456789abcdef".to_string(), owner, host, now);
        policy.sign_as_owner(&owner_key);
        policy.sign_as_host(&host_key);
        (policy, owner_key, host_key)
    }

    #[test]
    fn p1_fully_signed_verifies_and_mutation_breaks_it() {
        let (mut policy, _o, _h) = signed_policy(1_000);
        assert!(policy.verify().is_ok());

        policy.retention_days = 1;
        assert_eq!(policy.verify(), Err(PolicyVerifyError::BadOwnerSig));
    }

    #[test]
    fn p2_round_trip_preserves_signatures() {
        let (policy, _o, _h) = signed_policy(1_000);
        let bytes = policy.to_bytes();
        let restored = Policy::from_bytes(&bytes).unwrap();
        assert_eq!(restored, policy);
        assert!(restored.verify().is_ok());
    }

    #[test]
    fn p3_can_delete_decision_table() {
        let (owner, _ok) = party(1);
        let (host, _hk) = party(2);
        let mut policy = Policy::new("deadbeefdeadbeef".to_string(), owner, host, 0);
        policy.retention_days = 10;

        let retention_secs = 10 * 86_400;
        let under_age = retention_secs / 2;
        let over_age = retention_secs + 1;

        for (mode, expect_allow_over) in [
            (DeletionMode::Never, false),
            (DeletionMode::TimeLockOnly, true),
            (DeletionMode::OwnerOnly, false),
            (DeletionMode::BothRequired, false),
        ] {
            policy.deletion_mode = mode;
            let (allowed_under, _) = policy.can_delete(0, under_age);
            assert!(!allowed_under, "{mode} must deny under retention");

            let (allowed_over, reason) = policy.can_delete(0, over_age);
            assert_eq!(allowed_over, expect_allow_over, "{mode}: {reason}");
        }
    }

    #[test]
    fn only_matching_parties_may_replace() {
        let (p1, _o, _h) = signed_policy(0);
        let (other_host, _hk2) = party(3);
        let mut p2 = p1.clone();
        p2.host = other_host;
        assert!(!may_replace(&p1, &p2));

        let p3 = p1.clone();
        assert!(may_replace(&p1, &p3));
    }

    #[test]
    fn wire_conversion_round_trips() {
        let (policy, _o, _h) = signed_policy(1_000);
        let wire: airgapper_api::PolicyWire = (&policy).into();
        let restored: Policy = wire.into();
        assert_eq!(restored, policy);
        assert!(restored.verify().is_ok());
    }

    #[test]
    fn is_active_respects_window() {
        let (owner, _) = party(1);
        let (host, _) = party(2);
        let mut policy = Policy::new("a".repeat(16), owner, host, 100);
        policy.expires_at = Some(200);
        assert!(!policy.is_active(50));
        assert!(policy.is_active(100));
        assert!(policy.is_active(200));
        assert!(!policy.is_active(201));
    }
}
