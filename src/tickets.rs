//! The out-of-band deletion-ticket system (spec §3, §4.3).

use std::sync::Mutex;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::hash;
use crate::util;

//----------- TicketScope --------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketScope {
    pub repository: String,
    pub snapshot_id: Option<String>,
    pub path_prefix: Option<String>,
}

impl TicketScope {
    /// Whether this scope covers a delete of `path` in `repository`,
    /// optionally within `snapshot_id` (spec §3: "a ticket *covers* a
    /// delete if...").
    fn covers(&self, repository: &str, path: &str, snapshot_id: Option<&str>) -> bool {
        if self.repository != repository {
            return false;
        }
        if let Some(scoped_snapshot) = &self.snapshot_id {
            if Some(scoped_snapshot.as_str()) != snapshot_id {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

//----------- UsageRecord --------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: i64,
    pub paths: Vec<String>,
}

//----------- DeletionTicket -----------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeletionTicket {
    pub ticket_id: String,
    pub issuer_key_id: String,
    pub signature: Option<Vec<u8>>,
    pub scope: TicketScope,
    pub issued_at: i64,
    pub valid_from: i64,
    pub valid_until: i64,
    pub max_uses: u32,
    pub current_uses: u32,
    pub used_by: Vec<UsageRecord>,
}

#[derive(Serialize)]
struct Canonical<'a> {
    ticket_id: &'a str,
    issuer_key_id: &'a str,
    scope: &'a TicketScope,
    issued_at: i64,
    valid_from: i64,
    valid_until: i64,
    max_uses: u32,
}

impl DeletionTicket {
    pub fn new(
        ticket_id: String,
        issuer_key_id: String,
        scope: TicketScope,
        issued_at: i64,
        valid_from: i64,
        valid_until: i64,
        max_uses: u32,
    ) -> Self {
        Self {
            ticket_id,
            issuer_key_id,
            signature: None,
            scope,
            issued_at,
            valid_from,
            valid_until,
            max_uses,
            current_uses: 0,
            used_by: Vec::new(),
        }
    }

    fn canonical(&self) -> Canonical<'_> {
        Canonical {
            ticket_id: &self.ticket_id,
            issuer_key_id: &self.issuer_key_id,
            scope: &self.scope,
            issued_at: self.issued_at,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            max_uses: self.max_uses,
        }
    }

    pub fn canonical_hash(&self) -> [u8; 32] {
        hash::canonical_hash(&self.canonical())
    }

    pub fn sign(&mut self, key: &crypto::SigningKey) {
        let digest = self.canonical_hash();
        self.signature = Some(key.sign(&digest));
    }

    fn verify_signature(&self, issuer_public_key: &[u8]) -> bool {
        match &self.signature {
            Some(sig) => crypto::verify(issuer_public_key, &self.canonical_hash(), sig),
            None => false,
        }
    }
}

//----------- Errors --------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("a ticket with this ID is already registered")]
    AlreadyRegistered,
    #[error("ticket signature does not verify")]
    BadSignature,
    #[error("ticket issuer does not match the configured owner")]
    WrongIssuer,
    #[error("ticket's valid-until is already in the past")]
    AlreadyExpired,
    #[error("max-uses must be at least 1")]
    InvalidMaxUses,
}

//----------- TicketStore ---------------------------------------------------------

/// The registered-ticket table (spec §3, §4.3): ticket-id → ticket.
#[derive(Debug, Default)]
pub struct TicketStore {
    tickets: Mutex<foldhash::HashMap<String, DeletionTicket>>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tickets(tickets: Vec<DeletionTicket>) -> Self {
        let map = tickets.into_iter().map(|t| (t.ticket_id.clone(), t)).collect();
        Self {
            tickets: Mutex::new(map),
        }
    }

    /// Register a new ticket, verifying its issuer signature.
    pub fn register(
        &self,
        ticket: DeletionTicket,
        owner_public_key: &[u8],
        owner_key_id: &str,
        now: i64,
    ) -> Result<(), RegisterError> {
        if ticket.max_uses < 1 {
            return Err(RegisterError::InvalidMaxUses);
        }
        if ticket.valid_until < now {
            return Err(RegisterError::AlreadyExpired);
        }
        if ticket.issuer_key_id != owner_key_id {
            return Err(RegisterError::WrongIssuer);
        }
        if !ticket.verify_signature(owner_public_key) {
            return Err(RegisterError::BadSignature);
        }

        let mut tickets = self.tickets.lock().unwrap();
        if tickets.contains_key(&ticket.ticket_id) {
            return Err(RegisterError::AlreadyRegistered);
        }
        tickets.insert(ticket.ticket_id.clone(), ticket);
        Ok(())
    }

    /// Find a ticket that covers this delete by implicit scope discovery.
    ///
    /// Returns the winning ticket-id, or the reason no ticket matched.
    pub fn validate_delete(
        &self,
        repository: &str,
        path: &str,
        snapshot_id: Option<&str>,
        now: i64,
    ) -> Result<String, String> {
        let tickets = self.tickets.lock().unwrap();

        let mut best: Option<&DeletionTicket> = None;
        let mut failure_reason: Option<String> = None;

        // Iterate in ticket-id order so the deterministic tie-break
        // (nearest valid-until, then lexicographically smaller ticket-id)
        // is reached by simply keeping the first-seen-smallest winner.
        let mut ids: Vec<&String> = tickets.keys().collect();
        ids.sort();

        for id in ids {
            let ticket = &tickets[id];
            if let Err(reason) = matches_reason(ticket, repository, path, snapshot_id, now) {
                failure_reason.get_or_insert(reason);
                continue;
            }

            best = match best {
                None => Some(ticket),
                Some(current) => {
                    if (ticket.valid_until, &ticket.ticket_id)
                        < (current.valid_until, &current.ticket_id)
                    {
                        Some(ticket)
                    } else {
                        Some(current)
                    }
                }
            };
        }

        match best {
            Some(ticket) => Ok(ticket.ticket_id.clone()),
            None => Err(failure_reason.unwrap_or_else(|| "no tickets registered".to_string())),
        }
    }

    /// Atomically increment `current_uses` and append a usage record.
    /// A no-op if the ticket is absent.
    pub fn record_usage(&self, ticket_id: &str, paths: Vec<String>, now: i64) {
        let mut tickets = self.tickets.lock().unwrap();
        if let Some(ticket) = tickets.get_mut(ticket_id) {
            ticket.current_uses += 1;
            ticket.used_by.push(UsageRecord {
                timestamp: now,
                paths,
            });
        }
    }

    /// Direct lookup by ID, with no scope re-validation — used when the
    /// caller presents an explicit ticket (spec §4.3's deliberate
    /// asymmetry).
    pub fn get(&self, ticket_id: &str) -> Option<DeletionTicket> {
        self.tickets.lock().unwrap().get(ticket_id).cloned()
    }

    pub fn snapshot(&self) -> Vec<DeletionTicket> {
        self.tickets.lock().unwrap().values().cloned().collect()
    }
}

/// Load the registered-ticket table from `path`. A missing or corrupt file
/// is treated as an empty table, per I4's sibling rule for tickets.
pub fn load(path: &Utf8Path) -> std::io::Result<TicketStore> {
    let bytes = util::read_file_or_empty(path)?;
    if bytes.is_empty() {
        return Ok(TicketStore::new());
    }
    match serde_json::from_slice::<Vec<DeletionTicket>>(&bytes) {
        Ok(tickets) => Ok(TicketStore::from_tickets(tickets)),
        Err(err) => {
            tracing::warn!(%path, error = %err, "ticket store is truncated or corrupt; starting empty");
            Ok(TicketStore::new())
        }
    }
}

/// Persist the registered-ticket table to `path` atomically.
pub fn save(store: &TicketStore, path: &Utf8Path) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(&store.snapshot())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    util::write_file(path, &bytes)
}

//----------- Wire conversions -----------------------------------------------------

impl From<&TicketScope> for airgapper_api::TicketScopeWire {
    fn from(scope: &TicketScope) -> Self {
        Self {
            repository: scope.repository.clone(),
            snapshot_id: scope.snapshot_id.clone(),
            path_prefix: scope.path_prefix.clone(),
        }
    }
}

impl From<airgapper_api::TicketScopeWire> for TicketScope {
    fn from(wire: airgapper_api::TicketScopeWire) -> Self {
        Self {
            repository: wire.repository,
            snapshot_id: wire.snapshot_id,
            path_prefix: wire.path_prefix,
        }
    }
}

impl From<&DeletionTicket> for airgapper_api::TicketWire {
    fn from(ticket: &DeletionTicket) -> Self {
        Self {
            ticket_id: ticket.ticket_id.clone(),
            issuer_key_id: ticket.issuer_key_id.clone(),
            signature: ticket.signature.clone(),
            scope: (&ticket.scope).into(),
            issued_at: ticket.issued_at,
            valid_from: ticket.valid_from,
            valid_until: ticket.valid_until,
            max_uses: ticket.max_uses,
            current_uses: ticket.current_uses,
            used_by: ticket
                .used_by
                .iter()
                .map(|u| airgapper_api::UsageRecordWire {
                    timestamp: u.timestamp,
                    paths: u.paths.clone(),
                })
                .collect(),
        }
    }
}

impl From<airgapper_api::TicketWire> for DeletionTicket {
    fn from(wire: airgapper_api::TicketWire) -> Self {
        Self {
            ticket_id: wire.ticket_id,
            issuer_key_id: wire.issuer_key_id,
            signature: wire.signature,
            scope: wire.scope.into(),
            issued_at: wire.issued_at,
            valid_from: wire.valid_from,
            valid_until: wire.valid_until,
            max_uses: wire.max_uses,
            current_uses: wire.current_uses,
            used_by: wire
                .used_by
                .into_iter()
                .map(|u| UsageRecord {
                    timestamp: u.timestamp,
                    paths: u.paths,
                })
                .collect(),
        }
    }
}

fn matches_reason(
    ticket: &DeletionTicket,
    repository: &str,
    path: &str,
    snapshot_id: Option<&str>,
    now: i64,
) -> Result<(), String> {
    if now < ticket.valid_from || now > ticket.valid_until {
        return Err(format!("ticket {} is outside its validity window", ticket.ticket_id));
    }
    if ticket.current_uses >= ticket.max_uses {
        return Err(format!("ticket {} is exhausted", ticket.ticket_id));
    }
    if !ticket.scope.covers(repository, path, snapshot_id) {
        return Err(format!("ticket {} scope does not match", ticket.ticket_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKey;

    fn scope(repo: &str) -> TicketScope {
        TicketScope {
            repository: repo.to_string(),
            snapshot_id: None,
            path_prefix: None,
        }
    }

    #[test]
    fn p6_ticket_authorizes_exactly_max_uses() {
        let (key, pk) = SigningKey::generate().unwrap();
        let owner_key_id = crypto::key_id(&pk);

        let mut ticket = DeletionTicket::new(
            "t1".to_string(),
            owner_key_id.clone(),
            scope("r1"),
            0,
            0,
            1000,
            2,
        );
        ticket.sign(&key);

        let store = TicketStore::new();
        store.register(ticket, &pk, &owner_key_id, 0).unwrap();

        for _ in 0..2 {
            let id = store.validate_delete("r1", "data/x", None, 10).unwrap();
            store.record_usage(&id, vec!["data/x".to_string()], 10);
        }

        assert!(store.validate_delete("r1", "data/x", None, 10).is_err());
    }

    #[test]
    fn scope_mismatch_is_rejected() {
        let (key, pk) = SigningKey::generate().unwrap();
        let owner_key_id = crypto::key_id(&pk);

        let mut ticket = DeletionTicket::new(
            "t1".to_string(),
            owner_key_id.clone(),
            TicketScope {
                repository: "r1".to_string(),
                snapshot_id: Some("s1".to_string()),
                path_prefix: None,
            },
            0,
            0,
            1000,
            5,
        );
        ticket.sign(&key);

        let store = TicketStore::new();
        store.register(ticket, &pk, &owner_key_id, 0).unwrap();

        assert!(store
            .validate_delete("r1", "snapshots/s2", Some("s2"), 10)
            .is_err());
    }

    #[test]
    fn register_rejects_wrong_issuer_and_bad_signature() {
        let (key, pk) = SigningKey::generate().unwrap();
        let (_other_key, other_pk) = SigningKey::generate().unwrap();
        let owner_key_id = crypto::key_id(&pk);

        let mut ticket = DeletionTicket::new(
            "t1".to_string(),
            crypto::key_id(&other_pk),
            scope("r1"),
            0,
            0,
            1000,
            1,
        );
        ticket.sign(&key);

        let store = TicketStore::new();
        assert_eq!(
            store.register(ticket, &pk, &owner_key_id, 0),
            Err(RegisterError::WrongIssuer)
        );
    }

    #[test]
    fn explicit_get_bypasses_scope_check() {
        let (key, pk) = SigningKey::generate().unwrap();
        let owner_key_id = crypto::key_id(&pk);
        let mut ticket = DeletionTicket::new(
            "t1".to_string(),
            owner_key_id.clone(),
            scope("r1"),
            0,
            0,
            1000,
            1,
        );
        ticket.sign(&key);

        let store = TicketStore::new();
        store.register(ticket, &pk, &owner_key_id, 0).unwrap();

        // Scope is for "r1", but explicit presentation trusts the caller.
        assert!(store.get("t1").is_some());
    }

    #[test]
    fn save_then_load_round_trips() {
        let (key, pk) = SigningKey::generate().unwrap();
        let owner_key_id = crypto::key_id(&pk);
        let mut ticket = DeletionTicket::new("t1".to_string(), owner_key_id.clone(), scope("r1"), 0, 0, 1000, 1);
        ticket.sign(&key);

        let store = TicketStore::new();
        store.register(ticket, &pk, &owner_key_id, 0).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("tickets.json")).unwrap();
        save(&store, &path).unwrap();

        let reloaded = load(&path).unwrap();
        assert!(reloaded.get("t1").is_some());
    }

    #[test]
    fn missing_ticket_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("missing.json")).unwrap();
        let store = load(&path).unwrap();
        assert!(store.snapshot().is_empty());
    }
}
