//! The daemon's central command (spec §4.7, §5): the single owner of
//! server state, mutated only through the typed operations below.

use std::sync::Mutex;

use airgapper_cfg::Config;

use crate::audit::{self, AuditChain};
use crate::authorizer::{DeleteAuthorizer, DeleteRequest, Decision};
use crate::clock::Clock;
use crate::error::DaemonError;
use crate::log::Logger;
use crate::policy::{self, Policy};
use crate::storage::{AdmissionLimits, Storage};
use crate::tickets::{DeletionTicket, TicketStore};

/// Cascading state changes behind the server state lock (spec §5).
#[derive(Debug)]
pub struct State {
    pub running: bool,
    pub start_time: i64,
    pub request_count: u64,
    pub total_bytes: u64,
    pub policy: Option<Policy>,
    pub append_only: bool,
}

/// The daemon's central command: owns storage, the audit chain, the
/// ticket store, and the mutable server state.
pub struct Center {
    pub storage: Storage,
    pub config: Config,
    pub logger: &'static Logger,
    pub audit: AuditChain,
    pub tickets: TicketStore,
    pub clock: Box<dyn Clock>,
    pub state: Mutex<State>,
}

impl Center {
    pub fn new(
        storage: Storage,
        config: Config,
        logger: &'static Logger,
        audit: AuditChain,
        tickets: TicketStore,
        clock: Box<dyn Clock>,
        policy: Option<Policy>,
    ) -> Self {
        let append_only = config.append_only
            || policy
                .as_ref()
                .is_some_and(|p| p.append_only_locked && p.is_fully_signed());
        let start_time = clock.now();

        Self {
            storage,
            config,
            logger,
            audit,
            tickets,
            clock,
            state: Mutex::new(State {
                running: true,
                start_time,
                request_count: 0,
                total_bytes: 0,
                policy,
                append_only,
            }),
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_disk_pct: self.config.max_disk_pct,
            quota_bytes_per_repo: self.config.quota_bytes_per_repo,
        }
    }

    pub fn count_request(&self, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        state.request_count += 1;
        state.total_bytes += bytes;
    }

    /// Install a new, fully-signed policy (spec §4.2, §9's mutation rule).
    ///
    /// The append-only switch is flipped on when the incoming policy is
    /// locked, but — matching the preserved source behavior recorded as an
    /// open question — is never flipped back off here.
    pub fn set_policy(&self, policy_path: &camino::Utf8Path, new_policy: Policy, now: i64) -> Result<(), DaemonError> {
        if !new_policy.is_fully_signed() {
            return Err(DaemonError::BadRequest("policy is not fully signed".to_string()));
        }

        {
            let mut state = self.state.lock().unwrap();
            if let Some(current) = &state.policy {
                if !policy::may_replace(current, &new_policy) {
                    return Err(DaemonError::Forbidden(
                        "a policy may only be replaced by the same owner and host".to_string(),
                    ));
                }
            }

            if new_policy.append_only_locked {
                state.append_only = true;
            }
            state.policy = Some(new_policy.clone());
        }

        policy::file::Spec::save(&new_policy, policy_path)?;

        self.audit
            .record(audit::op::POLICY_SET, "", &format!("policy {} installed", new_policy.id), true, None, now)?;
        Ok(())
    }

    pub fn current_policy(&self) -> Option<Policy> {
        self.state.lock().unwrap().policy.clone()
    }

    pub fn is_append_only(&self) -> bool {
        self.state.lock().unwrap().append_only
    }

    /// Register a new deletion ticket, keyed against the configured
    /// owner's key-id (spec §4.3).
    pub fn register_ticket(
        &self,
        tickets_path: &camino::Utf8Path,
        ticket: DeletionTicket,
        now: i64,
    ) -> Result<(), DaemonError> {
        let policy = self
            .current_policy()
            .ok_or_else(|| DaemonError::BadRequest("no policy is installed; tickets need an owner key".to_string()))?;

        self.tickets
            .register(ticket, &policy.owner.public_key, &policy.owner.key_id, now)
            .map_err(|err| DaemonError::BadRequest(err.to_string()))?;

        crate::tickets::save(&self.tickets, tickets_path)?;
        Ok(())
    }

    /// Run the full write path (spec §2): admission check, atomic write,
    /// audit record.
    pub fn write_artifact(
        &self,
        repo: &str,
        kind: crate::storage::ArtifactType,
        name: &str,
        body: &[u8],
        expected_hash: Option<&str>,
        now: i64,
    ) -> Result<(), DaemonError> {
        let used = self.storage.repo_bytes_used(repo).unwrap_or(0);
        let result = self
            .storage
            .write_artifact(repo, kind, name, body, expected_hash, &self.admission_limits(), used);

        if let Err(err) = &result {
            let _ = self.audit.record(
                audit::op::WRITE_DENIED,
                &format!("{repo}/{}/{name}", kind.dir_name()),
                "",
                false,
                Some(err.to_string()),
                now,
            );
        }

        self.count_request(body.len() as u64);
        result
    }

    /// Run the authorizer against a candidate delete, recording a denial
    /// audit record and charging a ticket's use as a side effect. Returns
    /// `Ok(())` on allow; the caller still must perform the deletion itself
    /// and record its own success/failure audit record.
    fn run_gates(
        &self,
        repo: &str,
        path: &str,
        snapshot_id: Option<&str>,
        explicit_ticket_id: Option<&str>,
        requires_ticket: bool,
        file_created_at: Option<i64>,
        now: i64,
    ) -> Result<(), DaemonError> {
        let append_only = self.is_append_only();
        let policy = self.current_policy();
        let tickets = self.config.tickets_enabled.then_some(&self.tickets);

        let authorizer = DeleteAuthorizer {
            append_only,
            tickets,
            policy: policy.as_ref(),
        };
        let req = DeleteRequest {
            repository: repo,
            path,
            snapshot_id,
            explicit_ticket_id,
            requires_ticket,
            file_created_at,
            now,
        };
        let Decision {
            allowed,
            reason,
            ticket_to_charge,
        } = authorizer.authorize(&req);

        if !allowed {
            self.audit
                .record(audit::op::DELETE_DENIED, path, &reason, false, Some(reason.clone()), now)?;
            return Err(DaemonError::Forbidden(reason));
        }

        if let Some(ticket_id) = &ticket_to_charge {
            self.tickets.record_usage(ticket_id, vec![path.to_string()], now);
        }

        Ok(())
    }

    /// Run the full delete path (spec §2, §4.5): authorize, act, audit.
    /// Ticket usage (if any) is recorded before the audit record, matching
    /// the required *tickets → audit* ordering (spec §5).
    pub fn authorize_and_delete(
        &self,
        repo: &str,
        kind: crate::storage::ArtifactType,
        name: &str,
        snapshot_id: Option<&str>,
        explicit_ticket_id: Option<&str>,
        requires_ticket: bool,
        now: i64,
    ) -> Result<(), DaemonError> {
        let path = format!("{repo}/{}/{name}", kind.dir_name());
        let file_created_at = self.storage.mtime(repo, kind, name).ok();

        self.run_gates(repo, &path, snapshot_id, explicit_ticket_id, requires_ticket, file_created_at, now)?;

        let result = self.storage.delete(repo, kind, name);

        self.audit.record(
            audit::op::DELETE,
            &path,
            "",
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
            now,
        )?;

        result
    }

    /// Delete a repository's one-shot config file through the same
    /// authorizer gates as any other artifact (spec §6's route table).
    pub fn authorize_and_delete_config(&self, repo: &str, now: i64) -> Result<(), DaemonError> {
        let path = format!("{repo}/config");

        self.run_gates(repo, &path, None, None, false, None, now)?;

        let result = self.storage.delete_config(repo);

        self.audit.record(
            audit::op::DELETE,
            &path,
            "",
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
            now,
        )?;

        result
    }
}
