//! The delete authorizer (spec §4.5): the only component allowed to say
//! "yes" to a delete. Composes three gates, in a fixed order.

use crate::policy::Policy;
use crate::tickets::TicketStore;

/// Everything the authorizer needs to know about one candidate delete.
pub struct DeleteRequest<'a> {
    pub repository: &'a str,
    pub path: &'a str,
    pub snapshot_id: Option<&'a str>,
    /// An explicit ticket-id presented by the caller, if any.
    pub explicit_ticket_id: Option<&'a str>,
    /// Whether this path is in a category that requires a ticket when the
    /// ticket system is enabled (spec: "typically for paths under
    /// `/snapshots/`").
    pub requires_ticket: bool,
    /// The artifact's mtime, used as a proxy for its creation time (spec
    /// §4.5). `None` when there is no policy to consult, or the file does
    /// not exist yet.
    pub file_created_at: Option<i64>,
    pub now: i64,
}

/// The authorizer's decision, always worth an audit record.
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    /// Set when a ticket gate resolved a ticket that must be charged a use.
    pub ticket_to_charge: Option<String>,
}

impl Decision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            ticket_to_charge: None,
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            ticket_to_charge: None,
        }
    }
}

/// Composes the append-only, ticket, and policy gates (spec §4.5).
pub struct DeleteAuthorizer<'a> {
    pub append_only: bool,
    pub tickets: Option<&'a TicketStore>,
    pub policy: Option<&'a Policy>,
}

impl DeleteAuthorizer<'_> {
    /// P7: allow iff (not append-only) and (no ticket required, or the
    /// ticket gate passes) and (no policy, or `policy.can_delete` allows).
    pub fn authorize(&self, req: &DeleteRequest<'_>) -> Decision {
        // 1. Append-only gate: evaluated first and unconditionally.
        if self.append_only {
            return Decision::deny("delete not allowed in append-only mode");
        }

        // 2. Ticket gate: only when a ticket system is attached and this
        // path's category requires one.
        let mut ticket_to_charge = None;
        if req.requires_ticket {
            match self.tickets {
                None => return Decision::deny("tickets are required but no ticket system is configured"),
                Some(store) => match req.explicit_ticket_id {
                    Some(id) => match store.get(id) {
                        Some(ticket) => ticket_to_charge = Some(ticket.ticket_id),
                        None => return Decision::deny("invalid ticket ID"),
                    },
                    None => match store.validate_delete(req.repository, req.path, req.snapshot_id, req.now) {
                        Ok(id) => ticket_to_charge = Some(id),
                        Err(reason) => return Decision::deny(reason),
                    },
                },
            }
        }

        // 3. Policy gate: no policy means allow; otherwise consult
        // can_delete using the file's mtime as creation-time proxy.
        let mut decision = match self.policy {
            None => Decision::allow(),
            Some(policy) => {
                let created_at = req.file_created_at.unwrap_or(req.now);
                let (allowed, reason) = policy.can_delete(created_at, req.now);
                if allowed {
                    Decision::allow()
                } else {
                    Decision::deny(reason)
                }
            }
        };

        if decision.allowed {
            decision.ticket_to_charge = ticket_to_charge;
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SigningKey;
    use crate::policy::{DeletionMode, Party};
    use crate::tickets::{DeletionTicket, TicketScope};

    #[test]
    fn p7_append_only_wins_over_everything() {
        let authorizer = DeleteAuthorizer {
            append_only: true,
            tickets: None,
            policy: None,
        };
        let req = DeleteRequest {
            repository: "r1",
            path: "data/x",
            snapshot_id: None,
            explicit_ticket_id: None,
            requires_ticket: false,
            file_created_at: None,
            now: 0,
        };
        let decision = authorizer.authorize(&req);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "delete not allowed in append-only mode");
    }

    #[test]
    fn scenario_2_append_only_denies_delete() {
        let authorizer = DeleteAuthorizer {
            append_only: true,
            tickets: None,
            policy: None,
        };
        let req = DeleteRequest {
            repository: "r1",
            path: "keys/abc",
            snapshot_id: None,
            explicit_ticket_id: None,
            requires_ticket: false,
            file_created_at: None,
            now: 100,
        };
        assert!(!authorizer.authorize(&req).allowed);
    }

    #[test]
    fn scenario_3_policy_retention_blocks_then_allows() {
        let (owner_key, owner_pk) = SigningKey::generate().unwrap();
        let (host_key, host_pk) = SigningKey::generate().unwrap();
        let mut policy = Policy::new(
            "0011223344556677".to_string(),
            Party::new(None, owner_pk),
            Party::new(None, host_pk),
            0,
        );
        policy.retention_days = 30;
        policy.deletion_mode = DeletionMode::TimeLockOnly;
        policy.append_only_locked = false;
        policy.sign_as_owner(&owner_key);
        policy.sign_as_host(&host_key);

        let authorizer = DeleteAuthorizer {
            append_only: false,
            tickets: None,
            policy: Some(&policy),
        };

        let now = 31 * 86_400;
        let ten_days_ago = now - 10 * 86_400;
        let req_recent = DeleteRequest {
            repository: "r1",
            path: "snapshots/s1",
            snapshot_id: None,
            explicit_ticket_id: None,
            requires_ticket: false,
            file_created_at: Some(ten_days_ago),
            now,
        };
        let decision = authorizer.authorize(&req_recent);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("retention period not met"));
        assert!(decision.reason.contains("20 days remaining"));

        let thirty_one_days_ago = now - 31 * 86_400;
        let req_old = DeleteRequest {
            file_created_at: Some(thirty_one_days_ago),
            ..req_recent
        };
        assert!(authorizer.authorize(&req_old).allowed);
    }

    #[test]
    fn scenario_6_ticket_gate_exhaustion_and_scope() {
        let (key, pk) = SigningKey::generate().unwrap();
        let owner_key_id = crate::crypto::key_id(&pk);

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
            3600,
            2,
        );
        ticket.sign(&key);

        let store = TicketStore::new();
        store.register(ticket, &pk, &owner_key_id, 0).unwrap();

        let authorizer = DeleteAuthorizer {
            append_only: false,
            tickets: Some(&store),
            policy: None,
        };

        let mut req = DeleteRequest {
            repository: "r1",
            path: "snapshots/s1",
            snapshot_id: Some("s1"),
            explicit_ticket_id: None,
            requires_ticket: true,
            file_created_at: None,
            now: 10,
        };

        for _ in 0..2 {
            let decision = authorizer.authorize(&req);
            assert!(decision.allowed);
            let ticket_id = decision.ticket_to_charge.unwrap();
            store.record_usage(&ticket_id, vec![req.path.to_string()], req.now);
        }

        assert!(!authorizer.authorize(&req).allowed);

        req.path = "snapshots/s2";
        req.snapshot_id = Some("s2");
        assert!(!authorizer.authorize(&req).allowed);
    }
}
