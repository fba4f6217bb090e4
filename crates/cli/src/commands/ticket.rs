use camino::Utf8PathBuf;
use sha2::{Digest, Sha256};

use crate::client::{AirgapperApiClient, check_status, format_http_error};
use crate::crypto::{self, SigningKey};
use crate::println;

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Ticket {
    /// Build and sign a deletion ticket, printing its JSON
    Issue {
        /// The repository this ticket authorizes deletes in
        #[arg(long = "repo")]
        repo: String,

        /// Restrict the ticket to a single snapshot
        #[arg(long = "snapshot")]
        snapshot: Option<String>,

        /// Restrict the ticket to paths under this prefix
        #[arg(long = "path-prefix")]
        path_prefix: Option<String>,

        /// How many deletes this ticket authorizes
        #[arg(long = "max-uses", default_value_t = 1)]
        max_uses: u32,

        /// How many hours from now the ticket remains valid
        #[arg(long = "valid-hours", default_value_t = 24)]
        valid_hours: i64,

        /// The issuing owner's PKCS#8 Ed25519 private key
        #[arg(long = "owner-key", value_name = "PATH")]
        owner_key: Utf8PathBuf,
    },

    /// Register a signed ticket file with the daemon
    Register {
        /// A signed ticket file, as printed by `ticket issue`
        file: Utf8PathBuf,
    },
}

impl Ticket {
    pub async fn execute(self, client: AirgapperApiClient) -> Result<(), String> {
        match self {
            Ticket::Issue { repo, snapshot, path_prefix, max_uses, valid_hours, owner_key } => {
                let owner_key = SigningKey::load(&owner_key)?;
                let issuer_key_id = crypto::key_id(&owner_key.public_key());

                let issued_at = current_time()?;
                let valid_until = issued_at + valid_hours * 3600;
                let ticket_id = derive_ticket_id(&issuer_key_id, &repo, issued_at);

                let mut wire = airgapper_api::TicketWire {
                    ticket_id,
                    issuer_key_id,
                    signature: None,
                    scope: airgapper_api::TicketScopeWire {
                        repository: repo,
                        snapshot_id: snapshot,
                        path_prefix,
                    },
                    issued_at,
                    valid_from: issued_at,
                    valid_until,
                    max_uses,
                    current_uses: 0,
                    used_by: Vec::new(),
                };

                let digest = airgapper_api::canonical::ticket_hash(&wire);
                wire.signature = Some(owner_key.sign(&digest));

                println!("{}", serde_json::to_string_pretty(&wire).map_err(|err| err.to_string())?);
                Ok(())
            }
            Ticket::Register { file } => {
                let text = std::fs::read_to_string(&file).map_err(|err| format!("couldn't read {file}: {err}"))?;
                let wire: airgapper_api::TicketWire =
                    serde_json::from_str(&text).map_err(|err| format!("{file} is not a valid ticket: {err}"))?;

                let response = client.post("/admin/tickets").json(&wire).send().await.map_err(format_http_error)?;
                check_status(response).await?;
                println!("Ticket {} registered.", wire.ticket_id);
                Ok(())
            }
        }
    }
}

/// A short, stable identifier for a freshly issued ticket. Unlike a policy
/// or ticket's content hash, this only needs to be unique enough to key a
/// registration request — it isn't part of what gets signed over twice.
fn derive_ticket_id(issuer_key_id: &str, repo: &str, issued_at: i64) -> String {
    let digest = Sha256::digest(format!("{issuer_key_id}:{repo}:{issued_at}").as_bytes());
    let mut out = String::with_capacity(16);
    for b in &digest[..8] {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

fn current_time() -> Result<i64, String> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .map_err(|err| err.to_string())
}
