use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::client::{AirgapperApiClient, check_status, format_http_error};
use crate::crypto::{self, SigningKey};
use crate::{eprintln, println};

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Policy {
    /// Print the daemon's currently installed policy, if any
    Show,

    /// Sign a draft policy with the owner and host keys, then install it
    Install {
        /// A draft policy file (see the README for its shape)
        file: Utf8PathBuf,

        /// The policy owner's PKCS#8 Ed25519 private key
        #[arg(long = "owner-key", value_name = "PATH")]
        owner_key: Utf8PathBuf,

        /// The host's PKCS#8 Ed25519 private key
        #[arg(long = "host-key", value_name = "PATH")]
        host_key: Utf8PathBuf,
    },
}

/// A policy draft as authored by an operator: everything but the two
/// signatures, which `install` fills in locally before sending it over.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Draft {
    #[serde(default = "default_version")]
    version: u32,
    id: String,
    name: Option<String>,
    owner: airgapper_api::PartyWire,
    host: airgapper_api::PartyWire,
    retention_days: u32,
    deletion_mode: airgapper_api::DeletionModeWire,
    append_only_locked: bool,
    max_storage_bytes: u64,
    created_at: i64,
    effective_at: i64,
    expires_at: Option<i64>,
}

fn default_version() -> u32 {
    1
}

impl Policy {
    pub async fn execute(self, client: AirgapperApiClient) -> Result<(), String> {
        match self {
            Policy::Show => {
                let response = client.get("/admin/policy").send().await.map_err(format_http_error)?;
                if response.status() == reqwest::StatusCode::NOT_FOUND {
                    println!("No policy is currently installed.");
                    return Ok(());
                }
                let response = check_status(response).await?;
                let policy: airgapper_api::PolicyWire = response.json().await.map_err(format_http_error)?;
                println!("{}", serde_json::to_string_pretty(&policy).map_err(|err| err.to_string())?);
                Ok(())
            }
            Policy::Install { file, owner_key, host_key } => {
                let text = std::fs::read_to_string(&file).map_err(|err| format!("couldn't read {file}: {err}"))?;
                let draft: Draft = serde_json::from_str(&text).map_err(|err| format!("{file} is not a valid policy draft: {err}"))?;

                let owner_key = SigningKey::load(&owner_key)?;
                let host_key = SigningKey::load(&host_key)?;

                let mut wire = airgapper_api::PolicyWire {
                    version: draft.version,
                    id: draft.id,
                    name: draft.name,
                    owner: draft.owner,
                    host: draft.host,
                    retention_days: draft.retention_days,
                    deletion_mode: draft.deletion_mode,
                    append_only_locked: draft.append_only_locked,
                    max_storage_bytes: draft.max_storage_bytes,
                    created_at: draft.created_at,
                    effective_at: draft.effective_at,
                    expires_at: draft.expires_at,
                    owner_signature: None,
                    host_signature: None,
                };

                if wire.owner.key_id != crypto::key_id(&owner_key.public_key()) {
                    eprintln!("warning: owner key file does not match the draft's owner key id");
                }
                if wire.host.key_id != crypto::key_id(&host_key.public_key()) {
                    eprintln!("warning: host key file does not match the draft's host key id");
                }

                let digest = airgapper_api::canonical::policy_hash(&wire);
                wire.owner_signature = Some(owner_key.sign(&digest));
                wire.host_signature = Some(host_key.sign(&digest));

                let response = client.put("/admin/policy").json(&wire).send().await.map_err(format_http_error)?;
                check_status(response).await?;
                println!("Policy {} installed.", wire.id);
                Ok(())
            }
        }
    }
}
