use crate::client::{AirgapperApiClient, check_status, format_http_error};
use crate::println;

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Audit {
    /// Verify the tamper-evident audit chain end to end
    Verify,

    /// Show the last `n` audit records
    Tail {
        /// How many records to show
        #[arg(default_value_t = 20)]
        n: usize,
    },
}

impl Audit {
    pub async fn execute(self, client: AirgapperApiClient) -> Result<(), String> {
        match self {
            Audit::Verify => {
                let response = client.get("/admin/audit/verify").send().await.map_err(format_http_error)?;
                let response = check_status(response).await?;
                let result: airgapper_api::AuditVerifyResponse = response.json().await.map_err(format_http_error)?;
                match result.broken_at {
                    None if result.ok => println!("Audit chain verifies clean."),
                    Some(sequence) => {
                        println!("Audit chain is broken at sequence {sequence}.");
                        return Err(format!("audit chain broken at sequence {sequence}"));
                    }
                    None => println!("Audit chain does not verify."),
                }
                Ok(())
            }
            Audit::Tail { n } => {
                let response = client
                    .get(&format!("/admin/audit/tail?n={n}"))
                    .send()
                    .await
                    .map_err(format_http_error)?;
                let response = check_status(response).await?;
                let result: airgapper_api::AuditTailResponse = response.json().await.map_err(format_http_error)?;

                if result.records.is_empty() {
                    println!("No audit records yet.");
                }
                for record in result.records {
                    let status = if record.success { "ok" } else { "denied" };
                    let signed = if record.signed { " (signed)" } else { "" };
                    println!(
                        "{:>6}  {:<16} {:<8} {}{signed}",
                        record.sequence, record.op, status, record.path
                    );
                    if let Some(error) = record.error {
                        println!("           {error}");
                    }
                }
                Ok(())
            }
        }
    }
}
