pub mod audit;
pub mod policy;
pub mod status;
pub mod ticket;

use crate::client::AirgapperApiClient;

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Inspect or install the retention policy
    #[command(subcommand)]
    Policy(policy::Policy),

    /// Issue or register deletion tickets
    #[command(subcommand)]
    Ticket(ticket::Ticket),

    /// Inspect the tamper-evident audit chain
    #[command(subcommand)]
    Audit(audit::Audit),

    /// Show the daemon's current status
    Status,
}

impl Command {
    pub async fn execute(self, client: AirgapperApiClient) -> Result<(), String> {
        match self {
            Command::Policy(cmd) => cmd.execute(client).await,
            Command::Ticket(cmd) => cmd.execute(client).await,
            Command::Audit(cmd) => cmd.execute(client).await,
            Command::Status => status::execute(client).await,
        }
    }
}
