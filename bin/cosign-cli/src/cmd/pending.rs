use super::{ConnectArgs, OutputFormat, print_json};
use alloy::primitives::Address;
use clap::Parser;
use cosign_coordinator::ProposalState;
use eyre::Result;

#[derive(Parser, Debug)]
pub struct PendingArgs {
    /// Safe address
    #[arg(long)]
    safe: Address,

    /// Show only proposals that can still execute
    #[arg(long)]
    live: bool,

    #[command(flatten)]
    connect: ConnectArgs,
}

impl PendingArgs {
    pub async fn run(self) -> Result<()> {
        let coordinator = self.connect.coordinator().await?;
        let mut pending = coordinator.get_pending_confirmations(self.safe).await?;
        if self.live {
            pending.retain(|p| p.state == ProposalState::Live);
        }

        if self.connect.format == OutputFormat::Json {
            return print_json(&pending);
        }

        println!("Pending proposals for {}", self.safe);
        println!("=============================================================");
        if pending.is_empty() {
            println!("None");
            return Ok(());
        }

        println!("{:<6} {:<11} {:<68} STATUS", "NONCE", "STATE", "SAFE TX HASH");
        for entry in &pending {
            println!(
                "{:<6} {:<11} {:<68} {}",
                entry.proposal.nonce(),
                format!("{:?}", entry.state).to_lowercase(),
                entry.status.safe_tx_hash.to_string(),
                entry.status
            );
        }

        Ok(())
    }
}
