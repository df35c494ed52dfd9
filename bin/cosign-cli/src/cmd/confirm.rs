use super::{ConnectArgs, OutputFormat, print_json, print_status};
use alloy::primitives::{Address, B256};
use clap::Parser;
use eyre::Result;

#[derive(Parser, Debug)]
pub struct ConfirmArgs {
    /// Safe address
    #[arg(long)]
    safe: Address,

    /// Safe transaction hash of the proposal
    #[arg(long)]
    hash: B256,

    #[command(flatten)]
    connect: ConnectArgs,
}

impl ConfirmArgs {
    pub async fn run(self) -> Result<()> {
        let coordinator = self.connect.coordinator().await?;
        let status = coordinator.confirm_transaction(self.safe, self.hash).await?;

        match self.connect.format {
            OutputFormat::Json => print_json(&status),
            OutputFormat::Table => {
                print_status(&status);
                Ok(())
            }
        }
    }
}
