use super::{ConnectArgs, OutputFormat, print_account, print_json};
use alloy::primitives::Address;
use clap::Parser;
use eyre::Result;

#[derive(Parser, Debug)]
pub struct DeployArgs {
    /// Human owner sharing the Safe with the agent
    #[arg(long)]
    owner: Address,

    #[command(flatten)]
    connect: ConnectArgs,
}

impl DeployArgs {
    pub async fn run(self) -> Result<()> {
        let coordinator = self.connect.coordinator().await?;
        let account = coordinator.deploy_account(self.owner).await?;

        match self.connect.format {
            OutputFormat::Json => print_json(&account),
            OutputFormat::Table => {
                print_account(&account);
                Ok(())
            }
        }
    }
}
