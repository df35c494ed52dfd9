use super::{ConnectArgs, print_json};
use alloy::primitives::{Address, B256};
use clap::Parser;
use eyre::Result;

#[derive(Parser, Debug)]
pub struct TypedDataArgs {
    /// Safe address
    #[arg(long)]
    safe: Address,

    /// Safe transaction hash of the proposal
    #[arg(long)]
    hash: B256,

    #[command(flatten)]
    connect: ConnectArgs,
}

impl TypedDataArgs {
    /// Always prints JSON; the payload is meant for `eth_signTypedData_v4`.
    pub async fn run(self) -> Result<()> {
        let coordinator = self.connect.coordinator().await?;
        let typed_data = coordinator.typed_data(self.safe, self.hash).await?;
        print_json(&typed_data)
    }
}
