use super::{ConnectArgs, OutputFormat, print_json, print_status};
use alloy::primitives::{Address, Bytes, U256};
use clap::Parser;
use cosign_coordinator::{Operation, ProposalRequest};
use eyre::Result;

#[derive(Parser, Debug)]
pub struct ProposeArgs {
    /// Safe address
    #[arg(long)]
    safe: Address,

    /// Call target
    #[arg(long)]
    to: Address,

    /// Value in wei
    #[arg(long, default_value = "0")]
    value: U256,

    /// Hex calldata
    #[arg(long, default_value = "0x")]
    data: Bytes,

    /// Use DELEGATECALL instead of CALL
    #[arg(long)]
    delegate_call: bool,

    #[command(flatten)]
    connect: ConnectArgs,
}

impl ProposeArgs {
    pub async fn run(self) -> Result<()> {
        let coordinator = self.connect.coordinator().await?;
        let request = ProposalRequest {
            to: self.to,
            value: self.value,
            data: self.data,
            operation: if self.delegate_call { Operation::DelegateCall } else { Operation::Call },
        };

        let prepared = coordinator.prepare_transaction(self.safe, request).await?;

        match self.connect.format {
            OutputFormat::Json => print_json(&prepared),
            OutputFormat::Table => {
                println!("Outcome:       {:?}", prepared.outcome);
                print_status(&prepared.status);
                Ok(())
            }
        }
    }
}
