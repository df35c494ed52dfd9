use super::{ConnectArgs, OutputFormat, print_json, print_status};
use alloy::primitives::{Address, B256};
use clap::Parser;
use cosign_coordinator::{ExecutionOutcome, ReceiptStatus};
use eyre::Result;

#[derive(Parser, Debug)]
pub struct ExecuteArgs {
    /// Safe address
    #[arg(long)]
    safe: Address,

    /// Execute this proposal instead of the one at the current nonce
    #[arg(long)]
    hash: Option<B256>,

    #[command(flatten)]
    connect: ConnectArgs,
}

impl ExecuteArgs {
    pub async fn run(self) -> Result<()> {
        let coordinator = self.connect.coordinator().await?;
        let outcome = match self.hash {
            Some(hash) => coordinator.execute_proposal(self.safe, hash).await?,
            None => coordinator.execute_transaction(self.safe).await?,
        };

        if self.connect.format == OutputFormat::Json {
            return print_json(&outcome);
        }

        match outcome {
            ExecutionOutcome::Executed(receipt) => {
                println!("Safe tx hash:   {}", receipt.safe_tx_hash);
                if let Some(tx_hash) = receipt.tx_hash {
                    println!("Transaction:    {tx_hash}");
                }
                match receipt.status {
                    ReceiptStatus::Pending => println!("Status:         pending (not mined yet)"),
                    ReceiptStatus::Success if receipt.already_executed => {
                        println!("Status:         already executed")
                    }
                    ReceiptStatus::Success => println!(
                        "Status:         success ({} confirmations)",
                        receipt.block_confirmations
                    ),
                    ReceiptStatus::Reverted => println!("Status:         reverted"),
                }
            }
            ExecutionOutcome::NotReady(status) => {
                println!("Not ready to execute");
                print_status(&status);
            }
            ExecutionOutcome::NothingPending => {
                println!("Nothing to execute at the current nonce");
            }
        }

        Ok(())
    }
}
