use crate::cmd::{
    account::AccountArgs, confirm::ConfirmArgs, deploy::DeployArgs, execute::ExecuteArgs,
    pending::PendingArgs, propose::ProposeArgs, typed_data::TypedDataArgs,
};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cosign")]
#[command(version, about = "Coordinate Safe transactions co-signed by an agent", long_about = None)]
pub struct CosignCli {
    #[command(subcommand)]
    pub cmd: CosignSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CosignSubcommand {
    /// Show the Safe shared with an owner (predicted if not deployed)
    Account(AccountArgs),

    /// Deploy the Safe shared with an owner
    Deploy(DeployArgs),

    /// Propose a transaction, reusing a pending duplicate when there is one
    Propose(ProposeArgs),

    /// List pending proposals and their confirmations
    Pending(PendingArgs),

    /// Add the agent's confirmation to a proposal
    Confirm(ConfirmArgs),

    /// Execute the next proposal, or a specific one
    Execute(ExecuteArgs),

    /// Print the EIP-712 payload owners sign for a proposal
    TypedData(TypedDataArgs),
}
