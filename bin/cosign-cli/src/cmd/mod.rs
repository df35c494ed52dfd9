pub mod account;
pub mod confirm;
pub mod deploy;
pub mod execute;
pub mod pending;
pub mod propose;
pub mod typed_data;

use clap::{Args, ValueEnum};
use cosign_coordinator::{
    AgentSigner, ConfirmationStatus, Coordinator, CoordinatorConfig, RpcChain, SafeAccount,
    SafeServiceClient,
};
use eyre::{Result, WrapErr};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Options shared by every subcommand that talks to the chain or the relay.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Path to coordinator config file (defaults to ./cosign.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chain RPC URL (overrides config)
    #[arg(long)]
    rpc_url: Option<String>,

    /// Safe Transaction Service URL (overrides config)
    #[arg(long)]
    relay_url: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
}

impl ConnectArgs {
    pub fn load_config(&self) -> Result<CoordinatorConfig> {
        let mut config = CoordinatorConfig::load(self.config.as_deref())
            .wrap_err("failed to load coordinator config")?;
        if let Some(rpc_url) = &self.rpc_url {
            config.rpc_url = rpc_url.clone();
        }
        if let Some(relay_url) = &self.relay_url {
            config.relay_url = relay_url.clone();
        }
        config.validate()?;
        Ok(config)
    }

    pub async fn coordinator(&self) -> Result<Coordinator<RpcChain, SafeServiceClient>> {
        let config = self.load_config()?;
        let signer = AgentSigner::from_env(&config.agent_key_env)
            .wrap_err_with(|| format!("agent key not available from ${}", config.agent_key_env))?;
        debug!(
            agent = %signer.address(),
            rpc = %config.rpc_url,
            relay = %config.relay_url,
            "Connecting"
        );

        Coordinator::connect(config, signer).await.wrap_err("failed to connect")
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_account(account: &SafeAccount) {
    println!("Safe:       {}", account.address);
    println!("Deployed:   {}", account.deployed);
    println!("Threshold:  {}/{}", account.threshold, account.owners.len());
    println!("Nonce:      {}", account.nonce);
    println!("Owners:");
    for owner in &account.owners {
        println!("  {owner}");
    }
}

pub fn print_status(status: &ConfirmationStatus) {
    println!("Safe tx hash:  {}", status.safe_tx_hash);
    println!("Nonce:         {}", status.nonce);
    println!("Status:        {status}");
    if !status.signers.is_empty() {
        println!("Signed by:");
        for signer in &status.signers {
            println!("  {signer}");
        }
    }
}
