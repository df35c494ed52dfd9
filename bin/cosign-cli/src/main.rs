use clap::Parser;
use opts::{CosignCli, CosignSubcommand};

mod cmd;
mod opts;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CosignCli::parse();

    match args.cmd {
        CosignSubcommand::Account(cmd) => cmd.run().await,
        CosignSubcommand::Deploy(cmd) => cmd.run().await,
        CosignSubcommand::Propose(cmd) => cmd.run().await,
        CosignSubcommand::Pending(cmd) => cmd.run().await,
        CosignSubcommand::Confirm(cmd) => cmd.run().await,
        CosignSubcommand::Execute(cmd) => cmd.run().await,
        CosignSubcommand::TypedData(cmd) => cmd.run().await,
    }
}
