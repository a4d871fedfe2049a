use anyhow::Result;
use clap::Parser;
use shadow_ledger::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    shadow_ledger::telemetry::init(cli.verbose);
    cli.run().await
}
