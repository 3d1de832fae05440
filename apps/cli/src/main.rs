//! ABM CLI: run contacts through the enrichment → targeting → CRM/summary
//! pipeline, and inspect past runs.

mod commands;
mod setup;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
