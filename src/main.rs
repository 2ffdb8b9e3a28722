mod api;
mod cli;
mod controller;
mod display;
mod error;
mod model;
mod validate;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::init_tracing(args.verbose);

    cli::run(args).await
}
