mod cli;
mod common;
mod crm;
mod error;
mod extract;
mod model;
mod pipeline;
mod portal;
mod server;
#[cfg(test)]
mod testing;

use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = cli::Args::parse();

    match args.cmd {
        cli::Command::Serve(cmd) => server::run(cmd).await.context("serve failed"),
        cli::Command::Login(cmd) => server::login(cmd).await.context("login failed"),
    }
}
