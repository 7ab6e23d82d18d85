// src/main.rs

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod broker;
mod config;
mod error;
mod output;
mod sys;

use crate::broker::CredentialBroker;
use crate::config::{BrokerConfig, Cli};
use crate::error::BrokerError;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // ==============================================================================
    // 1. Logging (stderr only)
    // ==============================================================================

    // stdout is reserved for the credential_process response.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("credproc: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BrokerError> {
    // ==============================================================================
    // 2. Configuration
    // ==============================================================================

    let config = BrokerConfig::resolve(cli).await?;

    // ==============================================================================
    // 3. Acquisition & Output
    // ==============================================================================

    let broker = CredentialBroker::new(&config);
    let creds = broker.acquire().await?;

    let mut stdout = io::stdout().lock();
    output::write(&creds, config.output, &mut stdout)?;
    Ok(())
}
