//! Command line entry points

pub mod report;
pub mod serve;
pub mod verify;
pub mod wallets;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;

use crate::api::explorer::ExplorerClient;
use crate::config::Config;
use crate::services::email_service::{EmailService, RetryPolicy};
use crate::services::settings_service::ApiKeySource;
use crate::services::verification_service::BlockchainVerifier;
use crate::services::PaymentContext;

#[derive(Parser)]
#[command(name = "paylink")]
#[command(about = "Cryptocurrency payment links with on-chain confirmation")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq, Debug)]
pub enum Commands {
    /// Run the HTTP server with the background payment processor
    Serve,

    /// Email today's transaction report to REPORTS_EMAIL
    SendReport,

    /// Print the receiving wallet addresses stored in the database
    CheckWallets,

    /// Copy WALLET_ADDRESS_* variables into the database
    UpdateWallets,

    /// Run one verification cycle over confirmed transactions
    VerifyPending,
}

pub async fn run(cli: Cli, config: Config) -> Result<ExitCode> {
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve::execute(config).await.map(|_| ExitCode::SUCCESS),
        Commands::SendReport => report::execute(&config).await,
        Commands::CheckWallets => wallets::check(&config).await.map(|_| ExitCode::SUCCESS),
        Commands::UpdateWallets => wallets::update(&config).await.map(|_| ExitCode::SUCCESS),
        Commands::VerifyPending => verify::execute(&config).await.map(|_| ExitCode::SUCCESS),
    }
}

/// Open the database and wire verifier, mailer and key store together
pub async fn build_context(config: &Config, background_email: bool) -> Result<PaymentContext> {
    let pool = crate::db::init_db(&config.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    let explorer = ExplorerClient::new().context("Failed to build explorer client")?;
    let verifier = BlockchainVerifier::new(explorer, config.simulation_mode, config.verify_max_age);

    let retry = RetryPolicy {
        max_retries: config.email_max_retries,
        delay: config.email_retry_delay,
    };
    let email = EmailService::from_settings(config.email.as_ref(), retry, background_email)
        .context("Failed to configure email")?;

    Ok(PaymentContext {
        pool,
        verifier: Arc::new(verifier),
        email: Arc::new(email),
        api_keys: ApiKeySource::new(config.encryption_key.clone(), config.explorer_api_keys.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_is_default() {
        let cli = Cli::try_parse_from(["paylink"]).unwrap();
        assert_eq!(cli.command, None);

        let cli = Cli::try_parse_from(["paylink", "send-report"]).unwrap();
        assert_eq!(cli.command, Some(Commands::SendReport));

        let cli = Cli::try_parse_from(["paylink", "verify-pending"]).unwrap();
        assert_eq!(cli.command, Some(Commands::VerifyPending));

        assert!(Cli::try_parse_from(["paylink", "unknown"]).is_err());
    }
}
