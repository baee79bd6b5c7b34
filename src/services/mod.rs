use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

use crate::api::coingecko::RatesError;
use crate::api::explorer::ExplorerError;
use crate::models::Network;
use crate::utils::encryption::CryptoError;

pub mod email_service;
pub mod exchange_service;
pub mod payment_link_service;
pub mod payment_processor;
pub mod report_service;
pub mod settings_service;
pub mod verification_service;
pub mod wallet_service;

use email_service::{EmailError, EmailService};
use settings_service::ApiKeySource;
use verification_service::BlockchainVerifier;

/// Errors surfaced by payment operations
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Validation(String),
    #[error("No wallet address configured for {}", .0.display_name())]
    NoWallet(Network),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Email(#[from] EmailError),
    #[error(transparent)]
    Explorer(#[from] ExplorerError),
    #[error(transparent)]
    Rates(#[from] RatesError),
}

/// Shared handles used by the payment services
#[derive(Clone)]
pub struct PaymentContext {
    pub pool: SqlitePool,
    pub verifier: Arc<BlockchainVerifier>,
    pub email: Arc<EmailService>,
    pub api_keys: ApiKeySource,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::api::explorer::{ExplorerClient, ExplorerEndpoints};
    use crate::services::email_service::testing::{recording_service, RecordingMailer};
    use std::collections::BTreeMap;

    /// Simulating verifier, recording mailer and a fresh in-memory database;
    /// without simulation every explorer request fails fast
    pub async fn test_context() -> (PaymentContext, Arc<RecordingMailer>) {
        test_context_with(true).await
    }

    pub async fn test_context_with(simulation_mode: bool) -> (PaymentContext, Arc<RecordingMailer>) {
        let pool = crate::db::test_pool().await;
        let closed = "http://127.0.0.1:9".to_string();
        let endpoints = ExplorerEndpoints {
            blockchain_info: closed.clone(),
            etherscan: closed.clone(),
            bscscan: closed.clone(),
            tronscan: closed.clone(),
            solscan: closed,
        };
        let verifier = BlockchainVerifier::new(
            ExplorerClient::with_endpoints(endpoints).expect("http client"),
            simulation_mode,
            chrono::Duration::minutes(60),
        );
        let (mailer, email) = recording_service(false);
        let ctx = PaymentContext {
            pool,
            verifier: Arc::new(verifier),
            email: Arc::new(email),
            api_keys: ApiKeySource::new(None, BTreeMap::new()),
        };
        (ctx, mailer)
    }
}
