//! Wallet and API key models

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::network::Network;

/// Receiving address configured for a network
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WalletAddress {
    pub network: Network,
    pub address: String,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub updated_at: DateTime<Utc>,
}

/// Explorer API key row; the key itself stays encrypted
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredApiKey {
    pub network: Network,
    pub encrypted_key: String,
    pub updated_at: DateTime<Utc>,
}
