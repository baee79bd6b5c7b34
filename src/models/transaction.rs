//! Transaction models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::network::Network;

const DISPLAY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Lifecycle of a payment: pending -> confirmed -> completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Link created, client has not opened it yet
    Pending,
    /// Client confirmed the payment details; waiting for the on-chain transfer
    Confirmed,
    /// Transfer found on chain
    Completed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment request as stored in `payment_transaction`
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Transaction {
    pub id: String,
    pub amount: f64,
    pub network: Network,
    pub client_email: String,
    pub description: Option<String>,
    pub status: TransactionStatus,
    pub tx_hash: Option<String>,
    pub protocol_signature: Option<String>,
    pub signed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn has_client_email(&self) -> bool {
        !self.client_email.trim().is_empty()
    }

    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            id: self.id.clone(),
            amount: self.amount,
            network: self.network,
            client_email: self.client_email.clone(),
            description: self.description.clone(),
            status: self.status,
            tx_hash: self.tx_hash.clone(),
            signed_at: self.signed_at.map(|t| t.format(DISPLAY_DATE_FORMAT).to_string()),
            created_at: self.created_at.format(DISPLAY_DATE_FORMAT).to_string(),
            updated_at: self.updated_at.format(DISPLAY_DATE_FORMAT).to_string(),
        }
    }
}

/// JSON view of a transaction for API responses
#[derive(Debug, Clone, Serialize)]
pub struct TransactionSummary {
    pub id: String,
    pub amount: f64,
    pub network: Network,
    pub client_email: String,
    pub description: Option<String>,
    pub status: TransactionStatus,
    pub tx_hash: Option<String>,
    pub signed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Format a timestamp the way reports and API responses show it
pub fn display_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(DISPLAY_DATE_FORMAT).to_string()
}
