//! Blockchain verification models

use chrono::{DateTime, Utc};
use serde::Serialize;

/// An incoming transfer found on chain that satisfies a payment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainTransfer {
    pub tx_hash: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub simulated: bool,
}

/// Result of looking for a payment on chain
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Verified(ChainTransfer),
    NotFound(String),
}

impl VerificationOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationOutcome::Verified(_))
    }
}

/// Counters for one pass of the payment processor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    pub checked: usize,
    pub completed: usize,
    pub failed: usize,
}
