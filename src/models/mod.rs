//! Data models shared by the database, services and HTTP layers

pub mod network;
pub mod transaction;
pub mod verification;
pub mod wallet;

pub use network::{format_amount, Network, TokenContract};
pub use transaction::{display_timestamp, Transaction, TransactionStatus, TransactionSummary};
pub use verification::{ChainTransfer, ProcessSummary, VerificationOutcome};
pub use wallet::{StoredApiKey, WalletAddress};
