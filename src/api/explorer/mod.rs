pub mod client;
pub mod models;

pub use client::{ExplorerClient, ExplorerEndpoints};
pub use models::{ExplorerData, ExplorerError};
