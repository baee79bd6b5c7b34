pub mod client;

pub use client::{CoinGeckoClient, RatesError, SimplePrice};
