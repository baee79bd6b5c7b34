use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::PaymentError;
use crate::db;
use crate::models::Network;

/// Store every `WALLET_ADDRESS_*` from the environment; returns how many were stored
pub async fn sync_from_config(
    pool: &SqlitePool,
    wallets: &BTreeMap<Network, String>,
    now: DateTime<Utc>,
) -> Result<usize, PaymentError> {
    let mut stored = 0;
    for network in Network::ALL {
        match wallets.get(&network).map(|a| a.trim()).filter(|a| !a.is_empty()) {
            Some(address) => {
                db::wallet::upsert_wallet(pool, network, address, now).await?;
                info!("Wallet address for {}: {}", network.display_name(), address);
                stored += 1;
            }
            None => warn!(
                "WALLET_ADDRESS_{} is not set, {} payments are unavailable",
                network.wallet_env_suffix(),
                network.display_name()
            ),
        }
    }
    Ok(stored)
}

/// Replace wallet addresses from a network -> address map, all or nothing
pub async fn update_wallets(
    pool: &SqlitePool,
    updates: &BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> Result<Vec<Network>, PaymentError> {
    let mut parsed = Vec::new();
    for (key, address) in updates {
        let network: Network = key.parse().map_err(PaymentError::Validation)?;
        let address = address.trim();
        if !address.is_empty() {
            parsed.push((network, address));
        }
    }

    let mut tx = pool.begin().await?;
    for (network, address) in &parsed {
        db::wallet::upsert_wallet(&mut *tx, *network, address, now).await?;
    }
    tx.commit().await?;

    let updated: Vec<Network> = parsed.into_iter().map(|(network, _)| network).collect();
    info!("Updated {} wallet addresses", updated.len());
    Ok(updated)
}

pub async fn wallet_map(pool: &SqlitePool) -> Result<BTreeMap<Network, String>, PaymentError> {
    let wallets = db::wallet::list_wallets(pool).await?;
    Ok(wallets.into_iter().map(|w| (w.network, w.address)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn test_sync_stores_configured_wallets() {
        let pool = test_pool().await;
        let wallets = BTreeMap::from([
            (Network::Bitcoin, "bc1qmine".to_string()),
            (Network::Tron, "   ".to_string()),
        ]);

        assert_eq!(sync_from_config(&pool, &wallets, Utc::now()).await.unwrap(), 1);
        let map = wallet_map(&pool).await.unwrap();
        assert_eq!(map.get(&Network::Bitcoin).map(String::as_str), Some("bc1qmine"));
        assert!(!map.contains_key(&Network::Tron));
    }

    #[tokio::test]
    async fn test_update_trims_and_skips_blank() {
        let pool = test_pool().await;
        let updates = BTreeMap::from([
            ("eth".to_string(), "  0xabc  ".to_string()),
            ("solana".to_string(), String::new()),
        ]);

        let updated = update_wallets(&pool, &updates, Utc::now()).await.unwrap();
        assert_eq!(updated, vec![Network::Ethereum]);
        assert_eq!(
            db::wallet::get_wallet_address(&pool, Network::Ethereum).await.unwrap().as_deref(),
            Some("0xabc")
        );
    }

    #[tokio::test]
    async fn test_unknown_network_rejects_whole_update() {
        let pool = test_pool().await;
        let updates = BTreeMap::from([
            ("bitcoin".to_string(), "bc1q".to_string()),
            ("dogecoin".to_string(), "D123".to_string()),
        ]);

        let err = update_wallets(&pool, &updates, Utc::now()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(msg) if msg.contains("dogecoin")));
        assert!(wallet_map(&pool).await.unwrap().is_empty());
    }
}
