//! Explorer API keys: environment fallbacks overlaid by encrypted database values

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use super::PaymentError;
use crate::db;
use crate::models::Network;
use crate::utils::encryption::{decrypt_secret, encrypt_secret, CryptoError};

const FIELD_SUFFIX: &str = "_api_key";

#[derive(Debug, Clone, Default)]
pub struct ApiKeySource {
    encryption_key: Option<String>,
    env_keys: BTreeMap<Network, String>,
}

impl ApiKeySource {
    pub fn new(encryption_key: Option<String>, env_keys: BTreeMap<Network, String>) -> Self {
        Self { encryption_key, env_keys }
    }

    /// Store keys from `<network>_api_key` form fields; returns the networks updated
    pub async fn store_api_keys(
        &self,
        pool: &SqlitePool,
        fields: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Network>, PaymentError> {
        let mut keys = BTreeMap::new();
        for (field, value) in fields {
            let Some(prefix) = field.strip_suffix(FIELD_SUFFIX) else { continue };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let network: Network = prefix.parse().map_err(PaymentError::Validation)?;
            keys.insert(network.explorer_key_network(), value);
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let encryption_key = self
            .encryption_key
            .as_deref()
            .ok_or_else(|| CryptoError::InvalidKey("ENCRYPTION_KEY is not set".to_string()))?;

        for (network, key) in &keys {
            let encrypted = encrypt_secret(key, encryption_key)?;
            db::api_key::store_api_key(pool, *network, &encrypted, now).await?;
            info!("Stored explorer API key for {}", network);
        }

        Ok(keys.into_keys().collect())
    }

    /// Current explorer keys by chain
    pub async fn load_api_keys(&self, pool: &SqlitePool) -> Result<BTreeMap<Network, String>, PaymentError> {
        let mut keys = self.env_keys.clone();

        let stored = db::api_key::list_api_keys(pool).await?;
        if stored.is_empty() {
            return Ok(keys);
        }

        let Some(encryption_key) = self.encryption_key.as_deref() else {
            warn!("{} stored API keys ignored: ENCRYPTION_KEY is not set", stored.len());
            return Ok(keys);
        };

        for row in stored {
            match decrypt_secret(&row.encrypted_key, encryption_key) {
                Ok(key) => {
                    keys.insert(row.network, key);
                }
                Err(e) => warn!("Skipping stored API key for {}: {}", row.network, e),
            }
        }

        Ok(keys)
    }

    /// Keys with all but the last 4 characters hidden
    pub async fn masked_api_keys(&self, pool: &SqlitePool) -> Result<BTreeMap<Network, String>, PaymentError> {
        let keys = self.load_api_keys(pool).await?;
        Ok(keys.into_iter().map(|(network, key)| (network, mask_key(&key))).collect())
    }
}

/// Key for `network`, falling back to its chain's key
pub fn key_for(keys: &BTreeMap<Network, String>, network: Network) -> Option<&str> {
    keys.get(&network)
        .or_else(|| keys.get(&network.explorer_key_network()))
        .map(String::as_str)
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_db_keys_override_env() {
        let pool = test_pool().await;
        let env = BTreeMap::from([
            (Network::Ethereum, "env-eth".to_string()),
            (Network::Bnb, "env-bnb".to_string()),
        ]);
        let source = ApiKeySource::new(Some(KEY.to_string()), env);

        let stored = source
            .store_api_keys(
                &pool,
                &fields(&[("ethereum_api_key", " db-eth-key "), ("tron_api_key", ""), ("csrf_token", "x")]),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(stored, vec![Network::Ethereum]);

        let keys = source.load_api_keys(&pool).await.unwrap();
        assert_eq!(keys[&Network::Ethereum], "db-eth-key");
        assert_eq!(keys[&Network::Bnb], "env-bnb");
        assert_eq!(key_for(&keys, Network::EthUsdt), Some("db-eth-key"));

        let masked = source.masked_api_keys(&pool).await.unwrap();
        assert_eq!(masked[&Network::Ethereum], "****-key");
    }

    #[tokio::test]
    async fn test_store_requires_encryption_key() {
        let pool = test_pool().await;
        let source = ApiKeySource::new(None, BTreeMap::new());
        let err = source
            .store_api_keys(&pool, &fields(&[("solana_api_key", "abc")]), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Crypto(CryptoError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_undecryptable_rows_are_skipped() {
        let pool = test_pool().await;
        db::api_key::store_api_key(&pool, Network::Solana, "not-valid-ciphertext", Utc::now())
            .await
            .unwrap();
        let source = ApiKeySource::new(Some(KEY.to_string()), BTreeMap::new());
        assert!(source.load_api_keys(&pool).await.unwrap().is_empty());
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("abcd"), "****");
        assert_eq!(mask_key("abcdefgh"), "****efgh");
    }
}
