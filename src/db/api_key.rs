use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::models::{Network, StoredApiKey};

/// Store an encrypted explorer API key, replacing any previous one
pub async fn store_api_key(
    pool: &SqlitePool,
    network: Network,
    encrypted_key: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO blockchain_api_key (network, encrypted_key, created_at, updated_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(network) DO UPDATE SET encrypted_key = excluded.encrypted_key, updated_at = excluded.updated_at",
    )
    .bind(network)
    .bind(encrypted_key)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// All stored keys, still encrypted
pub async fn list_api_keys(pool: &SqlitePool) -> Result<Vec<StoredApiKey>, sqlx::Error> {
    sqlx::query_as::<_, StoredApiKey>(
        "SELECT network, encrypted_key, updated_at FROM blockchain_api_key ORDER BY network",
    )
    .fetch_all(pool)
    .await
}
