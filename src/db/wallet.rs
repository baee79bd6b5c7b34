use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{Executor, Sqlite};

use crate::models::{Network, WalletAddress};

/// Insert or replace the receiving address for a network
pub async fn upsert_wallet<'e, E>(
    executor: E,
    network: Network,
    address: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO wallet_address (network, address, created_at, updated_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(network) DO UPDATE SET address = excluded.address, updated_at = excluded.updated_at",
    )
    .bind(network)
    .bind(address)
    .bind(now)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

/// Get the receiving address for a network
pub async fn get_wallet_address(pool: &SqlitePool, network: Network) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT address FROM wallet_address WHERE network = ?")
        .bind(network)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.0))
}

/// All configured wallets ordered by network
pub async fn list_wallets(pool: &SqlitePool) -> Result<Vec<WalletAddress>, sqlx::Error> {
    sqlx::query_as::<_, WalletAddress>(
        "SELECT network, address, created_at, updated_at FROM wallet_address ORDER BY network",
    )
    .fetch_all(pool)
    .await
}
