use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use crate::models::{Network, Transaction, TransactionStatus};

const SELECT_COLUMNS: &str = "SELECT id, amount, network, client_email, description, status, tx_hash, \
     protocol_signature, signed_at, created_at, updated_at FROM payment_transaction";

/// Fields needed to create a payment request
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub id: &'a str,
    pub amount: f64,
    pub network: Network,
    pub client_email: &'a str,
    pub description: Option<&'a str>,
    pub status: TransactionStatus,
}

/// Create a new transaction record
pub async fn create_transaction(
    pool: &SqlitePool,
    new: &NewTransaction<'_>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO payment_transaction (id, amount, network, client_email, description, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(new.id)
    .bind(new.amount)
    .bind(new.network)
    .bind(new.client_email)
    .bind(new.description)
    .bind(new.status)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get transaction by id
pub async fn get_transaction(pool: &SqlitePool, id: &str) -> Result<Option<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// List transactions newest first, optionally limited
pub async fn list_transactions(pool: &SqlitePool, limit: Option<u32>) -> Result<Vec<Transaction>, sqlx::Error> {
    // SQLite treats a negative LIMIT as "no limit"
    let limit = limit.map(i64::from).unwrap_or(-1);
    sqlx::query_as::<_, Transaction>(&format!("{} ORDER BY created_at DESC, id LIMIT ?", SELECT_COLUMNS))
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Transactions created at or after `since`, oldest first
pub async fn list_transactions_since(
    pool: &SqlitePool,
    since: DateTime<Utc>,
) -> Result<Vec<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!("{} WHERE created_at >= ? ORDER BY created_at, id", SELECT_COLUMNS))
        .bind(since)
        .fetch_all(pool)
        .await
}

/// Transactions in the given status, oldest first
pub async fn list_by_status(
    pool: &SqlitePool,
    status: TransactionStatus,
) -> Result<Vec<Transaction>, sqlx::Error> {
    sqlx::query_as::<_, Transaction>(&format!("{} WHERE status = ? ORDER BY created_at, id", SELECT_COLUMNS))
        .bind(status)
        .fetch_all(pool)
        .await
}

pub async fn count_transactions(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payment_transaction")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// pending -> confirmed; returns false when the transaction was not pending
pub async fn mark_confirmed(pool: &SqlitePool, id: &str, now: DateTime<Utc>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE payment_transaction SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
        .bind(TransactionStatus::Confirmed)
        .bind(now)
        .bind(id)
        .bind(TransactionStatus::Pending)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Store the client's protocol signature; only allowed while confirmed
pub async fn record_signature(
    pool: &SqlitePool,
    id: &str,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE payment_transaction SET protocol_signature = ?, signed_at = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(signature)
    .bind(now)
    .bind(now)
    .bind(id)
    .bind(TransactionStatus::Confirmed)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// confirmed -> completed with the settling transfer's hash
pub async fn mark_completed(
    pool: &SqlitePool,
    id: &str,
    tx_hash: &str,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE payment_transaction SET status = ?, tx_hash = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(TransactionStatus::Completed)
    .bind(tx_hash)
    .bind(now)
    .bind(id)
    .bind(TransactionStatus::Confirmed)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Hashes already used to settle payments on `network`
pub async fn used_tx_hashes(pool: &SqlitePool, network: Network) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT tx_hash FROM payment_transaction WHERE network = ? AND tx_hash IS NOT NULL")
            .bind(network)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::{Duration, TimeZone};

    fn new_tx<'a>(id: &'a str, network: Network) -> NewTransaction<'a> {
        NewTransaction {
            id,
            amount: 0.5,
            network,
            client_email: "client@example.com",
            description: Some("Invoice 7"),
            status: TransactionStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = test_pool().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        create_transaction(&pool, &new_tx("tx-1", Network::Solana), now).await.unwrap();

        let tx = get_transaction(&pool, "tx-1").await.unwrap().expect("stored");
        assert_eq!(tx.amount, 0.5);
        assert_eq!(tx.network, Network::Solana);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.description.as_deref(), Some("Invoice 7"));
        assert_eq!(tx.created_at, now);
        assert!(get_transaction(&pool, "missing").await.unwrap().is_none());
        assert_eq!(count_transactions(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_status_only_moves_forward() {
        let pool = test_pool().await;
        let now = Utc::now();
        create_transaction(&pool, &new_tx("tx-1", Network::Ethereum), now).await.unwrap();

        // cannot complete or sign before confirmation
        assert!(!mark_completed(&pool, "tx-1", "0xhash", now).await.unwrap());
        assert!(!record_signature(&pool, "tx-1", "sig", now).await.unwrap());

        assert!(mark_confirmed(&pool, "tx-1", now).await.unwrap());
        assert!(!mark_confirmed(&pool, "tx-1", now).await.unwrap());
        assert!(record_signature(&pool, "tx-1", "sig", now).await.unwrap());
        assert!(mark_completed(&pool, "tx-1", "0xhash", now).await.unwrap());
        assert!(!mark_completed(&pool, "tx-1", "0xother", now).await.unwrap());

        let tx = get_transaction(&pool, "tx-1").await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.tx_hash.as_deref(), Some("0xhash"));
        assert_eq!(tx.protocol_signature.as_deref(), Some("sig"));
        assert_eq!(used_tx_hashes(&pool, Network::Ethereum).await.unwrap(), vec!["0xhash".to_string()]);
        assert!(used_tx_hashes(&pool, Network::Bnb).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tx_hash_cannot_settle_two_payments() {
        let pool = test_pool().await;
        let now = Utc::now();
        for id in ["a", "b"] {
            create_transaction(&pool, &new_tx(id, Network::Bitcoin), now).await.unwrap();
            mark_confirmed(&pool, id, now).await.unwrap();
        }

        mark_completed(&pool, "a", "same-hash", now).await.unwrap();
        assert!(mark_completed(&pool, "b", "same-hash", now).await.is_err());
    }

    #[tokio::test]
    async fn test_listing_order_and_window() {
        let pool = test_pool().await;
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        create_transaction(&pool, &new_tx("old", Network::Tron), base - Duration::days(2)).await.unwrap();
        create_transaction(&pool, &new_tx("mid", Network::Tron), base - Duration::hours(3)).await.unwrap();
        create_transaction(&pool, &new_tx("new", Network::Tron), base).await.unwrap();

        let all = list_transactions(&pool, None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);

        assert_eq!(list_transactions(&pool, Some(2)).await.unwrap().len(), 2);

        let recent = list_transactions_since(&pool, base - Duration::days(1)).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["mid", "new"]);

        mark_confirmed(&pool, "mid", base).await.unwrap();
        let confirmed = list_by_status(&pool, TransactionStatus::Confirmed).await.unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, "mid");
    }
}
