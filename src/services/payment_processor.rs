//! Background verification of confirmed payments

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::settings_service::key_for;
use super::{wallet_service, PaymentContext, PaymentError};
use crate::db;
use crate::models::{format_amount, ChainTransfer, Network, ProcessSummary, Transaction, TransactionStatus, VerificationOutcome};
use crate::utils::extract_clean_error;

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Check one confirmed transaction on chain and settle it when paid
pub async fn verify_transaction(
    ctx: &PaymentContext,
    transaction: &Transaction,
    wallet_address: &str,
    api_keys: &BTreeMap<Network, String>,
    now: DateTime<Utc>,
) -> Result<VerificationOutcome, PaymentError> {
    let network = transaction.network;
    let used_hashes = db::transaction::used_tx_hashes(&ctx.pool, network).await?;

    let outcome = ctx
        .verifier
        .verify(
            network,
            wallet_address,
            transaction.amount,
            key_for(api_keys, network),
            &used_hashes,
            now,
        )
        .await?;

    if let VerificationOutcome::Verified(transfer) = &outcome {
        if !db::transaction::mark_completed(&ctx.pool, &transaction.id, &transfer.tx_hash, now).await? {
            return settled_elsewhere(ctx, &transaction.id).await;
        }
        info!(
            "Transaction {} completed: {} {} (tx {})",
            transaction.id,
            format_amount(transfer.amount),
            network.symbol(),
            transfer.tx_hash
        );

        if transaction.has_client_email() {
            if let Err(e) = ctx.email.send_payment_confirmation(transaction, &transfer.tx_hash).await {
                warn!("Confirmation email for {} not sent: {}", transaction.id, e);
            }
        }
    }

    Ok(outcome)
}

/// Outcome once the row is no longer `confirmed`: a completion by another caller is reported as verified
async fn settled_elsewhere(ctx: &PaymentContext, id: &str) -> Result<VerificationOutcome, PaymentError> {
    let current = db::transaction::get_transaction(&ctx.pool, id)
        .await?
        .ok_or_else(|| PaymentError::NotFound("Transaction not found".to_string()))?;

    match (current.status, current.tx_hash) {
        (TransactionStatus::Completed, Some(tx_hash)) => {
            debug!("Transaction {} was already completed with {}", id, tx_hash);
            Ok(VerificationOutcome::Verified(ChainTransfer {
                tx_hash,
                amount: current.amount,
                timestamp: current.updated_at,
                simulated: false,
            }))
        }
        _ => Err(PaymentError::InvalidState(
            "Transaction is no longer awaiting payment".to_string(),
        )),
    }
}

pub struct PaymentProcessor {
    ctx: PaymentContext,
    interval: Duration,
    cycle: Mutex<()>,
    trigger: Notify,
}

impl PaymentProcessor {
    pub fn new(ctx: PaymentContext, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            interval,
            cycle: Mutex::new(()),
            trigger: Notify::new(),
        })
    }

    /// Verify every confirmed transaction once
    pub async fn process_pending_transactions(&self, now: DateTime<Utc>) -> Result<ProcessSummary, PaymentError> {
        let _cycle = self.cycle.lock().await;

        // keys saved from the admin page apply on the next cycle
        let api_keys = self.ctx.api_keys.load_api_keys(&self.ctx.pool).await?;
        let wallets = wallet_service::wallet_map(&self.ctx.pool).await?;
        let confirmed = db::transaction::list_by_status(&self.ctx.pool, TransactionStatus::Confirmed).await?;

        let mut summary = ProcessSummary::default();
        for transaction in &confirmed {
            summary.checked += 1;

            let Some(wallet_address) = wallets.get(&transaction.network) else {
                warn!(
                    "Skipping {}: no wallet address configured for {}",
                    transaction.id,
                    transaction.network.display_name()
                );
                summary.failed += 1;
                continue;
            };

            match verify_transaction(&self.ctx, transaction, wallet_address, &api_keys, now).await {
                Ok(VerificationOutcome::Verified(_)) => summary.completed += 1,
                Ok(VerificationOutcome::NotFound(message)) => {
                    debug!("Transaction {} still awaiting payment: {}", transaction.id, message);
                }
                Err(PaymentError::Database(e)) => {
                    error!("Database error verifying {}: {}", transaction.id, extract_clean_error(&e.to_string()));
                    summary.failed += 1;
                }
                Err(e) => {
                    error!("Error verifying {}: {}", transaction.id, e);
                    summary.failed += 1;
                }
            }
        }

        if summary.checked > 0 {
            info!(
                "Verification cycle: {} checked, {} completed, {} failed",
                summary.checked, summary.completed, summary.failed
            );
        }
        Ok(summary)
    }

    /// Spawn the periodic verification loop
    pub fn start(self: &Arc<Self>) -> ProcessorHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let processor = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(processor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Payment processor started, checking every {}s", processor.interval.as_secs());

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = processor.trigger.notified() => debug!("Manual verification triggered"),
                    _ = shutdown_rx.changed() => break,
                }

                if let Err(e) = processor.process_pending_transactions(Utc::now()).await {
                    error!("Verification cycle failed: {}", e);
                }
            }

            info!("Payment processor stopped");
        });

        ProcessorHandle {
            processor: Arc::clone(self),
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }
}

pub struct ProcessorHandle {
    processor: Arc<PaymentProcessor>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessorHandle {
    pub async fn is_running(&self) -> bool {
        matches!(self.task.lock().await.as_ref(), Some(task) if !task.is_finished())
    }

    /// Request an immediate cycle; false when the loop is not running
    pub async fn trigger(&self) -> bool {
        if !self.is_running().await {
            return false;
        }
        self.processor.trigger.notify_one();
        true
    }

    /// Signal shutdown and wait for the loop to exit
    pub async fn stop(&self) {
        let Some(mut task) = self.task.lock().await.take() else {
            return;
        };
        let _ = self.shutdown.send(true);

        if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            warn!("Payment processor did not stop within {}s, aborting", STOP_TIMEOUT.as_secs());
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::transaction::{create_transaction, NewTransaction};
    use crate::services::testing::{test_context, test_context_with};

    async fn confirmed_tx(ctx: &PaymentContext, id: &str, network: Network, email: &str) {
        create_transaction(
            &ctx.pool,
            &NewTransaction {
                id,
                amount: 1.25,
                network,
                client_email: email,
                description: None,
                status: TransactionStatus::Confirmed,
            },
            Utc::now(),
        )
        .await
        .unwrap();
    }

    async fn status_of(ctx: &PaymentContext, id: &str) -> TransactionStatus {
        db::transaction::get_transaction(&ctx.pool, id).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_cycle_completes_confirmed_and_counts_failures() {
        let (ctx, mailer) = test_context().await;
        db::wallet::upsert_wallet(&ctx.pool, Network::Solana, "SolMe", Utc::now()).await.unwrap();
        confirmed_tx(&ctx, "paid", Network::Solana, "client@example.com").await;
        confirmed_tx(&ctx, "no-wallet", Network::Bitcoin, "").await;
        create_transaction(
            &ctx.pool,
            &NewTransaction {
                id: "pending",
                amount: 1.0,
                network: Network::Solana,
                client_email: "",
                description: None,
                status: TransactionStatus::Pending,
            },
            Utc::now(),
        )
        .await
        .unwrap();

        let processor = PaymentProcessor::new(ctx.clone(), Duration::from_secs(60));
        let summary = processor.process_pending_transactions(Utc::now()).await.unwrap();
        assert_eq!(
            summary,
            ProcessSummary {
                checked: 2,
                completed: 1,
                failed: 1
            }
        );

        assert_eq!(status_of(&ctx, "paid").await, TransactionStatus::Completed);
        assert_eq!(status_of(&ctx, "no-wallet").await, TransactionStatus::Confirmed);
        assert_eq!(status_of(&ctx, "pending").await, TransactionStatus::Pending);
        assert_eq!(mailer.sent().len(), 1);

        let again = processor.process_pending_transactions(Utc::now()).await.unwrap();
        assert_eq!(again.completed, 0);
    }

    #[tokio::test]
    async fn test_already_completed_by_another_caller_is_verified() {
        let (ctx, mailer) = test_context().await;
        confirmed_tx(&ctx, "raced", Network::Tron, "client@example.com").await;
        let stale = db::transaction::get_transaction(&ctx.pool, "raced").await.unwrap().unwrap();

        // the background cycle settles it first
        assert!(db::transaction::mark_completed(&ctx.pool, "raced", "tron_hash_1", Utc::now()).await.unwrap());

        let keys = BTreeMap::new();
        let outcome = verify_transaction(&ctx, &stale, "TMerchant", &keys, Utc::now()).await.unwrap();
        match outcome {
            VerificationOutcome::Verified(transfer) => assert_eq!(transfer.tx_hash, "tron_hash_1"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(mailer.sent().is_empty());
        let stored = db::transaction::get_transaction(&ctx.pool, "raced").await.unwrap().unwrap();
        assert_eq!(stored.tx_hash.as_deref(), Some("tron_hash_1"));
    }

    #[tokio::test]
    async fn test_pending_row_is_not_reported_as_settled() {
        let (ctx, _) = test_context().await;
        create_transaction(
            &ctx.pool,
            &NewTransaction {
                id: "early",
                amount: 1.0,
                network: Network::Tron,
                client_email: "",
                description: None,
                status: TransactionStatus::Pending,
            },
            Utc::now(),
        )
        .await
        .unwrap();
        let tx = db::transaction::get_transaction(&ctx.pool, "early").await.unwrap().unwrap();

        let result = verify_transaction(&ctx, &tx, "TMerchant", &BTreeMap::new(), Utc::now()).await;
        assert!(matches!(result, Err(PaymentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_explorer_failures_leave_transaction_confirmed() {
        let (ctx, _) = test_context_with(false).await;
        db::wallet::upsert_wallet(&ctx.pool, Network::Ethereum, "0xme", Utc::now()).await.unwrap();
        confirmed_tx(&ctx, "tx", Network::Ethereum, "").await;

        let processor = PaymentProcessor::new(ctx.clone(), Duration::from_secs(60));
        let summary = processor.process_pending_transactions(Utc::now()).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(status_of(&ctx, "tx").await, TransactionStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_trigger_runs_cycle_and_stop_ends_loop() {
        let (ctx, _) = test_context().await;
        db::wallet::upsert_wallet(&ctx.pool, Network::Bnb, "0xbnb", Utc::now()).await.unwrap();

        let processor = PaymentProcessor::new(ctx.clone(), Duration::from_secs(3600));
        let handle = processor.start();
        assert!(handle.is_running().await);

        // let the immediate first tick pass before adding work
        tokio::time::sleep(Duration::from_millis(100)).await;
        confirmed_tx(&ctx, "late", Network::Bnb, "").await;
        assert!(handle.trigger().await);

        let mut completed = false;
        for _ in 0..50 {
            if status_of(&ctx, "late").await == TransactionStatus::Completed {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(completed);

        handle.stop().await;
        assert!(!handle.is_running().await);
        assert!(!handle.trigger().await);
    }
}
