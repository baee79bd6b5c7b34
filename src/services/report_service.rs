//! Daily CSV report of the last 24 hours of payment requests

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use super::email_service::{daily_report_email, Attachment, EmailOptions, EmailService};
use super::PaymentError;
use crate::db;
use crate::models::{display_timestamp, format_amount, Network, TransactionStatus};
use crate::utils::Table;

const CSV_HEADERS: [&str; 9] = [
    "Transaction ID",
    "Amount",
    "Network",
    "Client Email",
    "Status",
    "Transaction Hash",
    "Created At",
    "Updated At",
    "Description",
];

#[derive(Debug, Clone)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub csv: String,
    pub transaction_count: usize,
    /// Completed amount per network, in order of first appearance
    pub totals: Vec<(Network, f64)>,
}

impl DailyReport {
    pub fn filename(&self) -> String {
        format!("crypto_payment_report_{}.csv", self.date.format("%Y-%m-%d"))
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Transactions: {}", self.transaction_count)];
        lines.extend(
            self.totals
                .iter()
                .map(|(network, total)| format!("{}: {} {}", network, format_amount(*total), network.symbol())),
        );
        lines
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Sent { to: String, transactions: usize },
    NoData,
}

pub async fn generate_daily_report(pool: &SqlitePool, now: DateTime<Utc>) -> Result<Option<DailyReport>, PaymentError> {
    let transactions = db::transaction::list_transactions_since(pool, now - Duration::hours(24)).await?;
    if transactions.is_empty() {
        info!("No transactions found in the last 24 hours");
        return Ok(None);
    }

    let mut table = Table::new(CSV_HEADERS.to_vec());
    let mut totals: Vec<(Network, f64)> = Vec::new();

    for tx in &transactions {
        table.add_row(&[
            tx.id.clone(),
            format_amount(tx.amount),
            tx.network.to_string(),
            tx.client_email.clone(),
            tx.status.to_string(),
            tx.tx_hash.clone().unwrap_or_else(|| "N/A".to_string()),
            display_timestamp(&tx.created_at),
            display_timestamp(&tx.updated_at),
            tx.description.clone().unwrap_or_else(|| "N/A".to_string()),
        ]);

        let index = match totals.iter().position(|(network, _)| *network == tx.network) {
            Some(index) => index,
            None => {
                totals.push((tx.network, 0.0));
                totals.len() - 1
            }
        };
        if tx.status == TransactionStatus::Completed {
            totals[index].1 += tx.amount;
        }
    }

    table.add_row::<&str>(&[]);
    table.add_row(&["SUMMARY"]);
    table.add_row(&["Network", "Total Completed Amount"]);
    for (network, total) in &totals {
        table.add_row(&[network.to_string(), format_amount(*total)]);
    }

    Ok(Some(DailyReport {
        date: now.date_naive(),
        csv: table.render_csv(),
        transaction_count: transactions.len(),
        totals,
    }))
}

/// Email the report to `reports_email`; delivered directly, never queued
pub async fn send_daily_report(
    pool: &SqlitePool,
    email: &EmailService,
    reports_email: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ReportOutcome, PaymentError> {
    let to = reports_email
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| PaymentError::Validation("REPORTS_EMAIL is not set".to_string()))?;

    let Some(report) = generate_daily_report(pool, now).await? else {
        return Ok(ReportOutcome::NoData);
    };

    let (subject, body) = daily_report_email(&report.date.format("%Y-%m-%d").to_string(), &report.summary_lines());
    let options = EmailOptions {
        attachments: vec![Attachment {
            filename: report.filename(),
            content_type: "text/csv".to_string(),
            data: report.csv.clone().into_bytes(),
        }],
        ..Default::default()
    };

    email.send_direct(to, &subject, body, options).await?;
    info!("Daily report sent to {} ({} transactions)", to, report.transaction_count);

    Ok(ReportOutcome::Sent {
        to: to.to_string(),
        transactions: report.transaction_count,
    })
}

/// First run strictly after `now` at `time` UTC
pub fn next_run_after(now: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    let today = Utc.from_utc_datetime(&now.date_naive().and_time(time));
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

/// Send the report every day at `time` UTC until `shutdown` fires
pub async fn run_scheduler(
    pool: SqlitePool,
    email: Arc<EmailService>,
    reports_email: Option<String>,
    time: NaiveTime,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Report scheduler started, daily at {} UTC", time.format("%H:%M"));
    loop {
        let now = Utc::now();
        let next = next_run_after(now, time);
        let wait = (next - now).to_std().unwrap_or_default();

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => break,
        }

        match send_daily_report(&pool, &email, reports_email.as_deref(), Utc::now()).await {
            Ok(ReportOutcome::Sent { to, .. }) => info!("Scheduled report delivered to {}", to),
            Ok(ReportOutcome::NoData) => info!("Scheduled report skipped: no transactions"),
            Err(e) => error!("Scheduled report failed: {}", e),
        }
    }
    info!("Report scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::db::transaction::{create_transaction, mark_completed, mark_confirmed, NewTransaction};
    use crate::services::email_service::testing::recording_service;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    async fn add(pool: &SqlitePool, id: &str, network: Network, amount: f64, created: DateTime<Utc>) {
        create_transaction(
            pool,
            &NewTransaction {
                id,
                amount,
                network,
                client_email: "client@example.com",
                description: None,
                status: TransactionStatus::Pending,
            },
            created,
        )
        .await
        .unwrap();
    }

    async fn complete(pool: &SqlitePool, id: &str, hash: &str, when: DateTime<Utc>) {
        mark_confirmed(pool, id, when).await.unwrap();
        mark_completed(pool, id, hash, when).await.unwrap();
    }

    #[tokio::test]
    async fn test_report_csv_and_summary() {
        let pool = test_pool().await;
        let now = at(12, 0);
        add(&pool, "old", Network::Bitcoin, 9.0, now - Duration::hours(30)).await;
        add(&pool, "a", Network::Ethereum, 0.5, now - Duration::hours(5)).await;
        add(&pool, "b", Network::Bitcoin, 0.25, now - Duration::hours(4)).await;
        add(&pool, "c", Network::Ethereum, 1.0, now - Duration::hours(3)).await;
        complete(&pool, "a", "0xa", now - Duration::hours(2)).await;
        complete(&pool, "c", "0xc", now - Duration::hours(1)).await;

        let report = generate_daily_report(&pool, now).await.unwrap().unwrap();
        assert_eq!(report.transaction_count, 3);
        assert_eq!(report.totals, vec![(Network::Ethereum, 1.5), (Network::Bitcoin, 0.0)]);
        assert_eq!(report.filename(), "crypto_payment_report_2024-05-01.csv");

        let lines: Vec<&str> = report.csv.split("\r\n").collect();
        assert_eq!(
            lines[0],
            "Transaction ID,Amount,Network,Client Email,Status,Transaction Hash,Created At,Updated At,Description"
        );
        assert_eq!(
            lines[1],
            "a,0.5,ethereum,client@example.com,completed,0xa,2024-05-01 07:00:00,2024-05-01 10:00:00,N/A"
        );
        assert_eq!(lines[2], "b,0.25,bitcoin,client@example.com,pending,N/A,2024-05-01 08:00:00,2024-05-01 08:00:00,N/A");
        assert_eq!(&lines[4..9], &["", "SUMMARY", "Network,Total Completed Amount", "ethereum,1.5", "bitcoin,0"]);
    }

    #[tokio::test]
    async fn test_send_report_attaches_csv() {
        let pool = test_pool().await;
        let now = at(12, 0);
        add(&pool, "a", Network::Tron, 10.0, now - Duration::hours(1)).await;
        let (mailer, email) = recording_service(true);

        let err = send_daily_report(&pool, &email, None, now).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));

        let outcome = send_daily_report(&pool, &email, Some("reports@example.com"), now).await.unwrap();
        assert_eq!(
            outcome,
            ReportOutcome::Sent {
                to: "reports@example.com".to_string(),
                transactions: 1
            }
        );

        // delivered without starting the worker
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Daily Crypto Payment Report - 2024-05-01");
        assert_eq!(sent[0].options.attachments[0].filename, "crypto_payment_report_2024-05-01.csv");
    }

    #[tokio::test]
    async fn test_no_data_is_reported() {
        let pool = test_pool().await;
        let (mailer, email) = recording_service(false);
        let outcome = send_daily_report(&pool, &email, Some("reports@example.com"), at(12, 0)).await.unwrap();
        assert_eq!(outcome, ReportOutcome::NoData);
        assert!(mailer.sent().is_empty());
    }

    #[test]
    fn test_next_run_after() {
        let time = NaiveTime::from_hms_opt(0, 5, 0).unwrap();
        assert_eq!(next_run_after(at(0, 1), time), at(0, 5));
        assert_eq!(next_run_after(at(0, 5), time), at(0, 5) + Duration::days(1));
        assert_eq!(next_run_after(at(23, 59), time), at(0, 5) + Duration::days(1));
    }
}
