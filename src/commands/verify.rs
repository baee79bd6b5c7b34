use anyhow::Result;
use chrono::Utc;
use std::time::Duration;

use crate::config::Config;
use crate::services::payment_processor::PaymentProcessor;

/// Run a single verification cycle and print what happened
pub async fn execute(config: &Config) -> Result<()> {
    let ctx = super::build_context(config, false).await?;
    let processor = PaymentProcessor::new(ctx, Duration::ZERO);

    let summary = processor.process_pending_transactions(Utc::now()).await?;
    println!(
        "Checked {} transactions: {} completed, {} awaiting payment, {} failed",
        summary.checked,
        summary.completed,
        summary.checked - summary.completed - summary.failed,
        summary.failed
    );
    Ok(())
}
