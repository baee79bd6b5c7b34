use anyhow::Result;
use chrono::Utc;
use std::process::ExitCode;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::services::report_service::{self, ReportOutcome};

/// Send the daily report once; a failure or an empty day exits with status 1
pub async fn execute(config: &Config) -> Result<ExitCode> {
    let ctx = super::build_context(config, false).await?;

    let outcome = report_service::send_daily_report(
        &ctx.pool,
        &ctx.email,
        config.reports_email.as_deref(),
        Utc::now(),
    )
    .await;

    match outcome {
        Ok(ReportOutcome::Sent { to, transactions }) => {
            info!("Daily report with {} transactions sent to {}", transactions, to);
            Ok(ExitCode::SUCCESS)
        }
        Ok(ReportOutcome::NoData) => {
            warn!("No transactions today, report not sent");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!("Failed to send daily report: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
