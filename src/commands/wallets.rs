use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::models::display_timestamp;
use crate::services::wallet_service;
use crate::utils::Table;

/// Print stored wallet addresses
pub async fn check(config: &Config) -> Result<()> {
    let pool = db::init_db(&config.database_url).await?;
    let wallets = db::wallet::list_wallets(&pool).await?;

    if wallets.is_empty() {
        println!("No wallet addresses configured");
        return Ok(());
    }

    let mut table = Table::new(vec!["Network", "Address", "Updated"]);
    for wallet in &wallets {
        table.add_row(&[
            wallet.network.display_name(),
            wallet.address.as_str(),
            display_timestamp(&wallet.updated_at).as_str(),
        ]);
    }
    print!("{}", table.render());
    Ok(())
}

/// Sync WALLET_ADDRESS_* variables into the database
pub async fn update(config: &Config) -> Result<()> {
    let pool = db::init_db(&config.database_url).await?;
    let updated = wallet_service::sync_from_config(&pool, &config.wallet_addresses, Utc::now()).await?;
    info!("Updated {} wallet addresses", updated);
    println!("Updated {} wallet addresses", updated);
    Ok(())
}
