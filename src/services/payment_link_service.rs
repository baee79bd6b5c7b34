//! Payment request lifecycle as seen by the payer: link creation,
//! confirmation, protocol signing and Trust Wallet deep links

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::payment_processor::verify_transaction;
use super::{PaymentContext, PaymentError};
use crate::db;
use crate::db::transaction::NewTransaction;
use crate::models::{format_amount, Network, Transaction, TransactionStatus, VerificationOutcome};
use crate::utils::{looks_like_email, random_hex};

const TRUST_DEEP_LINK: &str = "trust://send";
const TRUST_WEB_LINK: &str = "https://link.trustwallet.com/send";
const WALLET_LINK_VERSION: &str = "1.0";
const MAX_SIGNATURE_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletLinks {
    pub deep_link: String,
    pub web_link: String,
}

#[derive(Debug, Clone)]
pub struct CreatedLink {
    pub transaction: Transaction,
    pub payment_link: String,
}

#[derive(Debug, Clone)]
pub struct ConfirmedPayment {
    pub transaction: Transaction,
    pub wallet_address: String,
    pub links: WalletLinks,
    pub currency_symbol: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignOutcome {
    /// Payment found on chain, transaction completed
    Completed { tx_hash: String },
    /// Nothing on chain yet; the payer should send with these links
    AwaitingPayment { links: WalletLinks },
}

fn validate_amount(amount: f64) -> Result<f64, PaymentError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(amount)
    } else {
        Err(PaymentError::Validation("Amount must be a positive number".to_string()))
    }
}

fn clean_description(description: Option<&str>) -> Option<&str> {
    description.map(str::trim).filter(|d| !d.is_empty())
}

async fn require_wallet(ctx: &PaymentContext, network: Network) -> Result<String, PaymentError> {
    db::wallet::get_wallet_address(&ctx.pool, network)
        .await?
        .ok_or(PaymentError::NoWallet(network))
}

async fn load_transaction(ctx: &PaymentContext, id: &str) -> Result<Transaction, PaymentError> {
    db::transaction::get_transaction(&ctx.pool, id)
        .await?
        .ok_or_else(|| PaymentError::NotFound("Transaction not found".to_string()))
}

/// Trust Wallet send links for `amount` to `address`
pub fn wallet_links(
    network: Network,
    address: &str,
    amount: f64,
    description: Option<&str>,
    transaction_id: &str,
    now: DateTime<Utc>,
) -> Result<WalletLinks, PaymentError> {
    let amount = format_amount(amount);
    let timestamp = now.timestamp().to_string();
    let signature = random_hex(16);

    let mut params = vec![
        ("asset", network.wallet_asset()),
        ("address", address),
        ("amount", amount.as_str()),
        ("tx_id", transaction_id),
        ("timestamp", timestamp.as_str()),
        ("version", WALLET_LINK_VERSION),
        ("network", network.code()),
        ("currency", network.display_currency()),
    ];
    if let Some(memo) = clean_description(description) {
        params.push(("memo", memo));
    }
    params.push(("signature", signature.as_str()));

    let build = |base: &str| {
        Url::parse_with_params(base, &params)
            .map(String::from)
            .map_err(|e| PaymentError::Validation(format!("Invalid wallet link: {}", e)))
    };

    Ok(WalletLinks {
        deep_link: build(TRUST_DEEP_LINK)?,
        web_link: build(TRUST_WEB_LINK)?,
    })
}

/// Store a pending request and build the link mailed to the client
pub async fn create_payment_link(
    ctx: &PaymentContext,
    base_url: &str,
    amount: f64,
    network: Network,
    client_email: &str,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> Result<CreatedLink, PaymentError> {
    let amount = validate_amount(amount)?;
    let client_email = client_email.trim();
    if !looks_like_email(client_email) {
        return Err(PaymentError::Validation("Invalid client email".to_string()));
    }
    require_wallet(ctx, network).await?;

    let description = clean_description(description);
    let id = Uuid::new_v4().to_string();
    db::transaction::create_transaction(
        &ctx.pool,
        &NewTransaction {
            id: &id,
            amount,
            network,
            client_email,
            description,
            status: TransactionStatus::Pending,
        },
        now,
    )
    .await?;

    let amount_param = format_amount(amount);
    let mut params = vec![("amount", amount_param.as_str()), ("network", network.code())];
    if let Some(description) = description {
        params.push(("description", description));
    }
    let payment_link = Url::parse_with_params(
        &format!("{}/confirm_payment/{}", base_url.trim_end_matches('/'), id),
        &params,
    )
    .map_err(|e| PaymentError::Validation(format!("Invalid base URL '{}': {}", base_url, e)))?
    .to_string();

    let transaction = load_transaction(ctx, &id).await?;
    info!("Created payment link {} for {} {}", id, amount_param, network.symbol());
    Ok(CreatedLink {
        transaction,
        payment_link,
    })
}

/// Direct wallet link without a client email; the processor verifies it
pub async fn create_direct_wallet_link(
    ctx: &PaymentContext,
    amount: f64,
    network: Network,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(Transaction, WalletLinks), PaymentError> {
    let amount = validate_amount(amount)?;
    let address = require_wallet(ctx, network).await?;
    let description = clean_description(description);

    let id = Uuid::new_v4().to_string();
    db::transaction::create_transaction(
        &ctx.pool,
        &NewTransaction {
            id: &id,
            amount,
            network,
            client_email: "",
            description,
            status: TransactionStatus::Confirmed,
        },
        now,
    )
    .await?;

    let links = wallet_links(network, &address, amount, description, &id, now)?;
    let transaction = load_transaction(ctx, &id).await?;
    info!("Created direct wallet link {} for {} {}", id, format_amount(amount), network.symbol());
    Ok((transaction, links))
}

/// Payer opened the link: check it matches, then `pending -> confirmed`
pub async fn confirm_payment(
    ctx: &PaymentContext,
    id: &str,
    amount: Option<&str>,
    network: Option<&str>,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ConfirmedPayment, PaymentError> {
    let transaction = load_transaction(ctx, id).await?;

    let network = network.map(str::parse::<Network>).unwrap_or(Ok(Network::Ethereum));
    let amount = amount.and_then(|a| a.trim().parse::<f64>().ok());
    let matches = match (network, amount) {
        (Ok(network), Some(amount)) => {
            network == transaction.network && format_amount(amount) == format_amount(transaction.amount)
        }
        _ => false,
    };
    if !matches {
        return Err(PaymentError::Validation("Invalid transaction details".to_string()));
    }

    if transaction.status != TransactionStatus::Pending {
        return Err(PaymentError::InvalidState(
            "This transaction has already been processed".to_string(),
        ));
    }

    let wallet_address = require_wallet(ctx, transaction.network).await?;

    if !db::transaction::mark_confirmed(&ctx.pool, id, now).await? {
        return Err(PaymentError::InvalidState(
            "This transaction has already been processed".to_string(),
        ));
    }

    let transaction = load_transaction(ctx, id).await?;
    let memo = clean_description(description).or(transaction.description.as_deref());
    let links = wallet_links(transaction.network, &wallet_address, transaction.amount, memo, id, now)?;
    info!("Transaction {} confirmed by payer", id);

    Ok(ConfirmedPayment {
        currency_symbol: transaction.network.symbol(),
        transaction,
        wallet_address,
        links,
    })
}

/// Record the payer's signature and try to settle the payment right away
pub async fn sign_protocol(
    ctx: &PaymentContext,
    id: &str,
    signature: &str,
    now: DateTime<Utc>,
) -> Result<SignOutcome, PaymentError> {
    let transaction = load_transaction(ctx, id).await?;

    let signature = signature.trim();
    if signature.is_empty() || signature.chars().count() > MAX_SIGNATURE_LEN {
        return Err(PaymentError::Validation("Invalid signature".to_string()));
    }

    if let (TransactionStatus::Completed, Some(tx_hash)) = (transaction.status, transaction.tx_hash.as_ref()) {
        info!("Transaction {} already completed, sign request ignored", id);
        return Ok(SignOutcome::Completed {
            tx_hash: tx_hash.clone(),
        });
    }
    if transaction.status != TransactionStatus::Confirmed {
        return Err(PaymentError::InvalidState("Invalid transaction state".to_string()));
    }

    let wallet_address = require_wallet(ctx, transaction.network).await?;
    if !db::transaction::record_signature(&ctx.pool, id, signature, now).await? {
        return Err(PaymentError::InvalidState("Invalid transaction state".to_string()));
    }

    let api_keys = ctx.api_keys.load_api_keys(&ctx.pool).await?;

    let awaiting = || -> Result<SignOutcome, PaymentError> {
        let links = wallet_links(
            transaction.network,
            &wallet_address,
            transaction.amount,
            transaction.description.as_deref(),
            id,
            now,
        )?;
        Ok(SignOutcome::AwaitingPayment { links })
    };

    match verify_transaction(ctx, &transaction, &wallet_address, &api_keys, now).await {
        Ok(VerificationOutcome::Verified(transfer)) => Ok(SignOutcome::Completed {
            tx_hash: transfer.tx_hash,
        }),
        Ok(VerificationOutcome::NotFound(message)) => {
            info!("Transaction {} signed, payment not found yet: {}", id, message);
            awaiting()
        }
        Err(PaymentError::Explorer(e)) => {
            warn!("Transaction {} signed, explorer check failed: {}", id, e);
            awaiting()
        }
        Err(e) => Err(e),
    }
}

pub async fn payment_status(ctx: &PaymentContext, id: &str) -> Result<Transaction, PaymentError> {
    load_transaction(ctx, id).await
}
