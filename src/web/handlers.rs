//! HTTP request handlers

use axum::extract::rejection::{FormRejection, JsonRejection, QueryRejection};
use axum::extract::{Form, Path, Query, State};
use axum::http::header::HOST;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::ApiError;
use super::AppState;
use crate::db;
use crate::models::{format_amount, Network, TransactionSummary};
use crate::services::exchange_service::format_currency;
use crate::services::payment_link_service::{self, SignOutcome};
use crate::services::{wallet_service, PaymentError};

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

/// Non-blank form/query value
fn field(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_amount(value: &str) -> Result<f64, ApiError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|a| a.is_finite() && *a > 0.0)
        .ok_or_else(|| ApiError::bad_request("Invalid amount"))
}

fn parse_network(value: &str) -> Result<Network, ApiError> {
    value.parse::<Network>().map_err(ApiError::bad_request)
}

/// Base for generated links: PUBLIC_BASE_URL, otherwise the request's Host
fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.public_base_url {
        return base.clone();
    }
    let host = headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", proto, host)
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "paylink"
    }))
}

pub async fn server_info_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult {
    let wallets = wallet_service::wallet_map(&state.ctx.pool).await?;
    let transaction_count = db::transaction::count_transactions(&state.ctx.pool)
        .await
        .map_err(PaymentError::from)?;
    let host = headers.get(HOST).and_then(|v| v.to_str().ok()).unwrap_or_default();

    Ok(Json(json!({
        "success": true,
        "host": host,
        "environment": state.app_env.as_str(),
        "wallet_count": wallets.len(),
        "transaction_count": transaction_count,
        "automatic_verification": state.ctx.verifier.simulation_mode(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SendPaymentLinkForm {
    pub amount: Option<String>,
    pub network: Option<String>,
    pub description: Option<String>,
}

/// Direct wallet link, no client email involved
pub async fn send_payment_link_handler(
    State(state): State<Arc<AppState>>,
    form: Result<Form<SendPaymentLinkForm>, FormRejection>,
) -> ApiResult {
    let Form(form) = form?;
    let (Some(amount), Some(network)) = (field(&form.amount), field(&form.network)) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };
    let amount = parse_amount(amount)?;
    let network = parse_network(network)?;

    let (transaction, links) = payment_link_service::create_direct_wallet_link(
        &state.ctx,
        amount,
        network,
        field(&form.description),
        Utc::now(),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Payment link generated successfully",
        "transaction_id": transaction.id,
        "payment_link": links.web_link,
        "deep_link": links.deep_link,
    })))
}

#[derive(Debug, Deserialize)]
pub struct GenerateLinkForm {
    pub amount: Option<String>,
    pub client_email: Option<String>,
    pub network: Option<String>,
    pub description: Option<String>,
}

pub async fn generate_link_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<GenerateLinkForm>, FormRejection>,
) -> ApiResult {
    let Form(form) = form?;
    let (Some(amount), Some(client_email)) = (field(&form.amount), field(&form.client_email)) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };
    let amount = parse_amount(amount)?;
    let network = match field(&form.network) {
        Some(network) => parse_network(network)?,
        None => Network::Ethereum,
    };

    let created = payment_link_service::create_payment_link(
        &state.ctx,
        &base_url(&state, &headers),
        amount,
        network,
        client_email,
        field(&form.description),
        Utc::now(),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "transaction_id": created.transaction.id,
        "payment_link": created.payment_link,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub transaction_id: Option<String>,
    pub client_email: Option<String>,
    pub payment_link: Option<String>,
}

pub async fn send_email_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SendEmailRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let (Some(transaction_id), Some(client_email), Some(payment_link)) = (
        field(&body.transaction_id),
        field(&body.client_email),
        field(&body.payment_link),
    ) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    let transaction = payment_link_service::payment_status(&state.ctx, transaction_id).await?;
    state
        .ctx
        .email
        .send_payment_link(client_email, payment_link, &transaction)
        .await
        .map_err(PaymentError::from)?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Email sent to {}", client_email),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    pub amount: Option<String>,
    pub network: Option<String>,
    pub description: Option<String>,
}

pub async fn confirm_payment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<ConfirmQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let confirmed = payment_link_service::confirm_payment(
        &state.ctx,
        &id,
        field(&query.amount),
        field(&query.network),
        field(&query.description),
        Utc::now(),
    )
    .await?;

    let tx = &confirmed.transaction;
    Ok(Json(json!({
        "success": true,
        "transaction_id": tx.id,
        "amount": format_amount(tx.amount),
        "network": tx.network,
        "description": field(&query.description).or(tx.description.as_deref()),
        "wallet_address": confirmed.wallet_address,
        "currency_symbol": confirmed.currency_symbol,
        "trust_wallet_uri": confirmed.links.deep_link,
        "web_link": confirmed.links.web_link,
        "transaction": tx.summary(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct SignRequest {
    pub signature: Option<String>,
}

pub async fn sign_protocol_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<SignRequest>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body?;
    let signature = body.signature.unwrap_or_default();

    match payment_link_service::sign_protocol(&state.ctx, &id, &signature, Utc::now()).await? {
        SignOutcome::Completed { tx_hash } => Ok(Json(json!({
            "success": true,
            "auto_payment": true,
            "message": "Protocol successfully signed and payment completed",
            "redirect_url": format!("/payment_success/{}", id),
            "tx_hash": tx_hash,
        }))),
        SignOutcome::AwaitingPayment { links } => Ok(Json(json!({
            "success": true,
            "auto_payment": false,
            "message": "Protocol signed, complete the payment in your wallet",
            "payment_link": links.deep_link,
            "web_link": links.web_link,
        }))),
    }
}

pub async fn payment_success_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let transaction = payment_link_service::payment_status(&state.ctx, &id).await?;
    Ok(Json(json!({
        "success": true,
        "transaction": transaction.summary(),
    })))
}

pub async fn transactions_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let transactions = db::transaction::list_transactions(&state.ctx.pool, None)
        .await
        .map_err(PaymentError::from)?;
    let transactions: Vec<TransactionSummary> = transactions.iter().map(|t| t.summary()).collect();
    Ok(Json(json!({ "transactions": transactions })))
}

#[derive(Debug, Deserialize)]
pub struct RatesQuery {
    #[serde(default)]
    pub refresh: bool,
    pub crypto: Option<String>,
    pub fiat: Option<String>,
}

/// Whole rate table, or a single quote when `crypto` is given
pub async fn rates_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RatesQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    if let Some(crypto) = field(&query.crypto) {
        let fiat = field(&query.fiat).unwrap_or("usd");
        let rate = state
            .exchange
            .get_rate(crypto, fiat)
            .await
            .map_err(PaymentError::from)?;
        return Ok(Json(json!({
            "success": true,
            "crypto": crypto.to_lowercase(),
            "fiat": fiat.to_lowercase(),
            "rate": rate,
        })));
    }

    let table = state.exchange.rates(query.refresh).await.map_err(PaymentError::from)?;
    Ok(Json(json!({ "success": true, "rates": &*table })))
}

#[derive(Debug, Deserialize)]
pub struct ConvertQuery {
    pub amount: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

pub async fn convert_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ConvertQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let (Some(amount), Some(from), Some(to)) = (field(&query.amount), field(&query.from), field(&query.to)) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };
    let amount: f64 = amount
        .parse()
        .ok()
        .filter(|a: &f64| a.is_finite())
        .ok_or_else(|| ApiError::bad_request("Invalid amount"))?;

    let result = state
        .exchange
        .convert(amount, from, to)
        .await
        .map_err(PaymentError::from)?;

    Ok(Json(json!({
        "success": true,
        "amount": amount,
        "from": from.to_lowercase(),
        "to": to.to_lowercase(),
        "result": result,
        "formatted": format_currency(result, to, None),
    })))
}

pub async fn admin_dashboard_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let wallets = wallet_service::wallet_map(&state.ctx.pool).await?;
    let latest = db::transaction::list_transactions(&state.ctx.pool, Some(10))
        .await
        .map_err(PaymentError::from)?;
    let latest: Vec<TransactionSummary> = latest.iter().map(|t| t.summary()).collect();

    Ok(Json(json!({
        "success": true,
        "wallets": wallets,
        "transactions": latest,
    })))
}

pub async fn admin_settings_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let masked = state.ctx.api_keys.masked_api_keys(&state.ctx.pool).await?;
    Ok(Json(json!({
        "success": true,
        "api_keys": masked,
    })))
}

pub async fn update_settings_handler(
    State(state): State<Arc<AppState>>,
    form: Result<Form<HashMap<String, String>>, FormRejection>,
) -> ApiResult {
    let Form(fields) = form?;
    let updated = state
        .ctx
        .api_keys
        .store_api_keys(&state.ctx.pool, &fields, Utc::now())
        .await?;
    info!("Admin updated API keys for {} networks", updated.len());

    let masked = state.ctx.api_keys.masked_api_keys(&state.ctx.pool).await?;
    Ok(Json(json!({
        "success": true,
        "message": "API keys updated successfully",
        "updated": updated,
        "api_keys": masked,
    })))
}

pub async fn update_wallets_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BTreeMap<String, String>>, JsonRejection>,
) -> ApiResult {
    let Json(updates) = body?;
    if updates.is_empty() {
        return Err(ApiError::bad_request("No data provided"));
    }

    let updated = wallet_service::update_wallets(&state.ctx.pool, &updates, Utc::now()).await?;
    Ok(Json(json!({
        "success": true,
        "updated": updated,
    })))
}

pub async fn verify_pending_handler(State(state): State<Arc<AppState>>) -> ApiResult {
    let triggered = match &state.processor {
        Some(processor) => processor.trigger().await,
        None => false,
    };

    if !triggered {
        warn!("Verification requested but the payment processor is not running");
        return Err(ApiError::internal("Payment processor not initialized"));
    }

    Ok(Json(json!({
        "success": true,
        "message": "Verification process triggered",
    })))
}

pub async fn not_found_handler() -> ApiError {
    ApiError::not_found("Page not found")
}

