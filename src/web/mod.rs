//! HTTP API
//!
//! JSON endpoints for creating payment links, walking a transaction through
//! confirmation and protocol signing, exchange rates and the admin surface.
//! Every failure renders as `{success: false, error}`.

pub mod error;
pub mod handlers;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppEnv;
use crate::services::exchange_service::ExchangeService;
use crate::services::payment_processor::ProcessorHandle;
use crate::services::PaymentContext;
use error::ApiError;

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Application state shared across handlers
pub struct AppState {
    pub ctx: PaymentContext,
    /// None when the background processor was not started
    pub processor: Option<Arc<ProcessorHandle>>,
    pub exchange: Arc<ExchangeService>,
    pub public_base_url: Option<String>,
    pub admin_token: Option<String>,
    pub app_env: AppEnv,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let admin = Router::new()
        .route("/admin", get(handlers::admin_dashboard_handler))
        .route("/admin/transactions", get(handlers::transactions_handler))
        .route(
            "/admin/settings",
            get(handlers::admin_settings_handler).post(handlers::update_settings_handler),
        )
        .route("/update_wallet_addresses", post(handlers::update_wallets_handler))
        .route("/api/verify-pending", get(handlers::verify_pending_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/server-info", get(handlers::server_info_handler))
        // Link creation
        .route("/send_payment_link", post(handlers::send_payment_link_handler))
        .route("/api/generate_link", post(handlers::generate_link_handler))
        .route("/api/send_email", post(handlers::send_email_handler))
        // Client payment flow
        .route("/confirm_payment/{id}", get(handlers::confirm_payment_handler))
        .route("/sign_protocol/{id}", post(handlers::sign_protocol_handler))
        .route("/payment_success/{id}", get(handlers::payment_success_handler))
        .route("/api/transactions", get(handlers::transactions_handler))
        // Rates
        .route("/api/rates", get(handlers::rates_handler))
        .route("/api/convert", get(handlers::convert_handler))
        .merge(admin)
        .fallback(handlers::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bearer token check for admin routes; open when no token is configured
async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = &state.admin_token {
        let provided = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let authorized = provided.is_some_and(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())));
        if !authorized {
            return Err(ApiError::unauthorized());
        }
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::coingecko::client::parse_simple_price;
    use crate::api::coingecko::CoinGeckoClient;
    use crate::db;
    use crate::models::{Network, TransactionStatus};
    use crate::services::exchange_service::RateTable;
    use crate::services::payment_processor::PaymentProcessor;
    use crate::services::testing::test_context;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, StatusCode};
    use chrono::Utc;
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_state(admin_token: Option<&str>) -> AppState {
        let (ctx, _mailer) = test_context().await;
        db::wallet::upsert_wallet(&ctx.pool, Network::Ethereum, "0xmerchant", Utc::now())
            .await
            .unwrap();

        let coingecko = CoinGeckoClient::with_base_url(None, "http://127.0.0.1:9".to_string()).unwrap();
        let exchange = ExchangeService::new(coingecko, Duration::from_secs(300));
        let prices = parse_simple_price(r#"{"bitcoin": {"usd": 60000, "eur": 50000}, "ethereum": {"usd": 3000}}"#).unwrap();
        exchange.prime(RateTable::from_simple_price(&prices, Utc::now())).await;

        AppState {
            ctx,
            processor: None,
            exchange: Arc::new(exchange),
            public_base_url: Some("https://pay.example.com".to_string()),
            admin_token: admin_token.map(str::to_string),
            app_env: AppEnv::Testing,
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn json(uri: &str, body: Value) -> Request<Body> {
        axum::http::Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_unknown_route() {
        let app = create_router(test_state(None).await);

        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(&app, get("/nowhere")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Page not found");
    }

    #[tokio::test]
    async fn test_generate_link_validation() {
        let app = create_router(test_state(None).await);

        let (status, body) = send(&app, form("/api/generate_link", "amount=1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required fields");

        let (status, body) = send(&app, form("/api/generate_link", "amount=abc&client_email=a%40b.com")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid amount");

        let (status, _) = send(
            &app,
            form("/api/generate_link", "amount=1&client_email=a%40b.com&network=dogecoin"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // no bitcoin wallet configured
        let (status, body) = send(
            &app,
            form("/api/generate_link", "amount=1&client_email=a%40b.com&network=bitcoin"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("No wallet address"));
    }

    #[tokio::test]
    async fn test_full_payment_flow_in_simulation() {
        let state = test_state(None).await;
        let pool = state.ctx.pool.clone();
        let app = create_router(state);

        let (status, body) = send(
            &app,
            form(
                "/api/generate_link",
                "amount=0.25&client_email=client%40example.com&description=Invoice+9",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["transaction_id"].as_str().unwrap().to_string();
        assert!(body["payment_link"]
            .as_str()
            .unwrap()
            .starts_with(&format!("https://pay.example.com/confirm_payment/{}", id)));

        let (status, body) = send(
            &app,
            get(&format!("/confirm_payment/{}?amount=0.25&network=ethereum", id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["wallet_address"], "0xmerchant");
        assert!(body["trust_wallet_uri"].as_str().unwrap().starts_with("trust://send"));

        // a second confirmation is rejected
        let (status, _) = send(
            &app,
            get(&format!("/confirm_payment/{}?amount=0.25&network=ethereum", id)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let sign_uri = format!("/sign_protocol/{}", id);
        let (status, body) = send(&app, json(&sign_uri, serde_json::json!({"signature": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, body) = send(&app, json(&sign_uri, serde_json::json!({"signature": "0xsigned"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["auto_payment"], true);
        assert_eq!(body["redirect_url"], format!("/payment_success/{}", id));

        let tx = db::transaction::get_transaction(&pool, &id).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);

        let (status, body) = send(&app, get(&format!("/payment_success/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction"]["status"], "completed");

        let (status, _) = send(&app, get("/payment_success/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_direct_link_and_send_email() {
        let app = create_router(test_state(None).await);

        let (status, body) = send(&app, form("/send_payment_link", "amount=2&network=ethereum")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["payment_link"].as_str().unwrap().starts_with("https://link.trustwallet.com/send"));
        let id = body["transaction_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, json("/api/send_email", serde_json::json!({"transaction_id": id}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required fields");

        let request = serde_json::json!({
            "transaction_id": "missing",
            "client_email": "client@example.com",
            "payment_link": "https://pay.example.com/x"
        });
        let (status, _) = send(&app, json("/api/send_email", request)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = serde_json::json!({
            "transaction_id": id,
            "client_email": "client@example.com",
            "payment_link": "https://pay.example.com/x"
        });
        let (status, body) = send(&app, json("/api/send_email", request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Email sent to client@example.com");
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let app = create_router(test_state(Some("s3cret")).await);

        let (status, body) = send(&app, get("/admin")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let request = axum::http::Request::builder()
            .uri("/admin")
            .header("authorization", "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["wallets"]["ethereum"], "0xmerchant");

        for wrong in ["Bearer s3cre", "Bearer s3cret2", "s3cret"] {
            let request = axum::http::Request::builder()
                .uri("/admin/settings")
                .header("authorization", wrong)
                .body(Body::empty())
                .unwrap();
            let (status, _) = send(&app, request).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", wrong);
        }

        // public routes stay open
        let (status, _) = send(&app, get("/api/transactions")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let state = test_state(None).await;
        let pool = state.ctx.pool.clone();
        let app = create_router(state);

        let mut body = "amount=1&client_email=a%40b.com&description=".to_string();
        body.push_str(&"x".repeat(MAX_BODY_BYTES + 1 - body.len()));
        assert_eq!(body.len(), MAX_BODY_BYTES + 1);

        let (status, response) = send(&app, form("/api/generate_link", &body)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response["success"], false);
        assert_eq!(db::transaction::count_transactions(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_wallets_and_verify_pending() {
        let app = create_router(test_state(None).await);

        let (status, body) = send(&app, json("/update_wallet_addresses", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No data provided");

        let (status, body) = send(
            &app,
            json("/update_wallet_addresses", serde_json::json!({"bitcoin": " bc1qnew "})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], serde_json::json!(["bitcoin"]));

        let (status, body) = send(&app, get("/api/verify-pending")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Payment processor not initialized");
    }

    #[tokio::test]
    async fn test_verify_pending_triggers_running_processor() {
        let mut state = test_state(None).await;
        let processor = PaymentProcessor::new(state.ctx.clone(), Duration::from_secs(3600));
        let handle = Arc::new(processor.start());
        state.processor = Some(handle.clone());
        let app = create_router(state);

        let (status, body) = send(&app, get("/api/verify-pending")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Verification process triggered");

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_rates_and_convert() {
        let app = create_router(test_state(None).await);

        let (status, body) = send(&app, get("/api/rates")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rates"]["rates"]["bitcoin"]["quotes"]["usd"], 60000.0);

        let (status, body) = send(&app, get("/api/convert?amount=0.5&from=btc&to=usd")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], 30000.0);
        assert_eq!(body["formatted"], "30000.00");

        let (status, body) = send(&app, get("/api/rates?crypto=BTC&fiat=eur")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["crypto"], "btc");
        assert_eq!(body["rate"], 50000.0);

        // unquoted fiat falls back to the usd price
        let (_, body) = send(&app, get("/api/rates?crypto=eth&fiat=gbp")).await;
        assert_eq!(body["rate"], 3000.0);

        let (status, _) = send(&app, get("/api/convert?amount=1&from=btc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
