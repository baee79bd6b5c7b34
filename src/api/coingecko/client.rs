use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client as HttpClient, Url};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RatesError {
    #[error("Price request failed: {0}")]
    Request(String),
    #[error("Price API error {0}: {1}")]
    Status(u16, String),
    #[error("Failed to parse price response: {0}")]
    Decode(String),
    #[error("Exchange rate unavailable: {0}")]
    Unavailable(String),
}

/// coin id -> (field -> value), e.g. `bitcoin -> {usd: 64000.0, usd_24h_change: -1.2}`
pub type SimplePrice = HashMap<String, HashMap<String, f64>>;

pub struct CoinGeckoClient {
    http_client: HttpClient,
    api_key: Option<String>,
    base_url: String,
}

impl CoinGeckoClient {
    pub fn new(api_key: Option<String>) -> Result<Self, RatesError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: Option<String>, base_url: String) -> Result<Self, RatesError> {
        let http_client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RatesError::Request(e.to_string()))?;
        Ok(Self {
            http_client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url,
        })
    }

    fn create_headers(&self) -> Result<HeaderMap, RatesError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(key.trim())
                .map_err(|e| RatesError::Request(format!("Invalid API key header: {}", e)))?;
            headers.insert("x-cg-demo-api-key", value);
        }
        Ok(headers)
    }

    /// GET /simple/price for `ids` quoted in `vs_currencies`, with 24h change
    pub async fn fetch_simple_price(&self, ids: &[&str], vs_currencies: &[&str]) -> Result<SimplePrice, RatesError> {
        let url = Url::parse_with_params(
            &format!("{}/simple/price", self.base_url),
            &[
                ("ids", ids.join(",")),
                ("vs_currencies", vs_currencies.join(",")),
                ("include_24hr_change", "true".to_string()),
            ],
        )
        .map_err(|e| RatesError::Request(e.to_string()))?;

        let response = self
            .http_client
            .get(url)
            .headers(self.create_headers()?)
            .send()
            .await
            .map_err(|e| RatesError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("CoinGecko API error: {} - {}", status.as_u16(), body);
            return Err(RatesError::Status(status.as_u16(), body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| RatesError::Request(e.without_url().to_string()))?;
        let prices = parse_simple_price(&text)?;
        info!("Fetched prices for {} coins", prices.len());
        Ok(prices)
    }
}

/// Parse a simple/price body, dropping null quotes
pub(crate) fn parse_simple_price(body: &str) -> Result<SimplePrice, RatesError> {
    let raw: HashMap<String, HashMap<String, Option<f64>>> =
        serde_json::from_str(body).map_err(|e| RatesError::Decode(e.to_string()))?;

    Ok(raw
        .into_iter()
        .map(|(coin, fields)| {
            let fields = fields.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect();
            (coin, fields)
        })
        .collect())
}
