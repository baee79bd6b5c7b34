use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::{Client as HttpClient, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::models::{
    BtcAddressData, EtherscanResponse, EvmTx, ExplorerData, ExplorerError, SolTx, TronTxList,
    Trc20TransferList,
};
use crate::models::Network;
use crate::utils::rate_limit_explorer;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Base URLs of the explorers, overridable for tests
#[derive(Debug, Clone)]
pub struct ExplorerEndpoints {
    pub blockchain_info: String,
    pub etherscan: String,
    pub bscscan: String,
    pub tronscan: String,
    pub solscan: String,
}

impl Default for ExplorerEndpoints {
    fn default() -> Self {
        Self {
            blockchain_info: "https://blockchain.info".to_string(),
            etherscan: "https://api.etherscan.io/api".to_string(),
            bscscan: "https://api.bscscan.com/api".to_string(),
            tronscan: "https://apilist.tronscan.org/api".to_string(),
            solscan: "https://public-api.solscan.io".to_string(),
        }
    }
}

/// Block explorer client fetching recent incoming transfers for an address
#[derive(Clone)]
pub struct ExplorerClient {
    http_client: HttpClient,
    endpoints: ExplorerEndpoints,
}

impl ExplorerClient {
    pub fn new() -> Result<Self, ExplorerError> {
        Self::with_endpoints(ExplorerEndpoints::default())
    }

    pub fn with_endpoints(endpoints: ExplorerEndpoints) -> Result<Self, ExplorerError> {
        let http_client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExplorerError::Request(e.to_string()))?;
        Ok(Self { http_client, endpoints })
    }

    /// Fetch recent transfers to `address` on `network`
    pub async fn fetch_transfers(
        &self,
        network: Network,
        address: &str,
        api_key: Option<&str>,
    ) -> Result<ExplorerData, ExplorerError> {
        rate_limit_explorer(network).await;

        let address = address.trim();
        let api_key = api_key.unwrap_or_default();

        match network {
            Network::Bitcoin => {
                let url = parse_url(&format!("{}/rawaddr/{}", self.endpoints.blockchain_info, address), &[])?;
                let data: BtcAddressData = self.get_json(url, HeaderMap::new()).await?;
                Ok(ExplorerData::Bitcoin(data))
            }
            Network::Ethereum | Network::Bnb | Network::EthUsdt | Network::BnbUsdt => {
                let base = if matches!(network, Network::Ethereum | Network::EthUsdt) {
                    &self.endpoints.etherscan
                } else {
                    &self.endpoints.bscscan
                };
                let mut params = vec![("module", "account")];
                match network.token_contract() {
                    Some(contract) => {
                        params.push(("action", "tokentx"));
                        params.push(("contractaddress", contract.address));
                    }
                    None => params.push(("action", "txlist")),
                }
                params.extend([
                    ("address", address),
                    ("startblock", "0"),
                    ("endblock", "99999999"),
                    ("sort", "desc"),
                    ("apikey", api_key),
                ]);
                let url = parse_url(base, &params)?;
                let response: EtherscanResponse = self.get_json(url, HeaderMap::new()).await?;
                Ok(ExplorerData::Evm(evm_transactions(response)?))
            }
            Network::Tron => {
                let url = parse_url(
                    &format!("{}/transaction", self.endpoints.tronscan),
                    &[("address", address), ("count", "30"), ("start", "0")],
                )?;
                let list: TronTxList = self.get_json(url, tron_headers(api_key)?).await?;
                Ok(ExplorerData::Tron(list.data))
            }
            Network::TrxUsdt => {
                let contract = network.token_contract().map(|c| c.address).unwrap_or_default();
                let url = parse_url(
                    &format!("{}/token_trc20/transfers", self.endpoints.tronscan),
                    &[
                        ("toAddress", address),
                        ("contract_address", contract),
                        ("limit", "20"),
                        ("start", "0"),
                    ],
                )?;
                let list: Trc20TransferList = self.get_json(url, tron_headers(api_key)?).await?;
                Ok(ExplorerData::Trc20(list.token_transfers))
            }
            Network::Solana => {
                let url = parse_url(
                    &format!("{}/account/transactions", self.endpoints.solscan),
                    &[("account", address), ("limit", "20")],
                )?;
                let mut headers = HeaderMap::new();
                if !api_key.is_empty() {
                    headers.insert("token", header_value(api_key)?);
                }
                let txs: Vec<SolTx> = self.get_json(url, headers).await?;
                Ok(ExplorerData::Solana(txs))
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, mut headers: HeaderMap) -> Result<T, ExplorerError> {
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        debug!("GET {}", redact_api_key(&url));

        let response = self
            .http_client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| ExplorerError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok());
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status.as_u16(), body, retry_after));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ExplorerError::Decode(e.without_url().to_string()))
    }
}

fn parse_url(base: &str, params: &[(&str, &str)]) -> Result<Url, ExplorerError> {
    Url::parse_with_params(base, params).map_err(|e| ExplorerError::Request(format!("Invalid URL {}: {}", base, e)))
}

fn header_value(value: &str) -> Result<HeaderValue, ExplorerError> {
    HeaderValue::from_str(value).map_err(|e| ExplorerError::Request(format!("Invalid API key header: {}", e)))
}

fn tron_headers(api_key: &str) -> Result<HeaderMap, ExplorerError> {
    let mut headers = HeaderMap::new();
    if !api_key.is_empty() {
        headers.insert("TRON-PRO-API-KEY", header_value(api_key)?);
    }
    Ok(headers)
}

fn redact_api_key(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "apikey" && !v.is_empty() { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

/// Map a non-2xx explorer response to an error
pub(crate) fn error_for_status(status: u16, body: String, retry_after: Option<u64>) -> ExplorerError {
    match status {
        400 => ExplorerError::BadRequest(body),
        401 => ExplorerError::Unauthorized(body),
        403 => ExplorerError::Forbidden(body),
        404 => ExplorerError::NotFound(body),
        429 => {
            let retry_after = retry_after.unwrap_or(1);
            warn!("Explorer rate limited, retry after {}s", retry_after);
            ExplorerError::RateLimited { retry_after }
        }
        500..=599 => {
            warn!("Explorer server error {}: {}", status, body);
            ExplorerError::ServerError(status, body)
        }
        _ => ExplorerError::HttpError(status, body),
    }
}

/// Unwrap an Etherscan-style envelope
pub(crate) fn evm_transactions(response: EtherscanResponse) -> Result<Vec<EvmTx>, ExplorerError> {
    if response.status == "1" {
        return serde_json::from_value(response.result).map_err(|e| ExplorerError::Decode(e.to_string()));
    }

    let no_results = response.message.contains("No transactions found")
        || response.result.as_array().is_some_and(|items| items.is_empty());
    if no_results {
        return Ok(Vec::new());
    }

    let detail = match response.result.as_str() {
        Some(result) if !result.is_empty() => format!("{} ({})", response.message, result),
        _ => response.message,
    };
    Err(ExplorerError::Api(detail))
}
