use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Block explorer request errors
#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error("Explorer server error {0}: {1}")]
    ServerError(u16, String),
    #[error("HTTP error {0}: {1}")]
    HttpError(u16, String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Failed to parse explorer response: {0}")]
    Decode(String),
    #[error("Explorer API error: {0}")]
    Api(String),
}

/// Explorers mix JSON numbers and numeric strings for the same field
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        Value::Null => Ok(0.0),
        other => Err(de::Error::custom(format!("expected number, got {}", other))),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_f64(deserializer).map(|v| v as i64)
}

fn lenient_opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse().map(Some).map_err(de::Error::custom),
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| de::Error::custom("invalid decimals")),
        other => Err(de::Error::custom(format!("expected decimals, got {}", other))),
    }
}

// blockchain.info rawaddr

#[derive(Debug, Clone, Deserialize)]
pub struct BtcAddressData {
    #[serde(default)]
    pub txs: Vec<BtcTx>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcTx {
    pub hash: String,
    /// Unix seconds
    #[serde(default, deserialize_with = "lenient_i64")]
    pub time: i64,
    #[serde(default)]
    pub out: Vec<BtcOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcOutput {
    pub addr: Option<String>,
    /// Satoshi
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: f64,
}

// Etherscan / BscScan

/// Envelope shared by `txlist` and `tokentx`
#[derive(Debug, Clone, Deserialize)]
pub struct EtherscanResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTx {
    pub hash: String,
    #[serde(default)]
    pub to: String,
    /// Wei, or token base units for `tokentx`
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: f64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub time_stamp: i64,
    #[serde(default)]
    pub is_error: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_u32")]
    pub token_decimal: Option<u32>,
    #[serde(default)]
    pub contract_address: Option<String>,
}

impl EvmTx {
    pub fn failed(&self) -> bool {
        self.is_error.as_deref() == Some("1")
    }
}

// Tronscan

#[derive(Debug, Clone, Deserialize)]
pub struct TronTxList {
    #[serde(default)]
    pub data: Vec<TronTx>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TronTx {
    pub hash: String,
    #[serde(default)]
    pub to_address: Option<String>,
    /// Sun
    #[serde(default, deserialize_with = "lenient_f64")]
    pub amount: f64,
    /// Unix milliseconds
    #[serde(default, deserialize_with = "lenient_i64")]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trc20TransferList {
    #[serde(default)]
    pub token_transfers: Vec<Trc20Transfer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trc20Transfer {
    pub transaction_id: String,
    #[serde(default)]
    pub to_address: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub quant: f64,
    /// Unix milliseconds
    #[serde(default, deserialize_with = "lenient_i64")]
    pub block_ts: i64,
    #[serde(default, rename = "tokenInfo")]
    pub token_info: Option<Trc20TokenInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Trc20TokenInfo {
    #[serde(default, rename = "tokenDecimal", deserialize_with = "lenient_opt_u32")]
    pub token_decimal: Option<u32>,
}

// Solscan

#[derive(Debug, Clone, Deserialize)]
pub struct SolTx {
    #[serde(alias = "txHash")]
    pub signature: String,
    /// Unix seconds
    #[serde(default, rename = "blockTime", deserialize_with = "lenient_i64")]
    pub block_time: i64,
    #[serde(default)]
    pub meta: Option<SolMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolMeta {
    #[serde(default, rename = "innerInstructions")]
    pub inner_instructions: Vec<SolInnerInstructions>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolInnerInstructions {
    #[serde(default)]
    pub instructions: Vec<SolInstruction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolInstruction {
    /// Parsed program data; shape depends on the program
    #[serde(default)]
    pub parsed: Value,
}

impl SolInstruction {
    /// `(destination, lamports)` when this is a system transfer
    pub fn transfer(&self) -> Option<(&str, f64)> {
        if self.parsed.get("type").and_then(Value::as_str) != Some("transfer") {
            return None;
        }
        let info = self.parsed.get("info")?;
        let destination = info.get("destination").and_then(Value::as_str)?;
        let lamports = match info.get("lamports")? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };
        Some((destination, lamports))
    }
}

/// Transfers fetched for one address, by explorer family
#[derive(Debug, Clone)]
pub enum ExplorerData {
    Bitcoin(BtcAddressData),
    Evm(Vec<EvmTx>),
    Tron(Vec<TronTx>),
    Trc20(Vec<Trc20Transfer>),
    Solana(Vec<SolTx>),
}
