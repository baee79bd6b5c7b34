//! Crypto/fiat exchange rates from CoinGecko with a short-lived cache

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::api::coingecko::{CoinGeckoClient, RatesError, SimplePrice};

/// Tracked coins: our name -> CoinGecko id
const COINS: [(&str, &str); 9] = [
    ("bitcoin", "bitcoin"),
    ("ethereum", "ethereum"),
    ("bnb", "binancecoin"),
    ("solana", "solana"),
    ("tron", "tron"),
    ("polygon", "matic-network"),
    ("usdt", "tether"),
    ("usdc", "usd-coin"),
    ("dai", "dai"),
];

const FIAT: [&str; 10] = ["usd", "eur", "gbp", "jpy", "cny", "rub", "inr", "brl", "aud", "cad"];

const STABLECOINS: [&str; 3] = ["usdt", "usdc", "dai"];

/// Lowercase currency name with ticker aliases resolved
fn normalize(currency: &str) -> String {
    let currency = currency.trim().to_lowercase();
    let name = match currency.as_str() {
        "btc" => "bitcoin",
        "eth" => "ethereum",
        "sol" => "solana",
        "trx" => "tron",
        "matic" => "polygon",
        other => other,
    };
    name.to_string()
}

fn is_fiat(currency: &str) -> bool {
    FIAT.contains(&currency)
}

fn is_stablecoin(currency: &str) -> bool {
    STABLECOINS.contains(&currency)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoinRate {
    /// fiat code -> price of one coin
    pub quotes: BTreeMap<String, f64>,
    pub usd_24h_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateTable {
    pub provider: &'static str,
    pub base: &'static str,
    pub fetched_at: DateTime<Utc>,
    pub rates: BTreeMap<String, CoinRate>,
}

impl RateTable {
    /// Keep coins with a positive USD price
    pub fn from_simple_price(prices: &SimplePrice, fetched_at: DateTime<Utc>) -> Self {
        let mut rates = BTreeMap::new();
        for (name, id) in COINS {
            let Some(fields) = prices.get(id) else { continue };
            if fields.get("usd").copied().unwrap_or(0.0) <= 0.0 {
                continue;
            }
            let quotes = FIAT
                .iter()
                .filter_map(|fiat| fields.get(*fiat).filter(|v| **v > 0.0).map(|v| (fiat.to_string(), *v)))
                .collect();
            rates.insert(
                name.to_string(),
                CoinRate {
                    quotes,
                    usd_24h_change: fields.get("usd_24h_change").copied().unwrap_or(0.0),
                },
            );
        }

        Self {
            provider: "coingecko",
            base: "USD",
            fetched_at,
            rates,
        }
    }

    /// Price of one `crypto` in `fiat`; missing fiat quotes fall back to USD
    pub fn get_rate(&self, crypto: &str, fiat: &str) -> Option<f64> {
        let coin = self.rates.get(&normalize(crypto))?;
        let fiat = fiat.trim().to_lowercase();
        coin.quotes.get(&fiat).or_else(|| coin.quotes.get("usd")).copied()
    }

    /// Exact quote, no fallback
    fn quote(&self, coin: &str, fiat: &str) -> Option<f64> {
        self.rates.get(coin)?.quotes.get(fiat).copied()
    }

    /// USD value of one unit of `currency`
    fn usd_value(&self, currency: &str) -> Option<f64> {
        if currency == "usd" {
            return Some(1.0);
        }
        if is_fiat(currency) {
            return Some(self.quote("bitcoin", "usd")? / self.quote("bitcoin", currency)?);
        }
        self.quote(currency, "usd")
    }

    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, RatesError> {
        let from = normalize(from);
        let to = normalize(to);

        if from == to {
            return Ok(amount);
        }
        if (is_stablecoin(&from) && to == "usd") || (from == "usd" && is_stablecoin(&to)) {
            return Ok(amount);
        }

        let unavailable = || RatesError::Unavailable(format!("{} to {}", from, to));

        if is_fiat(&from) && is_fiat(&to) {
            let from_btc = self.quote("bitcoin", &from).ok_or_else(unavailable)?;
            let to_btc = self.quote("bitcoin", &to).ok_or_else(unavailable)?;
            return Ok(amount * to_btc / from_btc);
        }

        let from_usd = self.usd_value(&from).ok_or_else(unavailable)?;
        let to_usd = self.usd_value(&to).ok_or_else(unavailable)?;
        Ok(amount * from_usd / to_usd)
    }
}

fn default_places(currency: &str) -> usize {
    match currency {
        "btc" | "bitcoin" => 8,
        "eth" | "ethereum" | "bnb" => 6,
        "sol" | "solana" | "matic" | "polygon" => 4,
        "jpy" => 0,
        _ => 2,
    }
}

/// Format `amount` rounded toward zero at the currency's precision
pub fn format_currency(amount: f64, currency: &str, decimal_places: Option<usize>) -> String {
    let currency = currency.trim().to_lowercase();
    let places = decimal_places.unwrap_or_else(|| default_places(&currency));

    // shortest round-trip representation, truncated digit-wise
    let repr = format!("{}", amount.abs());
    let (int_part, frac_part) = repr.split_once('.').unwrap_or((repr.as_str(), ""));
    let sign = if amount.is_sign_negative() && amount != 0.0 { "-" } else { "" };

    if places == 0 {
        return format!("{}{}", sign, int_part);
    }
    let mut frac: String = frac_part.chars().take(places).collect();
    while frac.len() < places {
        frac.push('0');
    }
    format!("{}{}.{}", sign, int_part, frac)
}

pub struct ExchangeService {
    client: CoinGeckoClient,
    ttl: Duration,
    cache: RwLock<Option<(Instant, Arc<RateTable>)>>,
}

impl ExchangeService {
    pub fn new(client: CoinGeckoClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Cached rates, refetched after the TTL or when forced
    pub async fn rates(&self, force_refresh: bool) -> Result<Arc<RateTable>, RatesError> {
        if !force_refresh {
            if let Some((fetched, table)) = self.cache.read().await.as_ref() {
                if fetched.elapsed() < self.ttl {
                    debug!("Serving cached exchange rates");
                    return Ok(Arc::clone(table));
                }
            }
        }

        let ids: Vec<&str> = COINS.iter().map(|(_, id)| *id).collect();
        let prices = self.client.fetch_simple_price(&ids, &FIAT).await?;
        let table = Arc::new(RateTable::from_simple_price(&prices, Utc::now()));
        if table.rates.is_empty() {
            warn!("Price API returned no usable rates");
            return Err(RatesError::Unavailable("no rates returned".to_string()));
        }

        *self.cache.write().await = Some((Instant::now(), Arc::clone(&table)));
        Ok(table)
    }

    pub async fn get_rate(&self, crypto: &str, fiat: &str) -> Result<f64, RatesError> {
        self.rates(false)
            .await?
            .get_rate(crypto, fiat)
            .ok_or_else(|| RatesError::Unavailable(format!("{} in {}", crypto, fiat)))
    }

    pub async fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, RatesError> {
        self.rates(false).await?.convert(amount, from, to)
    }

    #[cfg(test)]
    pub(crate) async fn prime(&self, table: RateTable) {
        *self.cache.write().await = Some((Instant::now(), Arc::new(table)));
    }
}
