//! Supported payment networks

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Token contract backing a stablecoin network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenContract {
    pub address: &'static str,
    pub decimals: u32,
}

/// Blockchain or token a payment can be made on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Network {
    Bitcoin,
    Ethereum,
    Bnb,
    Tron,
    Solana,
    EthUsdt,
    BnbUsdt,
    TrxUsdt,
}

impl Network {
    pub const ALL: [Network; 8] = [
        Network::Bitcoin,
        Network::Ethereum,
        Network::Bnb,
        Network::Tron,
        Network::Solana,
        Network::EthUsdt,
        Network::BnbUsdt,
        Network::TrxUsdt,
    ];

    /// Canonical lowercase code, as stored and used in links
    pub fn code(&self) -> &'static str {
        match self {
            Network::Bitcoin => "bitcoin",
            Network::Ethereum => "ethereum",
            Network::Bnb => "bnb",
            Network::Tron => "tron",
            Network::Solana => "solana",
            Network::EthUsdt => "eth_usdt",
            Network::BnbUsdt => "bnb_usdt",
            Network::TrxUsdt => "trx_usdt",
        }
    }

    /// Ticker shown next to amounts
    pub fn symbol(&self) -> &'static str {
        match self {
            Network::Bitcoin => "BTC",
            Network::Ethereum => "ETH",
            Network::Bnb => "BNB",
            Network::Tron => "TRX",
            Network::Solana => "SOL",
            Network::EthUsdt | Network::BnbUsdt | Network::TrxUsdt => "USDT",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Network::Bitcoin => "Bitcoin (BTC)",
            Network::Ethereum => "Ethereum (ETH)",
            Network::Bnb => "Binance Smart Chain (BNB)",
            Network::Tron => "Tron (TRX)",
            Network::Solana => "Solana (SOL)",
            Network::EthUsdt => "Tether USD (ERC-20)",
            Network::BnbUsdt => "Tether USD (BEP-20)",
            Network::TrxUsdt => "Tether USD (TRC-20)",
        }
    }

    /// Asset code understood by Trust Wallet send links
    pub fn wallet_asset(&self) -> &'static str {
        match self {
            Network::Bitcoin => "btc",
            Network::Ethereum => "eth",
            Network::Bnb => "bnb",
            Network::Tron => "trx",
            Network::Solana => "sol",
            Network::EthUsdt => "eth_usdt",
            Network::BnbUsdt => "bnb_usdt",
            Network::TrxUsdt => "trx_usdt",
        }
    }

    /// Currency label shown by the wallet: USD for stablecoins, the ticker otherwise
    pub fn display_currency(&self) -> &'static str {
        if self.is_token() {
            "USD"
        } else {
            self.symbol()
        }
    }

    pub fn is_token(&self) -> bool {
        self.token_contract().is_some()
    }

    pub fn token_contract(&self) -> Option<TokenContract> {
        match self {
            Network::EthUsdt => Some(TokenContract {
                address: "0xdAC17F958D2ee523a2206206994597C13D831ec7",
                decimals: 6,
            }),
            Network::BnbUsdt => Some(TokenContract {
                address: "0x55d398326f99059fF775485246999027B3197955",
                decimals: 18,
            }),
            Network::TrxUsdt => Some(TokenContract {
                address: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
                decimals: 6,
            }),
            _ => None,
        }
    }

    /// Network whose explorer API key applies (tokens share their chain's key)
    pub fn explorer_key_network(&self) -> Network {
        match self {
            Network::EthUsdt => Network::Ethereum,
            Network::BnbUsdt => Network::Bnb,
            Network::TrxUsdt => Network::Tron,
            other => *other,
        }
    }

    /// Suffix of the `WALLET_ADDRESS_*` environment variable
    pub fn wallet_env_suffix(&self) -> &'static str {
        match self {
            Network::Bitcoin => "BITCOIN",
            Network::Ethereum => "ETHEREUM",
            Network::Bnb => "BNB",
            Network::Tron => "TRON",
            Network::Solana => "SOLANA",
            Network::EthUsdt => "ETH_USDT",
            Network::BnbUsdt => "BNB_USDT",
            Network::TrxUsdt => "TRX_USDT",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bitcoin" | "btc" => Ok(Network::Bitcoin),
            "ethereum" | "eth" => Ok(Network::Ethereum),
            "bnb" | "bsc" => Ok(Network::Bnb),
            "tron" | "trx" => Ok(Network::Tron),
            "solana" | "sol" => Ok(Network::Solana),
            "eth_usdt" => Ok(Network::EthUsdt),
            "bnb_usdt" => Ok(Network::BnbUsdt),
            "trx_usdt" => Ok(Network::TrxUsdt),
            other => Err(format!("Unsupported network: {}", other)),
        }
    }
}

/// Format an amount with up to 8 decimals, without trailing zeros
pub fn format_amount(amount: f64) -> String {
    let fixed = format!("{:.8}", amount);
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}
