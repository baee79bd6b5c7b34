//! Configuration management
//!
//! Everything is read from environment variables (optionally via `.env`),
//! with defaults suitable for local development.

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::models::Network;

const MAX_VERIFY_AGE_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
    Testing,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Production => "production",
            AppEnv::Testing => "testing",
        }
    }

    fn default_database_url(&self) -> &'static str {
        match self {
            AppEnv::Testing => "sqlite://test.db",
            _ => "sqlite://payments.db",
        }
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "default" => Ok(AppEnv::Development),
            "production" => Ok(AppEnv::Production),
            "testing" => Ok(AppEnv::Testing),
            other => bail!("Unknown APP_ENV '{}' (expected development, production or testing)", other),
        }
    }
}

/// SMTP settings; only present when every required value is set
#[derive(Clone)]
pub struct EmailSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
}

impl fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSettings")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub app_env: AppEnv,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Base for generated links; falls back to the request's Host header
    pub public_base_url: Option<String>,
    pub simulation_mode: bool,
    pub payment_check_interval: Duration,
    pub verify_max_age: chrono::Duration,
    pub email: Option<EmailSettings>,
    pub email_max_retries: u32,
    pub email_retry_delay: Duration,
    pub reports_email: Option<String>,
    pub report_scheduler_enabled: bool,
    pub daily_report_time: NaiveTime,
    pub encryption_key: Option<String>,
    pub admin_token: Option<String>,
    /// Explorer API keys supplied through the environment
    pub explorer_api_keys: BTreeMap<Network, String>,
    pub coingecko_api_key: Option<String>,
    pub rates_cache_ttl: Duration,
    /// Receiving addresses supplied through `WALLET_ADDRESS_*`
    pub wallet_addresses: BTreeMap<Network, String>,
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let app_env: AppEnv = match get("APP_ENV") {
            Some(v) => v.parse()?,
            None => AppEnv::Development,
        };

        let email = match (
            get("EMAIL_SERVER"),
            get("EMAIL_USERNAME"),
            get("EMAIL_PASSWORD"),
            get("EMAIL_SENDER"),
        ) {
            (Some(server), Some(username), Some(password), Some(sender)) => Some(EmailSettings {
                server,
                port: parse_or(get("EMAIL_PORT"), 587, "EMAIL_PORT")?,
                username,
                password,
                sender,
            }),
            _ => None,
        };

        let daily_report_time = match get("DAILY_REPORT_TIME") {
            Some(v) => NaiveTime::parse_from_str(&v, "%H:%M")
                .with_context(|| format!("Invalid DAILY_REPORT_TIME '{}', expected HH:MM", v))?,
            None => NaiveTime::from_hms_opt(0, 5, 0).context("Invalid default report time")?,
        };

        let explorer_api_keys = [
            (Network::Ethereum, "ETHERSCAN_API_KEY"),
            (Network::Bnb, "BSCSCAN_API_KEY"),
            (Network::Tron, "TRONSCAN_API_KEY"),
            (Network::Solana, "SOLSCAN_API_KEY"),
        ]
        .into_iter()
        .filter_map(|(network, var)| get(var).map(|key| (network, key)))
        .collect();

        let wallet_addresses = Network::ALL
            .into_iter()
            .filter_map(|network| {
                get(&format!("WALLET_ADDRESS_{}", network.wallet_env_suffix())).map(|addr| (network, addr))
            })
            .collect();

        let config = Config {
            app_env,
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), 9000, "PORT")?,
            database_url: get("DATABASE_URL").unwrap_or_else(|| app_env.default_database_url().to_string()),
            public_base_url: get("PUBLIC_BASE_URL").map(|v| v.trim_end_matches('/').to_string()),
            simulation_mode: parse_bool(get("SIMULATION_MODE"), true, "SIMULATION_MODE")?,
            payment_check_interval: Duration::from_secs(parse_or(
                get("PAYMENT_CHECK_INTERVAL"),
                60,
                "PAYMENT_CHECK_INTERVAL",
            )?),
            verify_max_age: parse_max_age(get("VERIFY_MAX_AGE_MINUTES"))?,
            email,
            email_max_retries: parse_or(get("EMAIL_MAX_RETRIES"), 3, "EMAIL_MAX_RETRIES")?,
            email_retry_delay: Duration::from_secs(parse_or(get("EMAIL_RETRY_DELAY"), 5, "EMAIL_RETRY_DELAY")?),
            reports_email: get("REPORTS_EMAIL"),
            report_scheduler_enabled: parse_bool(get("REPORT_SCHEDULER_ENABLED"), false, "REPORT_SCHEDULER_ENABLED")?,
            daily_report_time,
            encryption_key: get("ENCRYPTION_KEY"),
            admin_token: get("ADMIN_TOKEN"),
            explorer_api_keys,
            coingecko_api_key: get("COINGECKO_API_KEY"),
            rates_cache_ttl: Duration::from_secs(parse_or(get("RATES_CACHE_TTL"), 300, "RATES_CACHE_TTL")?),
            wallet_addresses,
        };

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("PORT must be greater than 0");
        }

        if self.payment_check_interval.is_zero() {
            bail!("PAYMENT_CHECK_INTERVAL must be greater than 0");
        }

        if !self.database_url.starts_with("sqlite:") {
            bail!("DATABASE_URL must be a sqlite: URL, got '{}'", self.database_url);
        }

        if let Some(key) = &self.encryption_key {
            crate::utils::encryption::validate_key(key).context("Invalid ENCRYPTION_KEY")?;
        }

        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(value: Option<String>, default: T, name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => v.parse().with_context(|| format!("Invalid {}: '{}'", name, v)),
        None => Ok(default),
    }
}

/// VERIFY_MAX_AGE_MINUTES, between one minute and one year
fn parse_max_age(value: Option<String>) -> Result<chrono::Duration> {
    let minutes: i64 = parse_or(value, 60, "VERIFY_MAX_AGE_MINUTES")?;
    if !(1..=MAX_VERIFY_AGE_MINUTES).contains(&minutes) {
        bail!(
            "VERIFY_MAX_AGE_MINUTES must be between 1 and {}, got {}",
            MAX_VERIFY_AGE_MINUTES,
            minutes
        );
    }
    chrono::Duration::try_minutes(minutes).context("VERIFY_MAX_AGE_MINUTES is out of range")
}

fn parse_bool(value: Option<String>, default: bool, name: &str) -> Result<bool> {
    match value.map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => bail!("Invalid {}: '{}' (expected true or false)", name, v),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = config_from(&[]).expect("Failed to load config");

        assert_eq!(config.app_env, AppEnv::Development);
        assert_eq!(config.api_address(), "0.0.0.0:9000");
        assert_eq!(config.database_url, "sqlite://payments.db");
        assert!(config.simulation_mode);
        assert_eq!(config.payment_check_interval, Duration::from_secs(60));
        assert_eq!(config.verify_max_age, chrono::Duration::minutes(60));
        assert!(config.email.is_none());
        assert_eq!(config.email_max_retries, 3);
        assert_eq!(config.daily_report_time, NaiveTime::from_hms_opt(0, 5, 0).unwrap());
        assert!(config.wallet_addresses.is_empty());
    }

    #[test]
    fn test_testing_env_uses_test_database() {
        let config = config_from(&[("APP_ENV", "testing")]).unwrap();
        assert_eq!(config.database_url, "sqlite://test.db");
    }

    #[test]
    fn test_email_requires_all_values() {
        let partial = config_from(&[("EMAIL_SERVER", "smtp.example.com"), ("EMAIL_USERNAME", "u")]).unwrap();
        assert!(partial.email.is_none());

        let full = config_from(&[
            ("EMAIL_SERVER", "smtp.example.com"),
            ("EMAIL_PORT", "2525"),
            ("EMAIL_USERNAME", "u"),
            ("EMAIL_PASSWORD", "p"),
            ("EMAIL_SENDER", "noreply@example.com"),
        ])
        .unwrap();
        let email = full.email.expect("email settings");
        assert_eq!(email.port, 2525);
        assert!(!format!("{:?}", email).contains("\"p\""));
    }

    #[test]
    fn test_wallets_and_keys_from_env() {
        let config = config_from(&[
            ("WALLET_ADDRESS_BITCOIN", "bc1qexample"),
            ("WALLET_ADDRESS_TRX_USDT", "TExample"),
            ("WALLET_ADDRESS_SOLANA", "   "),
            ("ETHERSCAN_API_KEY", "eth-key"),
        ])
        .unwrap();

        assert_eq!(config.wallet_addresses.get(&Network::Bitcoin).map(String::as_str), Some("bc1qexample"));
        assert_eq!(config.wallet_addresses.get(&Network::TrxUsdt).map(String::as_str), Some("TExample"));
        assert!(!config.wallet_addresses.contains_key(&Network::Solana));
        assert_eq!(config.explorer_api_keys.get(&Network::Ethereum).map(String::as_str), Some("eth-key"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(config_from(&[("PORT", "0")]).unwrap_err().to_string().contains("PORT must be greater than 0"));
        assert!(config_from(&[("PORT", "abc")]).is_err());
        assert!(config_from(&[("APP_ENV", "staging")]).is_err());
        assert!(config_from(&[("SIMULATION_MODE", "maybe")]).is_err());
        assert!(config_from(&[("DATABASE_URL", "postgres://db/payments")]).is_err());
        assert!(config_from(&[("ENCRYPTION_KEY", "short")]).is_err());
        assert!(config_from(&[("DAILY_REPORT_TIME", "25:00")]).is_err());
    }

    #[test]
    fn test_verify_max_age_bounds() {
        for value in ["0", "-5", "525601", "200000000000000"] {
            let err = config_from(&[("VERIFY_MAX_AGE_MINUTES", value)]).unwrap_err();
            assert!(err.to_string().contains("VERIFY_MAX_AGE_MINUTES must be between 1 and 525600"), "{}", value);
        }
        assert!(config_from(&[("VERIFY_MAX_AGE_MINUTES", "99999999999999999999")]).is_err());

        let config = config_from(&[("VERIFY_MAX_AGE_MINUTES", "525600")]).unwrap();
        assert_eq!(config.verify_max_age, chrono::Duration::days(365));
    }

    #[test]
    fn test_public_base_url_trailing_slash_trimmed() {
        let config = config_from(&[("PUBLIC_BASE_URL", "https://pay.example.com/")]).unwrap();
        assert_eq!(config.public_base_url.as_deref(), Some("https://pay.example.com"));
    }
}
