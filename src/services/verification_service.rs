//! Finds the on-chain transfer that settles a payment request

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, info};

use crate::api::explorer::models::{BtcAddressData, EvmTx, SolTx, Trc20Transfer, TronTx};
use crate::api::explorer::{ExplorerClient, ExplorerData, ExplorerError};
use crate::models::{format_amount, ChainTransfer, Network, TokenContract, VerificationOutcome};
use crate::utils::random_hex;

/// Explorer amounts are converted from integer base units; allow for float rounding
const AMOUNT_EPSILON: f64 = 1e-9;

const NO_MATCH: &str = "No matching transaction found";

/// A transfer to the receiving address, before amount/age/hash filtering
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    tx_hash: String,
    amount: f64,
    timestamp: DateTime<Utc>,
}

pub struct BlockchainVerifier {
    client: ExplorerClient,
    simulation_mode: bool,
    max_age: Duration,
}

impl BlockchainVerifier {
    pub fn new(client: ExplorerClient, simulation_mode: bool, max_age: Duration) -> Self {
        Self {
            client,
            simulation_mode,
            max_age,
        }
    }

    pub fn simulation_mode(&self) -> bool {
        self.simulation_mode
    }

    /// Look for a transfer of at least `amount` to `address` received within `max_age` of `now`
    pub async fn verify(
        &self,
        network: Network,
        address: &str,
        amount: f64,
        api_key: Option<&str>,
        used_hashes: &[String],
        now: DateTime<Utc>,
    ) -> Result<VerificationOutcome, ExplorerError> {
        if self.simulation_mode {
            info!(
                "SIMULATION MODE: simulating {} {} to {}",
                format_amount(amount),
                network.symbol(),
                address
            );
            return Ok(VerificationOutcome::Verified(ChainTransfer {
                tx_hash: format!("simulated_tx_{}", random_hex(16)),
                amount,
                timestamp: now,
                simulated: true,
            }));
        }

        let data = self.client.fetch_transfers(network, address, api_key).await?;
        let outcome = match_transfer(network, &data, address.trim(), amount, used_hashes, now, self.max_age);
        debug!("{} verification for {}: verified={}", network, address, outcome.is_verified());
        Ok(outcome)
    }
}

/// Select the first transfer that settles the payment
pub fn match_transfer(
    network: Network,
    data: &ExplorerData,
    address: &str,
    amount: f64,
    used_hashes: &[String],
    now: DateTime<Utc>,
    max_age: Duration,
) -> VerificationOutcome {
    let oldest = now.checked_sub_signed(max_age).unwrap_or(DateTime::<Utc>::MIN_UTC);
    let candidates = match data {
        ExplorerData::Bitcoin(data) => bitcoin_candidates(data, address),
        ExplorerData::Evm(txs) => evm_candidates(txs, address, network.token_contract()),
        ExplorerData::Tron(txs) => tron_candidates(txs, address),
        ExplorerData::Trc20(transfers) => {
            let decimals = network.token_contract().map(|c| c.decimals).unwrap_or(6);
            trc20_candidates(transfers, address, decimals)
        }
        ExplorerData::Solana(txs) => solana_candidates(txs, address),
    };

    candidates
        .into_iter()
        .find(|c| {
            c.timestamp >= oldest
                && c.amount + AMOUNT_EPSILON >= amount
                && !used_hashes.iter().any(|used| used == &c.tx_hash)
        })
        .map(|c| {
            VerificationOutcome::Verified(ChainTransfer {
                tx_hash: c.tx_hash,
                amount: c.amount,
                timestamp: c.timestamp,
                simulated: false,
            })
        })
        .unwrap_or_else(|| VerificationOutcome::NotFound(NO_MATCH.to_string()))
}

fn from_secs(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn bitcoin_candidates(data: &BtcAddressData, address: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for tx in &data.txs {
        let Some(timestamp) = from_secs(tx.time) else { continue };
        for output in tx.out.iter().filter(|o| o.addr.as_deref() == Some(address)) {
            candidates.push(Candidate {
                tx_hash: tx.hash.clone(),
                amount: output.value / 1e8,
                timestamp,
            });
        }
    }
    candidates
}

fn evm_candidates(txs: &[EvmTx], address: &str, token: Option<TokenContract>) -> Vec<Candidate> {
    txs.iter()
        .filter(|tx| !tx.failed() && tx.to.eq_ignore_ascii_case(address))
        .filter(|tx| match (token, tx.contract_address.as_deref()) {
            (None, _) => true,
            (Some(contract), Some(actual)) => actual.eq_ignore_ascii_case(contract.address),
            // a native transfer never settles a token payment
            (Some(_), None) => false,
        })
        .filter_map(|tx| {
            let decimals = match token {
                Some(contract) => tx.token_decimal.unwrap_or(contract.decimals),
                None => 18,
            };
            Some(Candidate {
                tx_hash: tx.hash.clone(),
                amount: tx.value / 10f64.powi(decimals as i32),
                timestamp: from_secs(tx.time_stamp)?,
            })
        })
        .collect()
}

fn tron_candidates(txs: &[TronTx], address: &str) -> Vec<Candidate> {
    txs.iter()
        .filter(|tx| tx.to_address.as_deref() == Some(address))
        .filter_map(|tx| {
            Some(Candidate {
                tx_hash: tx.hash.clone(),
                amount: tx.amount / 1e6,
                timestamp: from_millis(tx.timestamp)?,
            })
        })
        .collect()
}

fn trc20_candidates(transfers: &[Trc20Transfer], address: &str, default_decimals: u32) -> Vec<Candidate> {
    transfers
        .iter()
        .filter(|t| t.to_address.as_deref() == Some(address))
        .filter_map(|t| {
            let decimals = t
                .token_info
                .as_ref()
                .and_then(|info| info.token_decimal)
                .unwrap_or(default_decimals);
            Some(Candidate {
                tx_hash: t.transaction_id.clone(),
                amount: t.quant / 10f64.powi(decimals as i32),
                timestamp: from_millis(t.block_ts)?,
            })
        })
        .collect()
}

fn solana_candidates(txs: &[SolTx], address: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for tx in txs {
        let Some(timestamp) = from_secs(tx.block_time) else { continue };
        let Some(meta) = &tx.meta else { continue };
        let transfers = meta
            .inner_instructions
            .iter()
            .flat_map(|group| group.instructions.iter())
            .filter_map(|instruction| instruction.transfer());
        for (destination, lamports) in transfers {
            if destination == address {
                candidates.push(Candidate {
                    tx_hash: tx.signature.clone(),
                    amount: lamports / 1e9,
                    timestamp,
                });
            }
        }
    }
    candidates
}
