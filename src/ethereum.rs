//! Ethereum settlement verification
//!
//! Confirms that a settlement reference (transaction hash) corresponds to a
//! successful, mined transaction. Talks raw JSON-RPC to the configured
//! provider; no wallet or signing machinery is involved.
//!
//! Logical failures (unknown hash, reverted transaction, never mined) are
//! reported through `VerifyOutcome` with `success = false`; transport
//! failures bubble up as errors so the caller can distinguish a bad
//! settlement from a bad provider.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;

const WEI_PER_ETH: u128 = 1_000_000_000_000_000_000;

/// Result tuple of a settlement verification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyOutcome {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            amount: None,
            from: None,
            to: None,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait SettlementVerifier: Send + Sync {
    async fn verify(&self, tx_hash: &str) -> Result<VerifyOutcome>;
}

pub struct EthereumVerifier {
    client: reqwest::Client,
    rpc_url: String,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl EthereumVerifier {
    pub fn new(rpc_url: String, poll_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url,
            poll_attempts: poll_attempts.max(1),
            poll_interval,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let rpc_url = config.ethereum_rpc_url().ok_or_else(|| {
            anyhow::anyhow!(
                "No Ethereum RPC endpoint configured. Set INFURA_API_KEY or [ethereum] rpc_url."
            )
        })?;

        Ok(Self::new(
            rpc_url,
            config.ethereum.receipt_poll_attempts,
            Duration::from_secs(config.ethereum.receipt_poll_interval_secs),
        ))
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("RPC request {} failed", method))?;

        if !response.status().is_success() {
            anyhow::bail!("RPC endpoint returned {} for {}", response.status(), method);
        }

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            anyhow::bail!("RPC error from {}: {}", method, error);
        }

        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Poll for the transaction receipt until it is mined or the attempt
    /// budget runs out.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<Option<Value>> {
        for attempt in 0..self.poll_attempts {
            let receipt = self
                .rpc_call("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if !receipt.is_null() {
                return Ok(Some(receipt));
            }

            debug!(
                "Receipt for {} not yet available (attempt {}/{})",
                tx_hash,
                attempt + 1,
                self.poll_attempts
            );
            tokio::time::sleep(self.poll_interval).await;
        }

        Ok(None)
    }
}

#[async_trait]
impl SettlementVerifier for EthereumVerifier {
    async fn verify(&self, tx_hash: &str) -> Result<VerifyOutcome> {
        if !is_tx_hash(tx_hash) {
            return Ok(VerifyOutcome::failure("Malformed transaction hash"));
        }

        let tx = self
            .rpc_call("eth_getTransactionByHash", json!([tx_hash]))
            .await?;

        if tx.is_null() {
            return Ok(VerifyOutcome::failure("Transaction not found"));
        }

        let receipt = match self.wait_for_receipt(tx_hash).await? {
            Some(r) => r,
            None => {
                warn!("Transaction {} not mined within the wait budget", tx_hash);
                return Ok(VerifyOutcome::failure("Transaction not yet mined"));
            }
        };

        if receipt.get("status").and_then(Value::as_str) != Some("0x1") {
            return Ok(VerifyOutcome::failure("Transaction failed"));
        }

        let wei = tx
            .get("value")
            .and_then(Value::as_str)
            .map(parse_quantity)
            .transpose()?
            .unwrap_or(0);

        Ok(VerifyOutcome {
            success: true,
            amount: Some(format_ether(wei)),
            from: tx.get("from").and_then(Value::as_str).map(str::to_string),
            to: tx.get("to").and_then(Value::as_str).map(str::to_string),
            error: None,
        })
    }
}

/// Check for the canonical 0x-prefixed 32-byte hash form.
pub fn is_tx_hash(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(rest) => rest.len() == 64 && hex::decode(rest).is_ok(),
        None => false,
    }
}

/// Parse a 0x-prefixed hex quantity into wei.
pub fn parse_quantity(hex_value: &str) -> Result<u128> {
    let digits = hex_value.strip_prefix("0x").unwrap_or(hex_value);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .with_context(|| format!("Invalid hex quantity: {}", hex_value))
}

/// Format a wei amount as a decimal ETH string ("1.5", "0.000021").
pub fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETH;
    let frac = wei % WEI_PER_ETH;

    if frac == 0 {
        return format!("{}.0", whole);
    }

    let frac_str = format!("{:018}", frac);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}
