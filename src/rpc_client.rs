//! Monero daemon RPC client
//!
//! This module provides a Rust wrapper around monerod's `/json_rpc`
//! interface, plus the [`BlockSource`] trait the auditor consumes so the
//! core can run against any source (tests use an in-memory one).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Default monerod JSON-RPC endpoint
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:18081/json_rpc";

/// Upper bound on the pause between retry attempts
const MAX_RETRY_DELAY_SECS: u64 = 5;

/// Block data as returned by the source, before any parsing of the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub height: u64,
    pub hash: String,
    /// Reward reported by the source for this height
    pub reward: u64,
    /// Block body as the JSON string the daemon embeds (`result.json`)
    pub body_json: String,
}

/// Anything that can serve block data by height
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Height of the current chain tip
    async fn chain_height(&self) -> Result<u64>;

    /// Header data and raw body for one height
    async fn fetch_block(&self, height: u64) -> Result<RawBlock>;
}

/// RPC client configuration
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// RPC URL (e.g., "http://127.0.0.1:18081/json_rpc")
    pub url: String,
    /// Per-attempt request timeout
    pub timeout: Duration,
    /// Extra attempts after the first failure
    pub max_retries: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.to_string(),
            timeout: Duration::from_secs(10),
            max_retries: 0,
        }
    }
}

/// monerod RPC client
pub struct MoneroRpcClient {
    client: Client,
    config: RpcConfig,
}

impl MoneroRpcClient {
    /// Create a new RPC client
    pub fn new(config: RpcConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Make an RPC call, retrying up to `max_retries` extra times
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            match self.call_once(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "RPC {} failed (attempt {}/{}): {:#}",
                        method,
                        attempt,
                        self.config.max_retries + 1,
                        e
                    );
                    let delay = u64::from(attempt).min(MAX_RETRY_DELAY_SECS);
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_once(&self, method: &str, params: &Value) -> Result<Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        });
        debug!("Calling RPC {} with params {}", method, params);

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("RPC request {} failed", method))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("RPC request {} failed with status: {}", method, status);
        }

        let json: Value = response
            .json()
            .await
            .context("Failed to parse RPC response")?;

        extract_result(json)
    }

    /// Number of blocks in the chain (`get_block_count`)
    pub async fn get_block_count(&self) -> Result<u64> {
        let result = self.call("get_block_count", serde_json::json!({})).await?;
        parse_block_count(&result)
    }

    /// Block header and body at a height (`get_block`)
    pub async fn get_block(&self, height: u64) -> Result<RawBlock> {
        let params = serde_json::json!({ "height": height });
        let result = self.call("get_block", params).await?;
        parse_block_response(height, &result)
    }
}

#[async_trait]
impl BlockSource for MoneroRpcClient {
    async fn chain_height(&self) -> Result<u64> {
        let count = self.get_block_count().await?;
        if count == 0 {
            anyhow::bail!("Daemon reports an empty chain");
        }
        Ok(count - 1)
    }

    async fn fetch_block(&self, height: u64) -> Result<RawBlock> {
        self.get_block(height).await
    }
}

/// Pull `result` out of a JSON-RPC envelope, failing on a non-null `error`
pub fn extract_result(json: Value) -> Result<Value> {
    if let Some(error) = json.get("error") {
        if !error.is_null() {
            anyhow::bail!("RPC error: {}", error);
        }
    }

    match json.get("result") {
        Some(result) if !result.is_null() => Ok(result.clone()),
        _ => anyhow::bail!("RPC response missing result"),
    }
}

/// Parse a `get_block_count` result
pub fn parse_block_count(result: &Value) -> Result<u64> {
    result
        .get("count")
        .and_then(|v| v.as_u64())
        .context("Invalid get_block_count response")
}

/// Parse a `get_block` result into a [`RawBlock`]
pub fn parse_block_response(height: u64, result: &Value) -> Result<RawBlock> {
    let header = result
        .get("block_header")
        .context("get_block response missing block_header")?;

    let hash = header
        .get("hash")
        .and_then(|v| v.as_str())
        .context("block_header missing hash")?
        .to_string();

    let reward = header
        .get("reward")
        .and_then(|v| v.as_u64())
        .context("block_header missing reward")?;

    let body_json = result
        .get("json")
        .and_then(|v| v.as_str())
        .context("get_block response missing json body")?
        .to_string();

    Ok(RawBlock {
        height,
        hash,
        reward,
        body_json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_result_rejects_error_payload() {
        let response = json!({
            "id": "0",
            "jsonrpc": "2.0",
            "error": { "code": -2, "message": "requested block height too big" }
        });
        let err = extract_result(response).unwrap_err();
        assert!(err.to_string().contains("too big"));
    }

    #[test]
    fn test_extract_result_allows_null_error() {
        let response = json!({ "error": null, "result": { "count": 3 } });
        let result = extract_result(response).unwrap();
        assert_eq!(parse_block_count(&result).unwrap(), 3);
    }

    #[test]
    fn test_extract_result_missing_result() {
        assert!(extract_result(json!({ "id": "0" })).is_err());
        assert!(extract_result(json!({ "result": null })).is_err());
    }

    #[test]
    fn test_parse_block_response() {
        let result = json!({
            "block_header": {
                "hash": "418015bb9ae982a1975da7d79277c2705727a56894ba0fb246adaabb1f4632e3",
                "height": 1,
                "reward": 17592186044415u64
            },
            "json": "{\"miner_tx\":{\"vin\":[{\"gen\":{\"height\":1}}],\"vout\":[{\"amount\":17592186044415}]}}"
        });

        let block = parse_block_response(1, &result).unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(block.reward, 17_592_186_044_415);
        assert!(block.hash.starts_with("418015bb"));
        assert!(block.body_json.contains("miner_tx"));
    }

    #[test]
    fn test_parse_block_response_missing_fields() {
        assert!(parse_block_response(1, &json!({})).is_err());
        assert!(parse_block_response(
            1,
            &json!({ "block_header": { "hash": "aa", "reward": 1 } })
        )
        .is_err());
        assert!(parse_block_response(
            1,
            &json!({ "block_header": { "hash": "aa", "reward": -1 }, "json": "{}" })
        )
        .is_err());
    }

    #[test]
    fn test_default_config_points_at_local_daemon() {
        let config = RpcConfig::default();
        assert_eq!(config.url, DEFAULT_RPC_URL);
        assert_eq!(config.max_retries, 0);
    }
}
