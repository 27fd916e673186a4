//! Tendermint RPC client: raw block and block-results JSON by height.

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::events::{parse_block_json, parse_block_results_json, AbciEvent, RawBlock};

#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
}

impl RpcClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.endpoint, path);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("rpc {} returned {}", url, resp.status()));
        }
        Ok(resp.json().await?)
    }

    /// Latest committed height from `/status`.
    pub async fn latest_height(&self) -> Result<i64> {
        let v = self.get_json("/status").await?;
        let height = v
            .pointer("/result/sync_info/latest_block_height")
            .and_then(|h| h.as_str())
            .ok_or_else(|| anyhow!("status response missing latest height"))?;
        Ok(height.parse()?)
    }

    /// Header and raw txs for a height.
    pub async fn block(&self, height: i64) -> Result<RawBlock> {
        let v = self.get_json(&format!("/block?height={height}")).await?;
        parse_block_json(&v)
    }

    /// Per-tx event lists for a height, aligned with the block's txs.
    pub async fn block_results(&self, height: i64) -> Result<Vec<Vec<AbciEvent>>> {
        let v = self
            .get_json(&format!("/block_results?height={height}"))
            .await?;
        Ok(parse_block_results_json(&v))
    }
}
