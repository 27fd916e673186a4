//! Chain LCD (REST) client: token metadata, supply, holder counts, and
//! CosmWasm smart queries (pool reserves).

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Value};

use crate::models::AssetAmount;

/// Token metadata as reported by the bank module.
#[derive(Debug, Clone, Default)]
pub struct DenomMetadata {
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub display: Option<String>,
    pub exponent: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct LcdClient {
    http: reqwest::Client,
    endpoint: String,
}

impl LcdClient {
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
            return Err(anyhow!("lcd {} returned {}", url, resp.status()));
        }
        Ok(resp.json().await?)
    }

    /// Bank metadata for a denom. The exponent is taken from the denom unit
    /// matching the `display` alias.
    pub async fn denom_metadata(&self, denom: &str) -> Result<DenomMetadata> {
        let v = self
            .get_json(&format!(
                "/cosmos/bank/v1beta1/denoms_metadata/{}",
                urlencode(denom)
            ))
            .await?;
        let meta = v
            .get("metadata")
            .ok_or_else(|| anyhow!("no metadata for denom {denom}"))?;

        let display = meta
            .get("display")
            .and_then(|d| d.as_str())
            .map(str::to_string);
        let exponent = display.as_deref().and_then(|display| {
            meta.get("denom_units")?.as_array()?.iter().find_map(|u| {
                (u.get("denom")?.as_str()? == display)
                    .then(|| u.get("exponent").and_then(|e| e.as_i64()))
                    .flatten()
                    .map(|e| e as i32)
            })
        });

        Ok(DenomMetadata {
            name: meta
                .get("name")
                .and_then(|n| n.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            symbol: meta
                .get("symbol")
                .and_then(|s| s.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            display,
            exponent,
        })
    }

    /// Current supply of a denom as a base-unit decimal string.
    pub async fn supply_of(&self, denom: &str) -> Result<Option<String>> {
        let v = self
            .get_json(&format!(
                "/cosmos/bank/v1beta1/supply/by_denom?denom={}",
                urlencode(denom)
            ))
            .await?;
        Ok(v.pointer("/amount/amount")
            .and_then(|a| a.as_str())
            .map(str::to_string))
    }

    /// Number of accounts holding a denom, via the bank `denom_owners`
    /// pagination total.
    pub async fn holders_count(&self, denom: &str) -> Result<i64> {
        let v = self
            .get_json(&format!(
                "/cosmos/bank/v1beta1/denom_owners/{}?pagination.limit=1&pagination.count_total=true",
                urlencode(denom)
            ))
            .await?;
        v.pointer("/pagination/total")
            .and_then(|t| t.as_str())
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| anyhow!("denom_owners response missing total for {denom}"))
    }

    /// CosmWasm smart query against a contract.
    pub async fn smart_query(&self, contract: &str, msg: &Value) -> Result<Value> {
        let encoded = general_purpose::STANDARD.encode(msg.to_string());
        let v = self
            .get_json(&format!(
                "/cosmwasm/wasm/v1/contract/{contract}/smart/{encoded}"
            ))
            .await?;
        v.get("data")
            .cloned()
            .ok_or_else(|| anyhow!("smart query on {contract} returned no data"))
    }

    /// On-chain reserves of a pair contract via its `{"pool":{}}` query.
    /// Returns the two legs in contract order.
    pub async fn pool_reserves(&self, pair_contract: &str) -> Result<Vec<AssetAmount>> {
        let data = self.smart_query(pair_contract, &json!({ "pool": {} })).await?;
        let assets = data
            .get("assets")
            .and_then(|a| a.as_array())
            .ok_or_else(|| anyhow!("pool query on {pair_contract} missing assets"))?;

        let mut legs = Vec::with_capacity(2);
        for asset in assets {
            let amount = asset
                .get("amount")
                .and_then(|a| a.as_str())
                .unwrap_or_default();
            let denom = asset
                .pointer("/info/native_token/denom")
                .or_else(|| asset.pointer("/info/token/contract_addr"))
                .and_then(|d| d.as_str())
                .unwrap_or_default();
            if denom.is_empty() || amount.is_empty() {
                continue;
            }
            legs.push(AssetAmount {
                denom: denom.to_string(),
                amount_base: amount.to_string(),
            });
        }
        Ok(legs)
    }
}

fn urlencode(s: &str) -> String {
    // Denoms embed '/' (factory, ibc); the LCD expects it percent-encoded.
    s.replace('%', "%25").replace('/', "%2F")
}
