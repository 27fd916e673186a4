//! Parsing of raw block and block-results JSON into typed events.
//!
//! Contract logs arrive as loosely structured `wasm` events whose attribute
//! keys drift between DEX versions. Everything here is tolerant: malformed
//! events are skipped, never fatal for the block.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::{AssetAmount, NATIVE_DENOM};

/// A block header plus its raw transactions, decoded from RPC `/block`.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub height: i64,
    pub time: DateTime<Utc>,
    pub txs: Vec<Vec<u8>>,
}

/// Ordered attribute map of a single ABCI event.
#[derive(Debug, Clone, Default)]
pub struct EventAttrs(Vec<(String, String)>);

impl EventAttrs {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    /// First occurrence of `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All occurrences of `key`, in order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Value of `key` if it is a pure ASCII digit string.
    pub fn digits(&self, key: &str) -> Option<String> {
        self.get(key).and_then(digits_or_null)
    }

    /// The `msg_index` attribute the SDK stamps on every event; 0 when
    /// absent (single-message txs on older nodes).
    pub fn msg_index(&self) -> i32 {
        self.get("msg_index")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// One typed ABCI event: a kind (`wasm`, `message`, `execute`, ...) and its
/// attributes.
#[derive(Debug, Clone)]
pub struct AbciEvent {
    pub kind: String,
    pub attrs: EventAttrs,
}

/// All events of one transaction, keyed back to the tx by its node hash.
#[derive(Debug, Clone)]
pub struct TxEvents {
    pub tx_index: usize,
    pub tx_hash: String,
    pub events: Vec<AbciEvent>,
}

/// Reproduces the node's tx hash convention: SHA-256 of the raw tx bytes,
/// uppercase hex.
pub fn tx_hash_hex(tx_bytes: &[u8]) -> String {
    let hash = Sha256::digest(tx_bytes);
    let mut out = String::with_capacity(64);
    for b in hash {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// Decodes the RPC `/block` response.
pub fn parse_block_json(v: &Value) -> Result<RawBlock> {
    let block = v
        .pointer("/result/block")
        .or_else(|| v.get("block"))
        .ok_or_else(|| anyhow!("missing block in RPC response"))?;

    let header = block
        .get("header")
        .ok_or_else(|| anyhow!("missing block header"))?;
    let height: i64 = header
        .get("height")
        .and_then(|h| h.as_str())
        .ok_or_else(|| anyhow!("missing block height"))?
        .parse()?;
    let time = header
        .get("time")
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow!("missing block time"))?;
    let time = DateTime::parse_from_rfc3339(time)?.with_timezone(&Utc);

    let mut txs = Vec::new();
    if let Some(raw) = block.pointer("/data/txs").and_then(|t| t.as_array()) {
        for tx in raw {
            let Some(b64) = tx.as_str() else { continue };
            match general_purpose::STANDARD.decode(b64) {
                Ok(bytes) => txs.push(bytes),
                Err(err) => {
                    tracing::warn!(height, "undecodable tx in block: {err}");
                }
            }
        }
    }

    Ok(RawBlock { height, time, txs })
}

/// Decodes the RPC `/block_results` response into per-transaction event
/// lists. Failed transactions (non-zero code) produce an empty list so
/// indices stay aligned with the block's txs.
pub fn parse_block_results_json(v: &Value) -> Vec<Vec<AbciEvent>> {
    let Some(results) = v
        .pointer("/result/txs_results")
        .or_else(|| v.get("txs_results"))
        .and_then(|r| r.as_array())
    else {
        return Vec::new();
    };

    results
        .iter()
        .map(|tx_result| {
            let code = tx_result.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
            if code != 0 {
                return Vec::new();
            }
            tx_result
                .get("events")
                .and_then(|e| e.as_array())
                .map(|events| events.iter().filter_map(parse_event).collect())
                .unwrap_or_default()
        })
        .collect()
}

fn parse_event(v: &Value) -> Option<AbciEvent> {
    let kind = v.get("type")?.as_str()?.to_string();
    let attrs = v
        .get("attributes")
        .and_then(|a| a.as_array())
        .map(|attrs| {
            attrs
                .iter()
                .filter_map(|attr| {
                    let key = attr.get("key")?.as_str()?.to_string();
                    let value = attr
                        .get("value")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Some((key, value))
                })
                .collect()
        })
        .unwrap_or_default();
    Some(AbciEvent {
        kind,
        attrs: EventAttrs::new(attrs),
    })
}

/// Zips a block's txs with their block-results events, hashing each tx.
pub fn assemble_txs(block: &RawBlock, results: Vec<Vec<AbciEvent>>) -> Vec<TxEvents> {
    block
        .txs
        .iter()
        .enumerate()
        .map(|(tx_index, bytes)| TxEvents {
            tx_index,
            tx_hash: tx_hash_hex(bytes),
            events: results.get(tx_index).cloned().unwrap_or_default(),
        })
        .collect()
}

/// All `wasm` events whose `action` attribute equals `action`, in order.
pub fn wasm_by_action<'a>(events: &'a [AbciEvent], action: &str) -> Vec<&'a AbciEvent> {
    events
        .iter()
        .filter(|e| e.kind == "wasm" && e.attrs.get("action") == Some(action))
        .collect()
}

/// Maps `msg_index -> sender` from the tx's `message` events, for
/// attribution of the on-chain EOA.
pub fn build_msg_sender_map(events: &[AbciEvent]) -> HashMap<i32, String> {
    let mut map = HashMap::new();
    for event in events.iter().filter(|e| e.kind == "message") {
        if let Some(sender) = event.attrs.get("sender") {
            map.entry(event.attrs.msg_index())
                .or_insert_with(|| sender.to_string());
        }
    }
    map
}

/// Splits a `pair` attribute into `(base, quote)`.
///
/// Accepted formats: `"<denomA>-<denomB>"` and `"<a>, <b>"`. If one side is
/// the native quote it becomes quote; otherwise the lexically greater denom
/// is quote, with the right-hand side winning ties.
pub fn normalize_pair(pair_attr: &str) -> Option<(String, String)> {
    let (a, b) = if let Some((a, b)) = pair_attr.split_once(',') {
        (a.trim(), b.trim())
    } else {
        let (a, b) = pair_attr.split_once('-')?;
        (a.trim(), b.trim())
    };
    if a.is_empty() || b.is_empty() {
        return None;
    }

    let (base, quote) = if a == NATIVE_DENOM {
        (b, a)
    } else if b == NATIVE_DENOM {
        (a, b)
    } else if a > b {
        (b, a)
    } else {
        (a, b)
    };
    Some((base.to_string(), quote.to_string()))
}

/// Accepts only non-empty strings of ASCII digits.
pub fn digits_or_null(s: &str) -> Option<String> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        Some(s.to_string())
    } else {
        None
    }
}

/// Parses a `reserves` attribute of the form `"denom1:amt1,denom2:amt2"`.
/// Missing or malformed legs come back as `None` so the caller can recover
/// from direct attributes.
pub fn parse_reserves_kv(s: &str) -> [Option<AssetAmount>; 2] {
    let mut out: [Option<AssetAmount>; 2] = [None, None];
    for (slot, part) in s.split(',').take(2).enumerate() {
        let Some((denom, amount)) = part.trim().rsplit_once(':') else {
            continue;
        };
        let denom = denom.trim();
        if denom.is_empty() {
            continue;
        }
        if let Some(amount_base) = digits_or_null(amount.trim()) {
            out[slot] = Some(AssetAmount {
                denom: denom.to_string(),
                amount_base,
            });
        }
    }
    out
}

/// Parses an `assets` / `refund_assets` attribute: a comma-separated list of
/// Cosmos coin strings (`"1000000uzig, 250000factory/zig1abc/tok"`).
pub fn parse_assets_list(s: &str) -> [Option<AssetAmount>; 2] {
    let mut out: [Option<AssetAmount>; 2] = [None, None];
    for (slot, part) in s.split(',').take(2).enumerate() {
        out[slot] = parse_coin(part.trim());
    }
    out
}

fn parse_coin(s: &str) -> Option<AssetAmount> {
    let digits_end = s.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits_end == 0 || digits_end == s.len() {
        return None;
    }
    let (amount, denom) = s.split_at(digits_end);
    let denom = denom.trim();
    if denom.is_empty() {
        return None;
    }
    Some(AssetAmount {
        denom: denom.to_string(),
        amount_base: amount.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn wasm_event(pairs: &[(&str, &str)]) -> AbciEvent {
        AbciEvent {
            kind: "wasm".to_string(),
            attrs: EventAttrs::new(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    #[test]
    fn tx_hash_matches_node_convention() {
        // sha256("") uppercased
        assert_eq!(
            tx_hash_hex(b""),
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        );
        assert_eq!(tx_hash_hex(b"hello").len(), 64);
    }

    #[test]
    fn normalize_pair_native_side_is_quote() {
        assert_eq!(
            normalize_pair("factory/zig1abc/tok-uzig"),
            Some(("factory/zig1abc/tok".to_string(), "uzig".to_string()))
        );
        assert_eq!(
            normalize_pair("uzig-factory/zig1abc/tok"),
            Some(("factory/zig1abc/tok".to_string(), "uzig".to_string()))
        );
    }

    #[test]
    fn normalize_pair_lexical_order_picks_quote() {
        // neither side native: greater denom becomes quote
        assert_eq!(
            normalize_pair("bbb, aaa"),
            Some(("aaa".to_string(), "bbb".to_string()))
        );
        assert_eq!(
            normalize_pair("aaa-bbb"),
            Some(("aaa".to_string(), "bbb".to_string()))
        );
        // tie: right-hand side wins
        assert_eq!(
            normalize_pair("same-same"),
            Some(("same".to_string(), "same".to_string()))
        );
    }

    #[test]
    fn normalize_pair_splits_at_first_dash() {
        // denoms containing dashes split at the first one
        assert_eq!(
            normalize_pair("no-separator-at-all"),
            Some(("no".to_string(), "separator-at-all".to_string()))
        );
        assert_eq!(normalize_pair("loneword"), None);
        assert_eq!(normalize_pair("-"), None);
    }

    #[test]
    fn digits_or_null_rejects_non_digits() {
        assert_eq!(digits_or_null("1000000"), Some("1000000".to_string()));
        assert_eq!(digits_or_null(""), None);
        assert_eq!(digits_or_null("10.5"), None);
        assert_eq!(digits_or_null("1e6"), None);
        assert_eq!(digits_or_null("-5"), None);
    }

    #[test]
    fn parse_assets_list_coin_format() {
        let legs = parse_assets_list("1000000uzig, 250000factory/zig1abc/tok");
        assert_eq!(
            legs[0],
            Some(AssetAmount {
                denom: "uzig".to_string(),
                amount_base: "1000000".to_string()
            })
        );
        assert_eq!(
            legs[1],
            Some(AssetAmount {
                denom: "factory/zig1abc/tok".to_string(),
                amount_base: "250000".to_string()
            })
        );
    }

    #[test]
    fn parse_assets_list_missing_leg_is_none() {
        let legs = parse_assets_list("1000000uzig");
        assert!(legs[0].is_some());
        assert!(legs[1].is_none());

        let legs = parse_assets_list("garbage, 5uzig");
        assert!(legs[0].is_none());
        assert_eq!(legs[1].as_ref().unwrap().amount_base, "5");
    }

    #[test]
    fn parse_reserves_kv_format() {
        let legs = parse_reserves_kv("uzig:1000000,factory/zig1abc/tok:250000");
        assert_eq!(legs[0].as_ref().unwrap().denom, "uzig");
        assert_eq!(legs[0].as_ref().unwrap().amount_base, "1000000");
        assert_eq!(legs[1].as_ref().unwrap().denom, "factory/zig1abc/tok");
    }

    #[test]
    fn parse_reserves_kv_bad_amounts_are_none() {
        let legs = parse_reserves_kv("uzig:12x,tok:9");
        assert!(legs[0].is_none());
        assert_eq!(legs[1].as_ref().unwrap().amount_base, "9");
    }

    #[test]
    fn wasm_by_action_filters_and_preserves_order() {
        let events = vec![
            wasm_event(&[("action", "swap"), ("offer_amount", "1")]),
            AbciEvent {
                kind: "message".to_string(),
                attrs: EventAttrs::new(vec![("action".to_string(), "swap".to_string())]),
            },
            wasm_event(&[("action", "create_pair")]),
            wasm_event(&[("action", "swap"), ("offer_amount", "2")]),
        ];

        let swaps = wasm_by_action(&events, "swap");
        assert_eq!(swaps.len(), 2);
        assert_eq!(swaps[0].attrs.get("offer_amount"), Some("1"));
        assert_eq!(swaps[1].attrs.get("offer_amount"), Some("2"));
        assert_eq!(wasm_by_action(&events, "create_pair").len(), 1);
    }

    #[test]
    fn sender_map_keyed_by_msg_index() {
        let events = vec![
            AbciEvent {
                kind: "message".to_string(),
                attrs: EventAttrs::new(vec![
                    ("sender".to_string(), "zig1alice".to_string()),
                    ("msg_index".to_string(), "0".to_string()),
                ]),
            },
            AbciEvent {
                kind: "message".to_string(),
                attrs: EventAttrs::new(vec![
                    ("sender".to_string(), "zig1bob".to_string()),
                    ("msg_index".to_string(), "1".to_string()),
                ]),
            },
            // duplicate sender for msg 0 must not overwrite the first
            AbciEvent {
                kind: "message".to_string(),
                attrs: EventAttrs::new(vec![
                    ("sender".to_string(), "zig1charlie".to_string()),
                    ("msg_index".to_string(), "0".to_string()),
                ]),
            },
        ];

        let map = build_msg_sender_map(&events);
        assert_eq!(map.get(&0).map(String::as_str), Some("zig1alice"));
        assert_eq!(map.get(&1).map(String::as_str), Some("zig1bob"));
    }

    #[test]
    fn block_json_round_trip() {
        let tx_b64 = general_purpose::STANDARD.encode(b"rawtx");
        let v = json!({
            "result": {
                "block": {
                    "header": { "height": "412", "time": "2025-06-01T12:30:45Z" },
                    "data": { "txs": [tx_b64] }
                }
            }
        });

        let block = parse_block_json(&v).unwrap();
        assert_eq!(block.height, 412);
        assert_eq!(block.txs.len(), 1);
        assert_eq!(block.txs[0], b"rawtx");
    }

    #[test]
    fn block_results_skips_failed_txs() {
        let v = json!({
            "result": {
                "txs_results": [
                    {
                        "code": 0,
                        "events": [
                            { "type": "wasm", "attributes": [
                                { "key": "action", "value": "swap" }
                            ]}
                        ]
                    },
                    { "code": 5, "events": [
                        { "type": "wasm", "attributes": [
                            { "key": "action", "value": "swap" }
                        ]}
                    ]}
                ]
            }
        });

        let per_tx = parse_block_results_json(&v);
        assert_eq!(per_tx.len(), 2);
        assert_eq!(per_tx[0].len(), 1);
        assert!(per_tx[1].is_empty());
    }
}
