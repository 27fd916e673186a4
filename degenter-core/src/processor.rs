//! Block pipeline: fetch, scan, phase-1 pools, phase-2 trades and prices,
//! low-priority metadata, then the watermark.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::PgPool;

use crate::config::Tuning;
use crate::db::set_last_height;
use crate::events::{
    build_msg_sender_map, normalize_pair, parse_assets_list, parse_reserves_kv, wasm_by_action,
    AbciEvent, TxEvents,
};
use crate::lcd::LcdClient;
use crate::models::{
    AssetAmount, NewTrade, PairType, PoolWithTokens, SizeClass, TradeAction, TradeDirection,
    NATIVE_DENOM, NATIVE_EXPONENT,
};
use crate::notify::{NotifyBus, TOPIC_PAIR_CREATED};
use crate::ohlcv::{minute_floor, upsert_ohlcv_1m};
use crate::pools::{pool_with_tokens, pools_by_contracts, upsert_pool, PoolUpsertReq};
use crate::prices::{price_from_reserves, upsert_pool_state, upsert_price, PriceBasis};
use crate::rpc::RpcClient;
use crate::sched::{run_with_concurrency, TaskTimer};
use crate::tokens::set_token_meta_from_lcd;
use crate::trades::TradeSink;

/// One scanned swap or liquidity event, pending pool resolution.
#[derive(Debug, Clone)]
pub struct TradeReq {
    pub pair_contract: String,
    pub tx_hash: String,
    pub msg_index: i32,
    pub created_at: DateTime<Utc>,
    pub block_height: i64,
    pub action: TradeAction,
    pub signer: Option<String>,
    pub is_router: bool,
    pub offer_denom: Option<String>,
    pub offer_amount_base: Option<String>,
    pub ask_denom: Option<String>,
    pub ask_amount_base: Option<String>,
    pub return_amount_base: Option<String>,
    pub reserves: [Option<AssetAmount>; 2],
}

/// Task lists produced by scanning one transaction.
#[derive(Debug, Default)]
pub struct ScanOutput {
    pub phase1: Vec<PoolUpsertReq>,
    pub phase2: Vec<TradeReq>,
    pub meta: Vec<String>,
}

pub struct BlockProcessor {
    db: PgPool,
    rpc: RpcClient,
    lcd: LcdClient,
    bus: Arc<NotifyBus>,
    sink: TradeSink,
    tuning: Tuning,
    pool_cache: Mutex<HashMap<String, Arc<PoolWithTokens>>>,
    seen_denoms: Mutex<HashSet<String>>,
}

impl BlockProcessor {
    pub fn new(
        db: PgPool,
        rpc: RpcClient,
        lcd: LcdClient,
        bus: Arc<NotifyBus>,
        sink: TradeSink,
        tuning: Tuning,
    ) -> Self {
        Self {
            db,
            rpc,
            lcd,
            bus,
            sink,
            tuning,
            pool_cache: Mutex::new(HashMap::new()),
            seen_denoms: Mutex::new(HashSet::new()),
        }
    }

    /// Processes one height end to end. The watermark advances only when
    /// every stage has completed; a failure leaves it untouched so the
    /// caller retries and idempotent writes absorb the replay.
    pub async fn process_height(&self, height: i64) -> Result<()> {
        let (block, results) =
            tokio::try_join!(self.rpc.block(height), self.rpc.block_results(height))?;
        let txs = crate::events::assemble_txs(&block, results);

        let timer = TaskTimer::new();
        let mut phase1: Vec<PoolUpsertReq> = Vec::new();
        let mut phase2: Vec<TradeReq> = Vec::new();
        let mut meta: Vec<String> = Vec::new();

        for tx in &txs {
            let mut out = {
                let mut seen = self.seen_denoms.lock().expect("denom set lock poisoned");
                scan_tx(tx, block.time, height, self.tuning.router_addr.as_deref(), &mut seen)
            };
            phase1.append(&mut out.phase1);
            phase2.append(&mut out.phase2);
            meta.append(&mut out.meta);

            // Backpressure: flush mid-scan when too many trades pile up.
            // Pools must land first so the flushed trades can resolve.
            if phase2.len() > self.tuning.block_proc_max_tasks {
                tracing::info!(height, pending = phase2.len(), "mid-scan task flush");
                self.drain_phase1(std::mem::take(&mut phase1), &timer).await;
                self.drain_phase2(std::mem::take(&mut phase2), &timer).await;
            }
        }

        self.drain_phase1(std::mem::take(&mut phase1), &timer).await;
        self.drain_phase2(phase2, &timer).await;

        run_with_concurrency(
            meta,
            self.tuning.meta_concurrency,
            &timer,
            "meta",
            |denom| async move {
                set_token_meta_from_lcd(&self.db, &self.lcd, &denom).await;
                Ok(())
            },
        )
        .await;

        self.sink
            .drain()
            .await
            .map_err(|err| anyhow!("trade drain at height {height} failed: {err:#}"))?;

        set_last_height(&self.db, height).await?;
        tracing::info!(height, txs = txs.len(), "{}", timer.summary());
        Ok(())
    }

    async fn drain_phase1(&self, tasks: Vec<PoolUpsertReq>, timer: &TaskTimer) {
        run_with_concurrency(
            tasks,
            self.tuning.block_proc_concurrency,
            timer,
            "phase1",
            |req| async move { self.exec_pool_upsert(req).await },
        )
        .await;
    }

    async fn drain_phase2(&self, tasks: Vec<TradeReq>, timer: &TaskTimer) {
        self.prefetch_pools(&tasks).await;
        run_with_concurrency(
            tasks,
            self.tuning.block_proc_concurrency,
            timer,
            "phase2",
            |req| async move { self.exec_trade(req).await },
        )
        .await;
    }

    async fn exec_pool_upsert(&self, req: PoolUpsertReq) -> Result<()> {
        let (pool_id, created) = upsert_pool(&self.db, &req).await?;

        // Cache the full triple so phase-2 resolves without a round trip.
        if let Some(full) = pool_with_tokens(&self.db, &req.pair_contract).await? {
            self.pool_cache
                .lock()
                .expect("pool cache lock poisoned")
                .insert(req.pair_contract.clone(), Arc::new(full));
        }

        if let Some(payload) = created {
            tracing::info!(
                pool_id,
                pair_contract = %req.pair_contract,
                "pool created"
            );
            self.bus.publish(TOPIC_PAIR_CREATED, json!(payload));
        }
        Ok(())
    }

    /// Loads every pool referenced by the scanned trades into the cache in
    /// one query.
    async fn prefetch_pools(&self, tasks: &[TradeReq]) {
        let missing: Vec<String> = {
            let cache = self.pool_cache.lock().expect("pool cache lock poisoned");
            let mut wanted: Vec<String> = tasks
                .iter()
                .map(|t| t.pair_contract.clone())
                .filter(|c| !cache.contains_key(c))
                .collect();
            wanted.sort();
            wanted.dedup();
            wanted
        };
        if missing.is_empty() {
            return;
        }

        match pools_by_contracts(&self.db, &missing).await {
            Ok(found) => {
                let mut cache = self.pool_cache.lock().expect("pool cache lock poisoned");
                for p in found {
                    cache.insert(p.pool.pair_contract.clone(), Arc::new(p));
                }
            }
            Err(err) => tracing::warn!("pool prefetch failed: {err:#}"),
        }
    }

    async fn cached_pool(&self, pair_contract: &str) -> Result<Option<Arc<PoolWithTokens>>> {
        if let Some(p) = self
            .pool_cache
            .lock()
            .expect("pool cache lock poisoned")
            .get(pair_contract)
        {
            return Ok(Some(Arc::clone(p)));
        }
        let Some(full) = pool_with_tokens(&self.db, pair_contract).await? else {
            return Ok(None);
        };
        let full = Arc::new(full);
        self.pool_cache
            .lock()
            .expect("pool cache lock poisoned")
            .insert(pair_contract.to_string(), Arc::clone(&full));
        Ok(Some(full))
    }

    async fn exec_trade(&self, req: TradeReq) -> Result<()> {
        let Some(pool) = self.cached_pool(&req.pair_contract).await? else {
            tracing::warn!(
                pair_contract = %req.pair_contract,
                tx_hash = %req.tx_hash,
                "trade references unknown pool, skipping"
            );
            return Ok(());
        };

        let direction = match req.action {
            TradeAction::Provide => TradeDirection::Provide,
            TradeAction::Withdraw => TradeDirection::Withdraw,
            TradeAction::Swap => classify_direction(
                req.offer_denom.as_deref(),
                req.ask_denom.as_deref(),
                &pool.pool.base_denom,
                &pool.pool.quote_denom,
            ),
        };

        let value_zig = native_value(&req);
        let size_class = value_zig.map(SizeClass::from_zig_value);
        let legs: Vec<AssetAmount> = req.reserves.iter().flatten().cloned().collect();

        // Replays must not inflate the bar counters, so check the natural
        // key before this trade contributes to OHLCV.
        let replayed = if pool.pool.is_uzig_quote && req.action == TradeAction::Swap {
            crate::trades::trade_exists(
                &self.db,
                &req.tx_hash,
                pool.pool.pool_id,
                req.msg_index,
                req.created_at,
            )
            .await
            .unwrap_or(false)
        } else {
            false
        };

        self.sink
            .insert_trade(NewTrade {
                created_at: req.created_at,
                tx_hash: req.tx_hash.clone(),
                pool_id: pool.pool.pool_id,
                msg_index: req.msg_index,
                action: req.action,
                direction,
                offer_denom: req.offer_denom.clone(),
                offer_amount_base: req.offer_amount_base.clone(),
                ask_denom: req.ask_denom.clone(),
                ask_amount_base: req.ask_amount_base.clone(),
                return_amount_base: req.return_amount_base.clone(),
                reserve1_denom: req.reserves[0].as_ref().map(|l| l.denom.clone()),
                reserve1_amount: req.reserves[0].as_ref().map(|l| l.amount_base.clone()),
                reserve2_denom: req.reserves[1].as_ref().map(|l| l.denom.clone()),
                reserve2_amount: req.reserves[1].as_ref().map(|l| l.amount_base.clone()),
                value_zig,
                size_class,
                is_router: req.is_router,
                block_height: req.block_height,
                signer: req.signer.clone(),
            })
            .await;

        if !legs.is_empty() {
            upsert_pool_state(
                &self.db,
                pool.pool.pool_id,
                &pool.pool.base_denom,
                &pool.pool.quote_denom,
                &legs,
            )
            .await?;
        }

        // Prices and bars are written only for native-quote pools; cross
        // pools get converted by downstream shapers.
        if pool.pool.is_uzig_quote {
            if let Some(price) = price_from_reserves(&PriceBasis::of(&pool), &legs) {
                upsert_price(
                    &self.db,
                    pool.pool.base_token_id,
                    pool.pool.pool_id,
                    price,
                    true,
                    req.created_at,
                )
                .await?;

                if req.action == TradeAction::Swap && !replayed {
                    upsert_ohlcv_1m(
                        &self.db,
                        pool.pool.pool_id,
                        minute_floor(req.created_at),
                        price,
                        value_zig.unwrap_or(0.0),
                        1,
                    )
                    .await?;
                }
            }
        }

        Ok(())
    }
}

/// `buy` when the trader offers the quote denom, `sell` when they offer the
/// base; falls back to the ask side when the offer denom matches neither.
pub fn classify_direction(
    offer_denom: Option<&str>,
    ask_denom: Option<&str>,
    base_denom: &str,
    quote_denom: &str,
) -> TradeDirection {
    match offer_denom {
        Some(d) if d == quote_denom => return TradeDirection::Buy,
        Some(d) if d == base_denom => return TradeDirection::Sell,
        _ => {}
    }
    match ask_denom {
        Some(d) if d == base_denom => TradeDirection::Buy,
        Some(d) if d == quote_denom => TradeDirection::Sell,
        _ => {
            tracing::warn!(?offer_denom, ?ask_denom, "unclassifiable swap, defaulting to buy");
            TradeDirection::Buy
        }
    }
}

/// Native-unit notional of a trade: the uzig leg scaled to display units.
pub fn native_value(req: &TradeReq) -> Option<f64> {
    let scale = 10f64.powi(NATIVE_EXPONENT as i32);
    let parse = |s: &Option<String>| s.as_deref().and_then(|v| v.parse::<f64>().ok());

    match req.action {
        TradeAction::Swap => {
            if req.offer_denom.as_deref() == Some(NATIVE_DENOM) {
                parse(&req.offer_amount_base).map(|v| v / scale)
            } else if req.ask_denom.as_deref() == Some(NATIVE_DENOM) {
                parse(&req.return_amount_base)
                    .or_else(|| parse(&req.ask_amount_base))
                    .map(|v| v / scale)
            } else {
                None
            }
        }
        TradeAction::Provide | TradeAction::Withdraw => req
            .reserves
            .iter()
            .flatten()
            .find(|l| l.denom == NATIVE_DENOM)
            .and_then(|l| l.amount_base.parse::<f64>().ok())
            .map(|v| v / scale),
    }
}

/// Scans one transaction's events into task lists. Purely syntactic; pool
/// resolution happens at execution time.
pub fn scan_tx(
    tx: &TxEvents,
    block_time: DateTime<Utc>,
    height: i64,
    router_addr: Option<&str>,
    seen_denoms: &mut HashSet<String>,
) -> ScanOutput {
    let mut out = ScanOutput::default();
    let sender_map = build_msg_sender_map(&tx.events);
    let mut note_denom = |denom: &str, meta: &mut Vec<String>| {
        if seen_denoms.insert(denom.to_string()) {
            meta.push(denom.to_string());
        }
    };

    for event in wasm_by_action(&tx.events, "create_pair") {
        let msg_index = event.attrs.msg_index();
        let Some(pair_attr) = event.attrs.get("pair") else {
            tracing::warn!(tx_hash = %tx.tx_hash, "create_pair without pair attribute");
            continue;
        };
        let Some((base_denom, quote_denom)) = normalize_pair(pair_attr) else {
            tracing::warn!(tx_hash = %tx.tx_hash, pair = pair_attr, "unparseable pair attribute");
            continue;
        };
        let Some(factory) = event.attrs.get("_contract_address") else {
            continue;
        };
        let Some(pair_contract) =
            pair_contract_for(event, &tx.events, msg_index).map(str::to_string)
        else {
            tracing::warn!(tx_hash = %tx.tx_hash, "create_pair without pair contract");
            continue;
        };

        note_denom(&base_denom, &mut out.meta);
        note_denom(&quote_denom, &mut out.meta);
        out.phase1.push(PoolUpsertReq {
            pair_contract,
            factory_contract: factory.to_string(),
            base_denom,
            quote_denom,
            pair_type: PairType::parse(event.attrs.get("pair_type").unwrap_or("xyk")),
            creator: sender_map.get(&msg_index).cloned(),
            tx_hash: tx.tx_hash.clone(),
            block_height: height,
            created_at: block_time,
        });
    }

    for event in wasm_by_action(&tx.events, "swap") {
        let msg_index = event.attrs.msg_index();
        let Some(pair_contract) = event.attrs.get("_contract_address") else {
            continue;
        };
        let offer_denom = event.attrs.get("offer_asset").map(str::to_string);
        let ask_denom = event.attrs.get("ask_asset").map(str::to_string);
        for denom in [&offer_denom, &ask_denom].into_iter().flatten() {
            note_denom(denom, &mut out.meta);
        }

        let signer = sender_map
            .get(&msg_index)
            .cloned()
            .or_else(|| event.attrs.get("sender").map(str::to_string));

        out.phase2.push(TradeReq {
            pair_contract: pair_contract.to_string(),
            tx_hash: tx.tx_hash.clone(),
            msg_index,
            created_at: block_time,
            block_height: height,
            action: TradeAction::Swap,
            signer,
            is_router: detect_router(event, &tx.events, msg_index, router_addr),
            offer_denom,
            offer_amount_base: event.attrs.digits("offer_amount"),
            ask_denom,
            ask_amount_base: event.attrs.digits("ask_amount"),
            return_amount_base: event.attrs.digits("return_amount"),
            reserves: resolve_reserves(event, &["reserves", "assets"]),
        });
    }

    for (action_name, action, assets_key) in [
        ("provide_liquidity", TradeAction::Provide, "assets"),
        ("withdraw_liquidity", TradeAction::Withdraw, "refund_assets"),
    ] {
        for event in wasm_by_action(&tx.events, action_name) {
            let msg_index = event.attrs.msg_index();
            let Some(pair_contract) = event.attrs.get("_contract_address") else {
                continue;
            };
            let share = event
                .attrs
                .digits("share")
                .or_else(|| event.attrs.digits("withdrawn_share"));
            let reserves = resolve_reserves(event, &["reserves", assets_key]);
            for leg in reserves.iter().flatten() {
                note_denom(&leg.denom, &mut out.meta);
            }

            out.phase2.push(TradeReq {
                pair_contract: pair_contract.to_string(),
                tx_hash: tx.tx_hash.clone(),
                msg_index,
                created_at: block_time,
                block_height: height,
                action,
                signer: sender_map
                    .get(&msg_index)
                    .cloned()
                    .or_else(|| event.attrs.get("sender").map(str::to_string)),
                is_router: detect_router(event, &tx.events, msg_index, router_addr),
                offer_denom: None,
                offer_amount_base: None,
                ask_denom: None,
                ask_amount_base: None,
                return_amount_base: share,
                reserves,
            });
        }
    }

    out
}

/// The new pair contract: a direct attribute when the factory emits one,
/// otherwise the `instantiate` event of the same message.
fn pair_contract_for<'a>(
    event: &'a AbciEvent,
    events: &'a [AbciEvent],
    msg_index: i32,
) -> Option<&'a str> {
    event.attrs.get("pair_contract_addr").or_else(|| {
        events
            .iter()
            .find(|e| e.kind == "instantiate" && e.attrs.msg_index() == msg_index)
            .and_then(|e| e.attrs.get("_contract_address"))
    })
}

/// Reserve legs with the documented fallback order: direct
/// `reserve_asset{1,2}_*` attributes, then the structured keys, else null.
fn resolve_reserves(event: &AbciEvent, structured_keys: &[&str]) -> [Option<AssetAmount>; 2] {
    let direct = |n: u8| {
        let denom = event.attrs.get(&format!("reserve_asset{n}_denom"))?;
        let amount = event.attrs.digits(&format!("reserve_asset{n}_amount"))?;
        Some(AssetAmount {
            denom: denom.to_string(),
            amount_base: amount,
        })
    };
    let legs = [direct(1), direct(2)];
    if legs.iter().any(Option::is_some) {
        return legs;
    }

    for key in structured_keys {
        if let Some(raw) = event.attrs.get(key) {
            let parsed = if raw.contains(':') {
                parse_reserves_kv(raw)
            } else {
                parse_assets_list(raw)
            };
            if parsed.iter().any(Option::is_some) {
                return parsed;
            }
        }
    }
    [None, None]
}

/// A swap is router-originated when its `sender` attribute is the router or
/// any `execute` event of the same message targets the router.
fn detect_router(
    event: &AbciEvent,
    events: &[AbciEvent],
    msg_index: i32,
    router_addr: Option<&str>,
) -> bool {
    let Some(router) = router_addr else {
        return false;
    };
    if event.attrs.get("sender") == Some(router) {
        return true;
    }
    events.iter().any(|e| {
        e.kind == "execute"
            && e.attrs.msg_index() == msg_index
            && e.attrs.get("_contract_address") == Some(router)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventAttrs;
    use chrono::TimeZone;

    fn event(kind: &str, pairs: &[(&str, &str)]) -> AbciEvent {
        AbciEvent {
            kind: kind.to_string(),
            attrs: EventAttrs::new(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    fn block_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 45).unwrap()
    }

    fn s1_tx() -> TxEvents {
        TxEvents {
            tx_index: 0,
            tx_hash: "AB".repeat(32),
            events: vec![
                event(
                    "message",
                    &[("sender", "zig1creator"), ("msg_index", "0")],
                ),
                event(
                    "wasm",
                    &[
                        ("_contract_address", "zig1factory"),
                        ("action", "create_pair"),
                        ("pair", "factory/zig1abc/tok-uzig"),
                        ("pair_type", "xyk"),
                        ("msg_index", "0"),
                    ],
                ),
                event(
                    "instantiate",
                    &[("_contract_address", "zig1pair"), ("msg_index", "0")],
                ),
                event(
                    "message",
                    &[("sender", "zig1trader"), ("msg_index", "1")],
                ),
                event(
                    "wasm",
                    &[
                        ("_contract_address", "zig1pair"),
                        ("action", "swap"),
                        ("offer_asset", "uzig"),
                        ("ask_asset", "factory/zig1abc/tok"),
                        ("offer_amount", "1000000"),
                        ("return_amount", "250000"),
                        ("reserve_asset1_denom", "uzig"),
                        ("reserve_asset1_amount", "1000000"),
                        ("reserve_asset2_denom", "factory/zig1abc/tok"),
                        ("reserve_asset2_amount", "250000"),
                        ("msg_index", "1"),
                    ],
                ),
            ],
        }
    }

    #[test]
    fn scan_create_and_swap() {
        let mut seen = HashSet::new();
        let out = scan_tx(&s1_tx(), block_time(), 412, None, &mut seen);

        assert_eq!(out.phase1.len(), 1);
        let p = &out.phase1[0];
        assert_eq!(p.pair_contract, "zig1pair");
        assert_eq!(p.factory_contract, "zig1factory");
        assert_eq!(p.base_denom, "factory/zig1abc/tok");
        assert_eq!(p.quote_denom, "uzig");
        assert_eq!(p.creator.as_deref(), Some("zig1creator"));

        assert_eq!(out.phase2.len(), 1);
        let t = &out.phase2[0];
        assert_eq!(t.pair_contract, "zig1pair");
        assert_eq!(t.action, TradeAction::Swap);
        assert_eq!(t.msg_index, 1);
        assert_eq!(t.signer.as_deref(), Some("zig1trader"));
        assert_eq!(t.offer_amount_base.as_deref(), Some("1000000"));
        assert_eq!(t.return_amount_base.as_deref(), Some("250000"));
        assert_eq!(t.reserves[0].as_ref().unwrap().denom, "uzig");
        assert_eq!(t.reserves[1].as_ref().unwrap().amount_base, "250000");

        // both denoms queued for metadata exactly once
        assert_eq!(out.meta.len(), 2);
        let again = scan_tx(&s1_tx(), block_time(), 413, None, &mut seen);
        assert!(again.meta.is_empty());
    }

    #[test]
    fn scan_detects_router_by_sender_attr() {
        let mut tx = s1_tx();
        // swap event sender attribute set to the router
        tx.events.push(event(
            "wasm",
            &[
                ("_contract_address", "zig1pair"),
                ("action", "swap"),
                ("sender", "zig1router"),
                ("offer_asset", "uzig"),
                ("offer_amount", "5"),
                ("msg_index", "2"),
            ],
        ));
        let mut seen = HashSet::new();
        let out = scan_tx(&tx, block_time(), 412, Some("zig1router"), &mut seen);
        assert_eq!(out.phase2.len(), 2);
        assert!(!out.phase2[0].is_router);
        assert!(out.phase2[1].is_router);
    }

    #[test]
    fn scan_detects_router_by_execute_event() {
        let mut tx = s1_tx();
        tx.events.push(event(
            "execute",
            &[("_contract_address", "zig1router"), ("msg_index", "1")],
        ));
        let mut seen = HashSet::new();
        let out = scan_tx(&tx, block_time(), 412, Some("zig1router"), &mut seen);
        assert!(out.phase2[0].is_router);

        // no router configured means never flagged
        let mut seen = HashSet::new();
        let out = scan_tx(&tx, block_time(), 412, None, &mut seen);
        assert!(!out.phase2[0].is_router);
    }

    #[test]
    fn scan_liquidity_events() {
        let tx = TxEvents {
            tx_index: 0,
            tx_hash: "CD".repeat(32),
            events: vec![
                event("message", &[("sender", "zig1lp"), ("msg_index", "0")]),
                event(
                    "wasm",
                    &[
                        ("_contract_address", "zig1pair"),
                        ("action", "provide_liquidity"),
                        ("assets", "1000000uzig, 250000factory/zig1abc/tok"),
                        ("share", "499999"),
                        ("msg_index", "0"),
                    ],
                ),
                event(
                    "wasm",
                    &[
                        ("_contract_address", "zig1pair"),
                        ("action", "withdraw_liquidity"),
                        ("refund_assets", "500000uzig, 125000factory/zig1abc/tok"),
                        ("withdrawn_share", "250000"),
                        ("msg_index", "1"),
                    ],
                ),
            ],
        };

        let mut seen = HashSet::new();
        let out = scan_tx(&tx, block_time(), 500, None, &mut seen);
        assert_eq!(out.phase2.len(), 2);

        let provide = &out.phase2[0];
        assert_eq!(provide.action, TradeAction::Provide);
        assert!(provide.offer_denom.is_none());
        assert_eq!(provide.return_amount_base.as_deref(), Some("499999"));
        assert_eq!(provide.reserves[0].as_ref().unwrap().denom, "uzig");

        let withdraw = &out.phase2[1];
        assert_eq!(withdraw.action, TradeAction::Withdraw);
        assert_eq!(withdraw.return_amount_base.as_deref(), Some("250000"));
        assert_eq!(
            withdraw.reserves[1].as_ref().unwrap().denom,
            "factory/zig1abc/tok"
        );
    }

    #[test]
    fn direction_classification() {
        let base = "factory/zig1abc/tok";
        let quote = "uzig";
        assert_eq!(
            classify_direction(Some("uzig"), Some(base), base, quote),
            TradeDirection::Buy
        );
        assert_eq!(
            classify_direction(Some(base), Some("uzig"), base, quote),
            TradeDirection::Sell
        );
        // offer unknown, ask side decides
        assert_eq!(
            classify_direction(Some("ibc/other"), Some(base), base, quote),
            TradeDirection::Buy
        );
        assert_eq!(
            classify_direction(None, Some("uzig"), base, quote),
            TradeDirection::Sell
        );
    }

    #[test]
    fn native_value_for_s1_swap() {
        let mut seen = HashSet::new();
        let out = scan_tx(&s1_tx(), block_time(), 412, None, &mut seen);
        let z = native_value(&out.phase2[0]);
        assert_eq!(z, Some(1.0));
        assert_eq!(z.map(SizeClass::from_zig_value), Some(SizeClass::Shrimp));
    }

    #[test]
    fn native_value_for_sell_side_swap() {
        let req = TradeReq {
            pair_contract: "zig1pair".to_string(),
            tx_hash: "EF".repeat(32),
            msg_index: 0,
            created_at: block_time(),
            block_height: 1,
            action: TradeAction::Swap,
            signer: None,
            is_router: false,
            offer_denom: Some("factory/zig1abc/tok".to_string()),
            offer_amount_base: Some("250000".to_string()),
            ask_denom: Some("uzig".to_string()),
            ask_amount_base: None,
            return_amount_base: Some("12000000000".to_string()),
            reserves: [None, None],
        };
        // 12_000 ZIG returned on the native side
        assert_eq!(native_value(&req), Some(12_000.0));
        assert_eq!(
            native_value(&req).map(SizeClass::from_zig_value),
            Some(SizeClass::Whale)
        );
    }

    #[test]
    fn reserves_fallback_to_structured_attribute() {
        let e = event(
            "wasm",
            &[
                ("_contract_address", "zig1pair"),
                ("action", "swap"),
                ("reserves", "uzig:1000000,factory/zig1abc/tok:250000"),
            ],
        );
        let legs = resolve_reserves(&e, &["reserves", "assets"]);
        assert_eq!(legs[0].as_ref().unwrap().denom, "uzig");
        assert_eq!(legs[1].as_ref().unwrap().amount_base, "250000");

        // direct attributes win over the structured form
        let e = event(
            "wasm",
            &[
                ("reserve_asset1_denom", "uzig"),
                ("reserve_asset1_amount", "7"),
                ("reserves", "uzig:1000000,tok:250000"),
            ],
        );
        let legs = resolve_reserves(&e, &["reserves"]);
        assert_eq!(legs[0].as_ref().unwrap().amount_base, "7");
        assert!(legs[1].is_none());
    }
}
