//! Live trade fan-out: a topic hub for WebSocket subscribers and the pump
//! that tails the trades table past a watermark.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;
use tokio::sync::mpsc;

/// Topic receiving every trade.
pub const TOPIC_ALL_TRADES: &str = "trades.stream";

pub const PUMP_INTERVAL: Duration = Duration::from_secs(2);
pub const PUMP_LIMIT: i64 = 200;
const COLD_START_LOOKBACK_MIN: i64 = 10;

/// Subscriber registry keyed by topic. Fan-out clones the sender list under
/// a read lock and delivers outside it, so a slow consumer never blocks
/// registration.
#[derive(Default)]
pub struct Hub {
    next_conn: AtomicU64,
    topics: RwLock<HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an id for a new connection.
    pub fn next_conn_id(&self) -> u64 {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    pub fn subscribe(&self, conn_id: u64, topic: &str, tx: mpsc::UnboundedSender<String>) {
        let mut topics = self.topics.write().expect("hub lock poisoned");
        let subs = topics.entry(topic.to_string()).or_default();
        if !subs.iter().any(|(id, _)| *id == conn_id) {
            subs.push((conn_id, tx));
        }
    }

    pub fn unsubscribe(&self, conn_id: u64, topic: &str) {
        let mut topics = self.topics.write().expect("hub lock poisoned");
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|(id, _)| *id != conn_id);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Removes a closed connection from every topic.
    pub fn drop_conn(&self, conn_id: u64) {
        let mut topics = self.topics.write().expect("hub lock poisoned");
        topics.retain(|_, subs| {
            subs.retain(|(id, _)| *id != conn_id);
            !subs.is_empty()
        });
    }

    /// Sends `frame` to every subscriber of `topic`, returning the delivery
    /// count.
    pub fn publish(&self, topic: &str, frame: &str) -> usize {
        let subs: Vec<mpsc::UnboundedSender<String>> = {
            let topics = self.topics.read().expect("hub lock poisoned");
            match topics.get(topic) {
                Some(subs) => subs.iter().map(|(_, tx)| tx.clone()).collect(),
                None => return 0,
            }
        };
        subs.iter()
            .filter(|tx| tx.send(frame.to_string()).is_ok())
            .count()
    }
}

/// One joined trade row as read by the pump.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BroadcastTrade {
    pub created_at: DateTime<Utc>,
    pub tx_hash: String,
    pub signer: Option<String>,
    pub direction: String,
    pub offer_denom: Option<String>,
    pub offer_amount_base: Option<String>,
    pub ask_denom: Option<String>,
    pub ask_amount_base: Option<String>,
    pub return_amount_base: Option<String>,
    pub value_zig: Option<f64>,
    pub pair_contract: String,
    pub base_denom: String,
    pub quote_denom: String,
    pub base_token_id: i64,
    pub base_symbol: Option<String>,
    pub base_exponent: i32,
    pub quote_exponent: i32,
}

impl BroadcastTrade {
    fn exponent_of(&self, denom: Option<&str>) -> i32 {
        match denom {
            Some(d) if d == self.base_denom => self.base_exponent,
            Some(d) if d == self.quote_denom => self.quote_exponent,
            _ => 6,
        }
    }

    /// Topics this trade fans out to: the global stream, the base token by
    /// id, symbol and denom, and the pair contract.
    pub fn topics(&self) -> Vec<String> {
        let mut topics = vec![
            TOPIC_ALL_TRADES.to_string(),
            format!("trades.stream.token:{}", self.base_token_id),
            format!("trades.stream.token:{}", self.base_denom),
            format!("trades.stream.pair:{}", self.pair_contract),
        ];
        if let Some(symbol) = &self.base_symbol {
            topics.push(format!("trades.stream.token:{symbol}"));
        }
        topics
    }
}

fn display_amount(amount_base: &Option<String>, exponent: i32) -> Option<f64> {
    amount_base
        .as_deref()
        .and_then(|s| s.parse::<f64>().ok())
        .map(|v| v / 10f64.powi(exponent))
}

/// Shapes a trade into the broadcast wire format. Base-unit amounts stay
/// decimal strings; display amounts become floats here, the only place
/// precision loss is acceptable.
pub fn shape_trade(t: &BroadcastTrade) -> Value {
    let offer_exp = t.exponent_of(t.offer_denom.as_deref());
    let ask_exp = t.exponent_of(t.ask_denom.as_deref());
    let value_native = t.value_zig.unwrap_or(0.0);

    json!({
        "type": "trade",
        "data": {
            "time": t.created_at.to_rfc3339(),
            "txHash": t.tx_hash,
            "pairContract": t.pair_contract,
            "signer": t.signer,
            "direction": t.direction,
            "offerDenom": t.offer_denom,
            "offerAmountBase": t.offer_amount_base,
            "offerAmount": display_amount(&t.offer_amount_base, offer_exp),
            "askDenom": t.ask_denom,
            "askAmountBase": t.ask_amount_base,
            "askAmount": display_amount(&t.ask_amount_base, ask_exp),
            "returnAmountBase": t.return_amount_base,
            "returnAmount": display_amount(&t.return_amount_base, ask_exp),
            "valueNative": value_native,
            // USD conversion belongs to the shaping consumers; the core
            // has no oracle.
            "valueUsd": 0.0,
        }
    })
}

/// Trades strictly newer than `after`, oldest first, capped at `limit`.
pub async fn trades_since(
    db: &PgPool,
    after: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<BroadcastTrade>> {
    let rows = sqlx::query_as::<_, BroadcastTrade>(
        r#"
        SELECT
            t.created_at, t.tx_hash, t.signer, t.direction,
            t.offer_denom, t.offer_amount_base::text AS offer_amount_base,
            t.ask_denom, t.ask_amount_base::text AS ask_amount_base,
            t.return_amount_base::text AS return_amount_base,
            t.value_zig::float8 AS value_zig,
            p.pair_contract, p.base_denom, p.quote_denom,
            b.token_id AS base_token_id, b.symbol AS base_symbol,
            b.exponent AS base_exponent, q.exponent AS quote_exponent
        FROM trades t
        JOIN pools p ON p.pool_id = t.pool_id
        JOIN tokens b ON b.token_id = p.base_token_id
        JOIN tokens q ON q.token_id = p.quote_token_id
        WHERE t.created_at > $1
        ORDER BY t.created_at ASC
        LIMIT $2
        "#,
    )
    .bind(after)
    .bind(limit)
    .fetch_all(db)
    .await?;

    Ok(rows)
}

/// Polls for new trades and fans them out. The strictly-greater-than
/// watermark makes duplicates within one pump impossible; on cold start it
/// rewinds ten minutes so restarts replay the recent tail (at-least-once).
pub async fn run_trade_pump(db: PgPool, hub: std::sync::Arc<Hub>) {
    let mut watermark = Utc::now() - chrono::Duration::minutes(COLD_START_LOOKBACK_MIN);
    tracing::info!(%watermark, "trade pump starting");

    loop {
        tokio::time::sleep(PUMP_INTERVAL).await;

        let trades = match trades_since(&db, watermark, PUMP_LIMIT).await {
            Ok(trades) => trades,
            Err(err) => {
                tracing::error!("trade pump query failed: {err:#}");
                continue;
            }
        };
        let Some(last) = trades.last() else { continue };
        watermark = last.created_at;

        for trade in &trades {
            let frame = shape_trade(trade).to_string();
            for topic in trade.topics() {
                hub.publish(&topic, &frame);
            }
        }
        tracing::debug!(count = trades.len(), %watermark, "trades broadcast");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn s1_trade() -> BroadcastTrade {
        BroadcastTrade {
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 45).unwrap(),
            tx_hash: "AB".repeat(32),
            signer: Some("zig1trader".to_string()),
            direction: "buy".to_string(),
            offer_denom: Some("uzig".to_string()),
            offer_amount_base: Some("1000000".to_string()),
            ask_denom: Some("factory/zig1abc/tok".to_string()),
            ask_amount_base: None,
            return_amount_base: Some("250000".to_string()),
            value_zig: Some(1.0),
            pair_contract: "zig1pair".to_string(),
            base_denom: "factory/zig1abc/tok".to_string(),
            quote_denom: "uzig".to_string(),
            base_token_id: 42,
            base_symbol: Some("TOK".to_string()),
            base_exponent: 6,
            quote_exponent: 6,
        }
    }

    #[test]
    fn shape_preserves_base_amounts_as_strings() {
        let frame = shape_trade(&s1_trade());
        assert_eq!(frame["type"], "trade");
        let data = &frame["data"];
        assert_eq!(data["offerAmountBase"], "1000000");
        assert_eq!(data["returnAmountBase"], "250000");
        assert_eq!(data["offerAmount"], 1.0);
        assert_eq!(data["returnAmount"], 0.25);
        assert_eq!(data["valueNative"], 1.0);
        assert_eq!(data["direction"], "buy");
        assert_eq!(data["pairContract"], "zig1pair");
    }

    #[test]
    fn topics_cover_token_aliases_and_pair() {
        let topics = s1_trade().topics();
        assert!(topics.contains(&"trades.stream".to_string()));
        assert!(topics.contains(&"trades.stream.token:42".to_string()));
        assert!(topics.contains(&"trades.stream.token:TOK".to_string()));
        assert!(topics.contains(&"trades.stream.token:factory/zig1abc/tok".to_string()));
        assert!(topics.contains(&"trades.stream.pair:zig1pair".to_string()));
    }

    #[test]
    fn hub_publishes_only_to_matching_topic() {
        let hub = Hub::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let a = hub.next_conn_id();
        let b = hub.next_conn_id();
        hub.subscribe(a, "trades.stream.pair:zig1pair", tx_a);
        hub.subscribe(b, "trades.stream.pair:zig1other", tx_b);

        assert_eq!(hub.publish("trades.stream.pair:zig1pair", "frame"), 1);
        assert_eq!(rx_a.try_recv().ok().as_deref(), Some("frame"));
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn hub_unsubscribe_and_drop_conn() {
        let hub = Hub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = hub.next_conn_id();
        hub.subscribe(conn, "trades.stream", tx.clone());
        hub.subscribe(conn, "trades.stream.pair:p", tx);

        hub.unsubscribe(conn, "trades.stream");
        assert_eq!(hub.publish("trades.stream", "x"), 0);
        assert_eq!(hub.publish("trades.stream.pair:p", "x"), 1);

        hub.drop_conn(conn);
        assert_eq!(hub.publish("trades.stream.pair:p", "x"), 0);
    }

    #[test]
    fn hub_duplicate_subscribe_delivers_once() {
        let hub = Hub::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.next_conn_id();
        hub.subscribe(conn, "trades.stream", tx.clone());
        hub.subscribe(conn, "trades.stream", tx);

        assert_eq!(hub.publish("trades.stream", "once"), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
