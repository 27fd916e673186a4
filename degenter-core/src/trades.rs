//! Batched, deduplicated trade persistence.
//!
//! `insert_trade` enqueues and returns immediately; the underlying batch
//! queue coalesces up to `TRADES_BATCH_MAX` rows or `TRADES_BATCH_WAIT_MS`
//! and lands them in a single multi-row insert. Replays are absorbed by the
//! natural-key conflict target.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use bigdecimal::BigDecimal;
use sqlx::{PgPool, QueryBuilder};

use crate::batch::BatchQueue;
use crate::models::NewTrade;

#[derive(Clone)]
pub struct TradeSink {
    queue: BatchQueue<NewTrade>,
}

impl TradeSink {
    pub fn new(db: PgPool, max_items: usize, max_wait_ms: u64) -> Self {
        let queue = BatchQueue::new(
            max_items,
            Duration::from_millis(max_wait_ms),
            move |batch| {
                let db = db.clone();
                async move { flush_trades(&db, batch).await }
            },
        );
        Self { queue }
    }

    /// Enqueues one trade; the write happens on the next flush.
    pub async fn insert_trade(&self, trade: NewTrade) {
        self.queue.push(trade).await;
    }

    /// Forces a flush of everything queued and reports the outcome.
    pub async fn drain(&self) -> Result<()> {
        self.queue.drain().await
    }

    pub async fn pending(&self) -> usize {
        self.queue.pending().await
    }
}

/// Whether a trade with this natural key is already persisted. Used to keep
/// OHLCV contributions idempotent across height replays: a bar only counts
/// trades that actually insert.
pub async fn trade_exists(
    db: &PgPool,
    tx_hash: &str,
    pool_id: i64,
    msg_index: i32,
    created_at: chrono::DateTime<chrono::Utc>,
) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM trades
            WHERE tx_hash = $1 AND pool_id = $2 AND msg_index = $3 AND created_at = $4
        )
        "#,
    )
    .bind(tx_hash)
    .bind(pool_id)
    .bind(msg_index)
    .bind(created_at)
    .fetch_one(db)
    .await?;
    Ok(exists)
}

fn num(s: &Option<String>) -> Option<BigDecimal> {
    s.as_deref().and_then(|s| BigDecimal::from_str(s).ok())
}

async fn flush_trades(db: &PgPool, batch: Vec<NewTrade>) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let n = batch.len();

    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
        "INSERT INTO trades (created_at, tx_hash, pool_id, msg_index, action, direction, \
         offer_denom, offer_amount_base, ask_denom, ask_amount_base, return_amount_base, \
         reserve1_denom, reserve1_amount, reserve2_denom, reserve2_amount, \
         value_zig, size_class, is_router, block_height, signer) ",
    );
    qb.push_values(batch.iter(), |mut b, t| {
        b.push_bind(t.created_at)
            .push_bind(&t.tx_hash)
            .push_bind(t.pool_id)
            .push_bind(t.msg_index)
            .push_bind(t.action.as_str())
            .push_bind(t.direction.as_str())
            .push_bind(&t.offer_denom)
            .push_bind(num(&t.offer_amount_base))
            .push_bind(&t.ask_denom)
            .push_bind(num(&t.ask_amount_base))
            .push_bind(num(&t.return_amount_base))
            .push_bind(&t.reserve1_denom)
            .push_bind(num(&t.reserve1_amount))
            .push_bind(&t.reserve2_denom)
            .push_bind(num(&t.reserve2_amount))
            .push_bind(t.value_zig)
            .push_bind(t.size_class.map(|c| c.as_str()))
            .push_bind(t.is_router)
            .push_bind(t.block_height)
            .push_bind(&t.signer);
    });
    qb.push(" ON CONFLICT (tx_hash, pool_id, msg_index, created_at) DO NOTHING");

    qb.build().execute(db).await?;
    tracing::debug!(rows = n, "trade batch flushed");
    Ok(())
}
