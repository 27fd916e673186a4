//! Pool registry: upsert on `create_pair`, resolution of pair contracts to
//! their pool and token rows.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::{PairCreated, PairType, Pool, PoolWithTokens, Token, NATIVE_DENOM};
use crate::tokens::upsert_token_minimal;

/// Everything scanned from one `create_pair` event.
#[derive(Debug, Clone)]
pub struct PoolUpsertReq {
    pub pair_contract: String,
    pub factory_contract: String,
    pub base_denom: String,
    pub quote_denom: String,
    pub pair_type: PairType,
    pub creator: Option<String>,
    pub tx_hash: String,
    pub block_height: i64,
    pub created_at: DateTime<Utc>,
}

/// Atomic on `pair_contract` conflict. Returns the pool id and, when the row
/// was freshly inserted, the `pair_created` payload for the notify bus.
pub async fn upsert_pool(pool: &PgPool, req: &PoolUpsertReq) -> Result<(i64, Option<PairCreated>)> {
    let dex_id = resolve_dex(pool, &req.factory_contract).await?;
    let base_token_id = upsert_token_minimal(pool, &req.base_denom).await?;
    let quote_token_id = upsert_token_minimal(pool, &req.quote_denom).await?;
    let is_uzig_quote = req.quote_denom == NATIVE_DENOM;

    // xmax = 0 distinguishes a fresh insert from a conflict update.
    let (pool_id, inserted) = sqlx::query_as::<_, (i64, bool)>(
        r#"
        INSERT INTO pools (
            pair_contract, dex_id, base_token_id, quote_token_id,
            base_denom, quote_denom, pair_type, is_uzig_quote,
            creator, tx_hash, block_height, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (pair_contract) DO UPDATE SET pair_type = EXCLUDED.pair_type
        RETURNING pool_id, (xmax = 0) AS inserted
        "#,
    )
    .bind(&req.pair_contract)
    .bind(dex_id)
    .bind(base_token_id)
    .bind(quote_token_id)
    .bind(&req.base_denom)
    .bind(&req.quote_denom)
    .bind(req.pair_type.as_str())
    .bind(is_uzig_quote)
    .bind(&req.creator)
    .bind(&req.tx_hash)
    .bind(req.block_height)
    .bind(req.created_at)
    .fetch_one(pool)
    .await?;

    let payload = inserted.then(|| PairCreated {
        pool_id,
        pair_contract: req.pair_contract.clone(),
        base_denom: req.base_denom.clone(),
        quote_denom: req.quote_denom.clone(),
        base_token_id,
        quote_token_id,
        is_uzig_quote,
    });

    Ok((pool_id, payload))
}

/// Maps a factory contract to its catalogue entry, auto-inserting an
/// `UnknownDEX` row for factories we have never seen so foreign keys stay
/// satisfied.
async fn resolve_dex(pool: &PgPool, factory_contract: &str) -> Result<i64> {
    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT dex_id FROM dex_catalogue WHERE factory_contract = $1",
    )
    .bind(factory_contract)
    .fetch_optional(pool)
    .await?;
    if let Some(dex_id) = existing {
        return Ok(dex_id);
    }

    tracing::warn!(factory_contract, "unknown factory, registering UnknownDEX");
    let dex_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO dex_catalogue (name, factory_contract)
        VALUES ('UnknownDEX', $1)
        ON CONFLICT (factory_contract) DO UPDATE
            SET factory_contract = EXCLUDED.factory_contract
        RETURNING dex_id
        "#,
    )
    .bind(factory_contract)
    .fetch_one(pool)
    .await?;
    Ok(dex_id)
}

const POOL_WITH_TOKENS_SELECT: &str = r#"
    SELECT
        p.pool_id, p.pair_contract, p.dex_id, p.base_token_id, p.quote_token_id,
        p.base_denom, p.quote_denom, p.pair_type, p.is_uzig_quote, p.created_at,
        b.token_id AS b_token_id, b.denom AS b_denom, b.token_type AS b_token_type,
        b.name AS b_name, b.symbol AS b_symbol, b.display AS b_display,
        b.exponent AS b_exponent, b.holders_count AS b_holders_count,
        q.token_id AS q_token_id, q.denom AS q_denom, q.token_type AS q_token_type,
        q.name AS q_name, q.symbol AS q_symbol, q.display AS q_display,
        q.exponent AS q_exponent, q.holders_count AS q_holders_count
    FROM pools p
    JOIN tokens b ON b.token_id = p.base_token_id
    JOIN tokens q ON q.token_id = p.quote_token_id
"#;

#[derive(sqlx::FromRow)]
struct PoolWithTokensRow {
    pool_id: i64,
    pair_contract: String,
    dex_id: i64,
    base_token_id: i64,
    quote_token_id: i64,
    base_denom: String,
    quote_denom: String,
    pair_type: String,
    is_uzig_quote: bool,
    created_at: DateTime<Utc>,
    b_token_id: i64,
    b_denom: String,
    b_token_type: String,
    b_name: Option<String>,
    b_symbol: Option<String>,
    b_display: Option<String>,
    b_exponent: i32,
    b_holders_count: Option<i64>,
    q_token_id: i64,
    q_denom: String,
    q_token_type: String,
    q_name: Option<String>,
    q_symbol: Option<String>,
    q_display: Option<String>,
    q_exponent: i32,
    q_holders_count: Option<i64>,
}

fn row_to_pool_with_tokens(r: PoolWithTokensRow) -> PoolWithTokens {
    PoolWithTokens {
        pool: Pool {
            pool_id: r.pool_id,
            pair_contract: r.pair_contract,
            dex_id: r.dex_id,
            base_token_id: r.base_token_id,
            quote_token_id: r.quote_token_id,
            base_denom: r.base_denom,
            quote_denom: r.quote_denom,
            pair_type: r.pair_type,
            is_uzig_quote: r.is_uzig_quote,
            created_at: r.created_at,
        },
        base: Token {
            token_id: r.b_token_id,
            denom: r.b_denom,
            token_type: r.b_token_type,
            name: r.b_name,
            symbol: r.b_symbol,
            display: r.b_display,
            exponent: r.b_exponent,
            holders_count: r.b_holders_count,
        },
        quote: Token {
            token_id: r.q_token_id,
            denom: r.q_denom,
            token_type: r.q_token_type,
            name: r.q_name,
            symbol: r.q_symbol,
            display: r.q_display,
            exponent: r.q_exponent,
            holders_count: r.q_holders_count,
        },
    }
}

/// Full pool and token triple for a pair contract, or `None`.
pub async fn pool_with_tokens(pool: &PgPool, pair_contract: &str) -> Result<Option<PoolWithTokens>> {
    let row = sqlx::query_as::<_, PoolWithTokensRow>(&format!(
        "{POOL_WITH_TOKENS_SELECT} WHERE p.pair_contract = $1"
    ))
    .bind(pair_contract)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_pool_with_tokens))
}

/// Batch lookup used by the block processor's prefetch between phases.
pub async fn pools_by_contracts(
    pool: &PgPool,
    pair_contracts: &[String],
) -> Result<Vec<PoolWithTokens>> {
    if pair_contracts.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, PoolWithTokensRow>(&format!(
        "{POOL_WITH_TOKENS_SELECT} WHERE p.pair_contract = ANY($1)"
    ))
    .bind(pair_contracts)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_pool_with_tokens).collect())
}
