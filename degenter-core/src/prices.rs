//! Pool reserves and price derivation.
//!
//! Prices are always ZIG per one display unit of the base token, computed
//! from the two reserve legs. The writer only prices native-quote pools;
//! cross-quoted pools are converted downstream by the shapers.

use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::str::FromStr;

use crate::models::{AssetAmount, PoolWithTokens};

/// Denoms and exponents needed to turn matched reserves into a price.
#[derive(Debug, Clone)]
pub struct PriceBasis {
    pub base_denom: String,
    pub base_exponent: i32,
    pub quote_denom: String,
    pub quote_exponent: i32,
}

impl PriceBasis {
    pub fn of(pool: &PoolWithTokens) -> Self {
        Self {
            base_denom: pool.pool.base_denom.clone(),
            base_exponent: pool.base.exponent,
            quote_denom: pool.pool.quote_denom.clone(),
            quote_exponent: pool.quote.exponent,
        }
    }
}

/// `(quote_display / base_display)` with legs matched by denom. `None` when
/// a leg is missing, unmatched, unparseable, or zero.
pub fn price_from_reserves(basis: &PriceBasis, legs: &[AssetAmount]) -> Option<f64> {
    let base = legs.iter().find(|l| l.denom == basis.base_denom)?;
    let quote = legs.iter().find(|l| l.denom == basis.quote_denom)?;

    let base_amt: f64 = base.amount_base.parse().ok()?;
    let quote_amt: f64 = quote.amount_base.parse().ok()?;
    if base_amt == 0.0 || quote_amt == 0.0 {
        return None;
    }

    let base_display = base_amt / 10f64.powi(basis.base_exponent);
    let quote_display = quote_amt / 10f64.powi(basis.quote_exponent);
    Some(quote_display / base_display)
}

/// Overwrites the last-observed reserves for a pool, matching the two legs
/// to (base, quote) by denom. Unmatched legs leave the slot null.
pub async fn upsert_pool_state(
    pool: &PgPool,
    pool_id: i64,
    base_denom: &str,
    quote_denom: &str,
    legs: &[AssetAmount],
) -> Result<()> {
    let reserve_of = |denom: &str| {
        legs.iter()
            .find(|l| l.denom == denom)
            .and_then(|l| BigDecimal::from_str(&l.amount_base).ok())
    };
    let base_reserve = reserve_of(base_denom);
    let quote_reserve = reserve_of(quote_denom);

    sqlx::query(
        r#"
        INSERT INTO pool_state (pool_id, base_reserve, quote_reserve, updated_at)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (pool_id) DO UPDATE SET
            base_reserve = EXCLUDED.base_reserve,
            quote_reserve = EXCLUDED.quote_reserve,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(pool_id)
    .bind(base_reserve)
    .bind(quote_reserve)
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest price per `(token_id, pool_id)`, plus an append to the tick
/// series.
pub async fn upsert_price(
    pool: &PgPool,
    token_id: i64,
    pool_id: i64,
    price_in_zig: f64,
    is_pair_native: bool,
    observed_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO prices (token_id, pool_id, price_in_zig, is_pair_native, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (token_id, pool_id) DO UPDATE SET
            price_in_zig = EXCLUDED.price_in_zig,
            is_pair_native = EXCLUDED.is_pair_native,
            updated_at = EXCLUDED.updated_at
        WHERE prices.updated_at <= EXCLUDED.updated_at
        "#,
    )
    .bind(token_id)
    .bind(pool_id)
    .bind(price_in_zig)
    .bind(is_pair_native)
    .bind(observed_at)
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO price_ticks (token_id, pool_id, price_in_zig, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(token_id)
    .bind(pool_id)
    .bind(price_in_zig)
    .bind(observed_at)
    .execute(pool)
    .await?;
    Ok(())
}
