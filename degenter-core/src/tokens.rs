//! Token registry: insert-on-first-sighting plus LCD-driven enrichment.

use std::time::Duration;

use anyhow::Result;
use bigdecimal::BigDecimal;
use sqlx::PgPool;
use std::str::FromStr;

use crate::config::Tuning;
use crate::lcd::LcdClient;
use crate::models::TokenType;
use crate::sched::{run_with_concurrency, TaskTimer};

/// Idempotent insert-or-return by denom. New rows carry only the denom and
/// its inferred type; metadata arrives later from the LCD.
pub async fn upsert_token_minimal(pool: &PgPool, denom: &str) -> Result<i64> {
    let token_type = TokenType::classify(denom);
    let token_id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO tokens (denom, token_type)
        VALUES ($1, $2)
        ON CONFLICT (denom) DO UPDATE SET denom = EXCLUDED.denom
        RETURNING token_id
        "#,
    )
    .bind(denom)
    .bind(token_type.as_str())
    .fetch_one(pool)
    .await?;
    Ok(token_id)
}

/// Fills name/symbol/display/exponent/supply from the LCD. Concurrent calls
/// converge on the same row without constraint violations because the write
/// is a single keyed UPDATE. Failures are logged, never propagated.
pub async fn set_token_meta_from_lcd(pool: &PgPool, lcd: &LcdClient, denom: &str) {
    if let Err(err) = try_set_token_meta(pool, lcd, denom).await {
        tracing::warn!(denom, "token metadata refresh failed: {err:#}");
    }
}

async fn try_set_token_meta(pool: &PgPool, lcd: &LcdClient, denom: &str) -> Result<()> {
    upsert_token_minimal(pool, denom).await?;

    let meta = lcd.denom_metadata(denom).await.unwrap_or_default();
    let supply = lcd.supply_of(denom).await.ok().flatten();
    let supply = supply.and_then(|s| BigDecimal::from_str(&s).ok());
    let exponent = meta.exponent.map(|e| e.clamp(0, 30));

    sqlx::query(
        r#"
        UPDATE tokens SET
            name = COALESCE($2, name),
            symbol = COALESCE($3, symbol),
            display = COALESCE($4, display),
            exponent = COALESCE($5, exponent),
            total_supply = COALESCE($6, total_supply),
            updated_at = now()
        WHERE denom = $1
        "#,
    )
    .bind(denom)
    .bind(meta.name)
    .bind(meta.symbol)
    .bind(meta.display)
    .bind(exponent)
    .bind(supply)
    .execute(pool)
    .await?;
    Ok(())
}

/// Refreshes the holder count for a denom and returns it.
pub async fn refresh_holders(pool: &PgPool, lcd: &LcdClient, denom: &str) -> Result<i64> {
    let count = lcd.holders_count(denom).await?;
    sqlx::query("UPDATE tokens SET holders_count = $2, updated_at = now() WHERE denom = $1")
        .bind(denom)
        .bind(count)
        .execute(pool)
        .await?;
    Ok(count)
}

/// Periodic metadata refresher: every `META_REFRESH_SEC`, sweep tokens that
/// still lack a symbol. With `META_BACKFILL` set, walks the whole table in
/// batches first.
pub async fn run_meta_refresher(pool: PgPool, lcd: LcdClient, tuning: Tuning) {
    if tuning.meta_backfill {
        if let Err(err) = backfill_all(&pool, &lcd, &tuning).await {
            tracing::error!("metadata backfill aborted: {err:#}");
        }
    }

    loop {
        tokio::time::sleep(Duration::from_secs(tuning.meta_refresh_sec)).await;
        let denoms = match sqlx::query_scalar::<_, String>(
            "SELECT denom FROM tokens WHERE symbol IS NULL ORDER BY token_id LIMIT $1",
        )
        .bind(tuning.meta_backfill_batch)
        .fetch_all(&pool)
        .await
        {
            Ok(denoms) => denoms,
            Err(err) => {
                tracing::error!("metadata sweep query failed: {err:#}");
                continue;
            }
        };
        if denoms.is_empty() {
            continue;
        }

        refresh_batch(&pool, &lcd, denoms, tuning.meta_concurrency).await;
    }
}

async fn backfill_all(pool: &PgPool, lcd: &LcdClient, tuning: &Tuning) -> Result<()> {
    let mut after = 0i64;
    loop {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT token_id, denom FROM tokens WHERE token_id > $1 ORDER BY token_id LIMIT $2",
        )
        .bind(after)
        .bind(tuning.meta_backfill_batch)
        .fetch_all(pool)
        .await?;
        let Some(last) = rows.last() else { break };
        after = last.0;

        let denoms: Vec<String> = rows.into_iter().map(|(_, d)| d).collect();
        let n = denoms.len();
        refresh_batch(pool, lcd, denoms, tuning.meta_concurrency).await;
        tracing::info!(batch = n, last_token_id = after, "metadata backfill batch done");
        tokio::time::sleep(Duration::from_millis(tuning.meta_backfill_sleep_ms)).await;
    }
    Ok(())
}

async fn refresh_batch(pool: &PgPool, lcd: &LcdClient, denoms: Vec<String>, concurrency: usize) {
    let timer = TaskTimer::new();
    run_with_concurrency(denoms, concurrency, &timer, "meta", |denom| async move {
        set_token_meta_from_lcd(pool, lcd, &denom).await;
        Ok(())
    })
    .await;
}
