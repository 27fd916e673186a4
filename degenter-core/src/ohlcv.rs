//! Minute-bar OHLCV upserts and the 30m/1h/4h/24h matrix rollups.

use anyhow::Result;
use chrono::{DateTime, DurationRound, Duration as ChronoDuration, Utc};
use sqlx::PgPool;

/// The rollup windows, as `(bucket, postgres interval)` pairs.
pub const MATRIX_BUCKETS: [(&str, &str); 4] = [
    ("30m", "30 minutes"),
    ("1h", "1 hour"),
    ("4h", "4 hours"),
    ("24h", "24 hours"),
];

/// UTC minute floor of a timestamp; the bucket key for 1m bars.
pub fn minute_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(ChronoDuration::minutes(1))
        .expect("minute truncation cannot overflow")
}

/// Idempotent bar update. First insert seeds all four price fields; on
/// conflict open stays, high/low widen, close follows, and the volume and
/// trade counters accumulate.
pub async fn upsert_ohlcv_1m(
    pool: &PgPool,
    pool_id: i64,
    bucket_start: DateTime<Utc>,
    price: f64,
    vol_zig: f64,
    trade_inc: i32,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ohlcv_1m (pool_id, bucket_start, open, high, low, close, volume_zig, trade_count)
        VALUES ($1, $2, $3, $3, $3, $3, $4, $5)
        ON CONFLICT (pool_id, bucket_start) DO UPDATE SET
            high = GREATEST(ohlcv_1m.high, EXCLUDED.high),
            low = LEAST(ohlcv_1m.low, EXCLUDED.low),
            close = EXCLUDED.close,
            volume_zig = ohlcv_1m.volume_zig + EXCLUDED.volume_zig,
            trade_count = ohlcv_1m.trade_count + EXCLUDED.trade_count
        "#,
    )
    .bind(pool_id)
    .bind(bucket_start)
    .bind(price)
    .bind(vol_zig)
    .bind(trade_inc)
    .execute(pool)
    .await?;
    Ok(())
}

/// Recomputes all four windowed rollup rows for a pool from the trades
/// table.
pub async fn refresh_pool_matrix(pool: &PgPool, pool_id: i64) -> Result<()> {
    for (bucket, window) in MATRIX_BUCKETS {
        sqlx::query(
            r#"
            INSERT INTO pool_matrix (pool_id, bucket, volume_zig, trade_count, unique_signers, updated_at)
            SELECT $1, $2,
                   COALESCE(SUM(value_zig), 0),
                   COUNT(*),
                   COUNT(DISTINCT signer),
                   now()
            FROM trades
            WHERE pool_id = $1 AND created_at > now() - $3::interval
            ON CONFLICT (pool_id, bucket) DO UPDATE SET
                volume_zig = EXCLUDED.volume_zig,
                trade_count = EXCLUDED.trade_count,
                unique_signers = EXCLUDED.unique_signers,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(pool_id)
        .bind(bucket)
        .bind(window)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Same rollup keyed by base token, aggregated across all of its pools.
pub async fn refresh_token_matrix(pool: &PgPool, token_id: i64) -> Result<()> {
    for (bucket, window) in MATRIX_BUCKETS {
        sqlx::query(
            r#"
            INSERT INTO token_matrix (token_id, bucket, volume_zig, trade_count, unique_signers, updated_at)
            SELECT $1, $2,
                   COALESCE(SUM(t.value_zig), 0),
                   COUNT(t.trade_id),
                   COUNT(DISTINCT t.signer),
                   now()
            FROM trades t
            JOIN pools p ON p.pool_id = t.pool_id
            WHERE p.base_token_id = $1 AND t.created_at > now() - $3::interval
            ON CONFLICT (token_id, bucket) DO UPDATE SET
                volume_zig = EXCLUDED.volume_zig,
                trade_count = EXCLUDED.trade_count,
                unique_signers = EXCLUDED.unique_signers,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(token_id)
        .bind(bucket)
        .bind(window)
        .execute(pool)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn minute_floor_truncates_seconds() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 45).unwrap()
            + ChronoDuration::milliseconds(250);
        let floored = minute_floor(ts);
        assert_eq!(floored, Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn minute_floor_is_idempotent() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(minute_floor(ts), ts);
        assert_eq!(minute_floor(minute_floor(ts)), ts);
    }

    #[test]
    fn matrix_buckets_cover_all_windows() {
        let names: Vec<&str> = MATRIX_BUCKETS.iter().map(|(b, _)| *b).collect();
        assert_eq!(names, vec!["30m", "1h", "4h", "24h"]);
    }
}
