//! Fast-track enrichment driven off `pair_created` notifications.
//!
//! Each step is individually error-isolated: a failed holder refresh must
//! not stop the seed pricing that makes a new pool queryable.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;

use crate::lcd::LcdClient;
use crate::models::{PairCreated, TokenType};
use crate::notify::{NotifyBus, TOPIC_PAIR_CREATED};
use crate::ohlcv::{minute_floor, refresh_pool_matrix, refresh_token_matrix, upsert_ohlcv_1m};
use crate::pools::pool_with_tokens;
use crate::prices::{price_from_reserves, upsert_price, PriceBasis};
use crate::tokens::{refresh_holders, set_token_meta_from_lcd};

const META_WAIT_ATTEMPTS: u32 = 5;
const META_WAIT_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct FastTrack {
    db: PgPool,
    lcd: LcdClient,
}

impl FastTrack {
    pub fn new(db: PgPool, lcd: LcdClient) -> Self {
        Self { db, lcd }
    }

    /// Subscribes to `pair_created` and reacts to every payload on a
    /// dedicated worker.
    pub fn start(self, bus: &NotifyBus) {
        bus.listen(TOPIC_PAIR_CREATED, move |payload| {
            let ft = self.clone();
            async move {
                let pair: PairCreated = match serde_json::from_value(payload.data) {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::warn!("malformed pair_created payload: {err}");
                        return;
                    }
                };
                ft.handle(pair).await;
            }
        });
    }

    async fn handle(&self, pair: PairCreated) {
        tracing::info!(
            pool_id = pair.pool_id,
            pair_contract = %pair.pair_contract,
            "fast-track start"
        );

        tokio::join!(
            set_token_meta_from_lcd(&self.db, &self.lcd, &pair.base_denom),
            set_token_meta_from_lcd(&self.db, &self.lcd, &pair.quote_denom),
        );

        let quote_leg = async {
            if !pair.is_uzig_quote {
                self.holders_with_retry(&pair.quote_denom).await;
            }
        };
        tokio::join!(self.holders_with_retry(&pair.base_denom), quote_leg);

        if let Err(err) = self
            .security_scan(pair.base_token_id, &pair.base_denom)
            .await
        {
            tracing::warn!(denom = %pair.base_denom, "security scan failed: {err:#}");
        }
        if !pair.is_uzig_quote {
            if let Err(err) = self
                .security_scan(pair.quote_token_id, &pair.quote_denom)
                .await
            {
                tracing::warn!(denom = %pair.quote_denom, "security scan failed: {err:#}");
            }
        }

        if let Err(err) = refresh_pool_matrix(&self.db, pair.pool_id).await {
            tracing::warn!(pool_id = pair.pool_id, "pool matrix rollup failed: {err:#}");
        }
        if let Err(err) = refresh_token_matrix(&self.db, pair.base_token_id).await {
            tracing::warn!(
                token_id = pair.base_token_id,
                "token matrix rollup failed: {err:#}"
            );
        }

        if pair.is_uzig_quote {
            if let Err(err) = self.seed_price(&pair).await {
                tracing::warn!(
                    pool_id = pair.pool_id,
                    "seed pricing failed, pool stays unpriced until first swap: {err:#}"
                );
            }
        }
    }

    /// Holder counts occasionally report zero right after creation while the
    /// bank index catches up; one retry covers that window.
    async fn holders_with_retry(&self, denom: &str) {
        for attempt in 0..2 {
            match refresh_holders(&self.db, &self.lcd, denom).await {
                Ok(0) if attempt == 0 => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(denom, "holder refresh failed: {err:#}");
                    return;
                }
            }
        }
    }

    async fn security_scan(&self, token_id: i64, denom: &str) -> Result<()> {
        let (admin, can_mint) = match TokenType::classify(denom) {
            // Factory denoms keep their creator as mint authority.
            TokenType::Factory => {
                let creator = denom.split('/').nth(1).map(str::to_string);
                (creator, Some(true))
            }
            TokenType::Cw20 => {
                let minter = self
                    .lcd
                    .smart_query(denom, &json!({ "minter": {} }))
                    .await
                    .ok()
                    .and_then(|v| {
                        v.get("minter")
                            .and_then(|m| m.as_str())
                            .map(str::to_string)
                    });
                let can_mint = minter.is_some();
                (minter, Some(can_mint))
            }
            TokenType::Native | TokenType::Ibc => (None, Some(false)),
        };

        sqlx::query(
            r#"
            INSERT INTO token_security (token_id, admin, can_mint, checked_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (token_id) DO UPDATE SET
                admin = EXCLUDED.admin,
                can_mint = EXCLUDED.can_mint,
                checked_at = EXCLUDED.checked_at
            "#,
        )
        .bind(token_id)
        .bind(admin)
        .bind(can_mint)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Prices the pool from on-chain reserves and writes a zero-volume 1m
    /// bar at the creation minute, so the pool is queryable before its first
    /// swap.
    async fn seed_price(&self, pair: &PairCreated) -> Result<()> {
        // The basis needs the base exponent, which the metadata refresh
        // above fills in; give it a few polls before settling for defaults.
        let mut pool = None;
        for _ in 0..META_WAIT_ATTEMPTS {
            pool = pool_with_tokens(&self.db, &pair.pair_contract).await?;
            match &pool {
                Some(p) if p.base.symbol.is_some() => break,
                _ => tokio::time::sleep(META_WAIT_DELAY).await,
            }
        }
        let Some(pool) = pool else {
            anyhow::bail!("pool {} vanished before seed pricing", pair.pair_contract);
        };

        let legs = self.lcd.pool_reserves(&pair.pair_contract).await?;
        let Some(price) = price_from_reserves(&PriceBasis::of(&pool), &legs) else {
            tracing::info!(
                pool_id = pair.pool_id,
                "pool has no usable reserves yet, skipping seed price"
            );
            return Ok(());
        };

        upsert_price(
            &self.db,
            pair.base_token_id,
            pair.pool_id,
            price,
            true,
            pool.pool.created_at,
        )
        .await?;
        upsert_ohlcv_1m(
            &self.db,
            pair.pool_id,
            minute_floor(pool.pool.created_at),
            price,
            0.0,
            0,
        )
        .await?;

        tracing::info!(pool_id = pair.pool_id, price, "seeded price and 1m bar");
        Ok(())
    }
}
