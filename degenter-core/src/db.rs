use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../migrations").run(pool).await?;
    Ok(())
}

/// High-water mark of fully processed heights. Absent until the first
/// successful block.
pub async fn get_last_height(pool: &PgPool) -> Result<Option<i64>> {
    let height = sqlx::query_scalar::<_, i64>("SELECT last_height FROM index_state WHERE id = 1")
        .fetch_optional(pool)
        .await?;
    Ok(height)
}

/// Advances the watermark. Called only after every stage of a height has
/// completed, so a crash replays the height instead of skipping it.
pub async fn set_last_height(pool: &PgPool, height: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO index_state (id, last_height, updated_at)
        VALUES (1, $1, now())
        ON CONFLICT (id) DO UPDATE SET last_height = EXCLUDED.last_height, updated_at = now()
        "#,
    )
    .bind(height)
    .execute(pool)
    .await?;
    Ok(())
}
