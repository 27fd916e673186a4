use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use degenter_core::{
    config::{IndexerConfig, Tuning},
    db::{create_pool, get_last_height, run_migrations},
    fasttrack::FastTrack,
    lcd::LcdClient,
    notify::NotifyBus,
    processor::BlockProcessor,
    rpc::RpcClient,
    tokens::run_meta_refresher,
    trades::TradeSink,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = IndexerConfig::from_env()?;
    let tuning = Tuning::from_env();
    tracing::info!(rpc = %config.rpc.endpoint, "starting degenter indexer");

    let db = create_pool(&config.db.url, config.db.max_connections).await?;
    run_migrations(&db).await?;

    let rpc = RpcClient::new(&config.rpc.endpoint);
    let lcd = LcdClient::new(&config.lcd.endpoint);
    let bus = Arc::new(NotifyBus::new());
    let sink = TradeSink::new(
        db.clone(),
        tuning.trades_batch_max,
        tuning.trades_batch_wait_ms,
    );

    FastTrack::new(db.clone(), lcd.clone()).start(&bus);

    let processor = Arc::new(BlockProcessor::new(
        db.clone(),
        rpc.clone(),
        lcd.clone(),
        Arc::clone(&bus),
        sink,
        tuning.clone(),
    ));

    let meta_handle = tokio::spawn(run_meta_refresher(db.clone(), lcd, tuning));
    let tail_handle = tokio::spawn(tail_blocks(processor, rpc, db));

    // Both tasks run indefinitely; either one ending is fatal.
    tokio::select! {
        result = meta_handle => {
            tracing::error!("metadata refresher ended: {result:?}");
        }
        result = tail_handle => {
            tracing::error!("block tail loop ended: {result:?}");
        }
    }

    Ok(())
}

/// Follows the chain tip, processing every height past the watermark in
/// order. A failed height is retried with exponential backoff and the
/// watermark never moves past it, so restarts replay it safely.
async fn tail_blocks(processor: Arc<BlockProcessor>, rpc: RpcClient, db: sqlx::PgPool) {
    const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
    const MAX_BACKOFF: Duration = Duration::from_secs(30);
    const POLL_INTERVAL: Duration = Duration::from_secs(1);

    let mut next_height = match get_last_height(&db).await {
        Ok(h) => h.map(|h| h + 1),
        Err(err) => {
            tracing::error!("cannot read index state: {err:#}");
            None
        }
    };

    loop {
        let latest = match rpc.latest_height().await {
            Ok(h) => h,
            Err(err) => {
                tracing::warn!("status poll failed: {err:#}");
                tokio::time::sleep(INITIAL_BACKOFF).await;
                continue;
            }
        };

        // Cold start with no watermark begins at the tip.
        let start = next_height.unwrap_or(latest);
        for height in start..=latest {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match processor.process_height(height).await {
                    Ok(()) => break,
                    Err(err) => {
                        tracing::error!(height, "height failed, retrying in {backoff:?}: {err:#}");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
            next_height = Some(height + 1);
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
