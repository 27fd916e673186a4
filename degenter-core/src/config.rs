use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    pub endpoint: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LcdConfig {
    pub endpoint: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WsConfig {
    #[serde(default = "default_ws_bind")]
    pub bind_addr: String,
}

fn default_ws_bind() -> String {
    "0.0.0.0:8081".to_string()
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_ws_bind(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    pub db: DbConfig,
    pub rpc: RpcConfig,
    pub lcd: LcdConfig,
    #[serde(default)]
    pub ws: WsConfig,
}

impl IndexerConfig {
    /// Loads the base config from `config/default.(toml|yaml|json)` relative
    /// to the working directory, then overrides with `DEGENTER__...`
    /// environment variables.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("DEGENTER").separator("__"))
            .build()?;

        settings.try_deserialize().map_err(Into::into)
    }
}

/// Flat tuning knobs read straight from the process environment, with the
/// documented defaults. These are deliberately not nested under the
/// `DEGENTER__` prefix so operators can flip them without touching files.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub block_proc_concurrency: usize,
    pub block_proc_max_tasks: usize,
    pub trades_batch_max: usize,
    pub trades_batch_wait_ms: u64,
    pub meta_refresh_sec: u64,
    pub meta_backfill: bool,
    pub meta_backfill_batch: i64,
    pub meta_backfill_sleep_ms: u64,
    pub meta_concurrency: usize,
    pub factory_addr: Option<String>,
    pub router_addr: Option<String>,
}

impl Tuning {
    pub fn from_env() -> Self {
        Self {
            block_proc_concurrency: env_parse("BLOCK_PROC_CONCURRENCY", 12),
            block_proc_max_tasks: env_parse("BLOCK_PROC_MAX_TASKS", 5_000),
            trades_batch_max: env_parse("TRADES_BATCH_MAX", 800),
            trades_batch_wait_ms: env_parse("TRADES_BATCH_WAIT_MS", 120),
            meta_refresh_sec: env_parse("META_REFRESH_SEC", 60),
            meta_backfill: env_parse::<u8>("META_BACKFILL", 0) != 0,
            meta_backfill_batch: env_parse("META_BACKFILL_BATCH", 250),
            meta_backfill_sleep_ms: env_parse("META_BACKFILL_SLEEP_MS", 250),
            meta_concurrency: env_parse("META_CONCURRENCY", 4),
            factory_addr: env_opt("FACTORY_ADDR"),
            router_addr: env_opt("ROUTER_ADDR"),
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            block_proc_concurrency: 12,
            block_proc_max_tasks: 5_000,
            trades_batch_max: 800,
            trades_batch_wait_ms: 120,
            meta_refresh_sec: 60,
            meta_backfill: false,
            meta_backfill_batch: 250,
            meta_backfill_sleep_ms: 250,
            meta_concurrency: 4,
            factory_addr: None,
            router_addr: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_defaults_match_documented_values() {
        let t = Tuning::default();
        assert_eq!(t.block_proc_concurrency, 12);
        assert_eq!(t.block_proc_max_tasks, 5_000);
        assert_eq!(t.trades_batch_max, 800);
        assert_eq!(t.trades_batch_wait_ms, 120);
        assert_eq!(t.meta_refresh_sec, 60);
        assert!(!t.meta_backfill);
        assert_eq!(t.meta_concurrency, 4);
        assert!(t.router_addr.is_none());
    }
}
