use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_REFERENCE_FRESHNESS_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Failed attempts after which a queue item is no longer retried.
    pub max_attempts: u32,
    /// Rows per remote request for batch upserts.
    pub batch_size: usize,
    /// Rows per remote request when migrating legacy catches.
    pub migration_batch_size: usize,
    /// Age after which species, field config and overrides are re-pulled on foreground.
    pub reference_freshness_ms: u64,
    pub data_dir: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            batch_size: DEFAULT_BATCH_SIZE,
            migration_batch_size: DEFAULT_BATCH_SIZE,
            reference_freshness_ms: DEFAULT_REFERENCE_FRESHNESS_MS,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup` on the defaults. Unparseable values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(value) = lookup("RINGSYNC_MAX_ATTEMPTS").as_deref().and_then(parse_u64) {
            cfg.max_attempts = value.clamp(1, u32::MAX as u64) as u32;
        }
        if let Some(value) = lookup("RINGSYNC_BATCH_SIZE").as_deref().and_then(parse_u64) {
            cfg.batch_size = value.max(1) as usize;
        }
        if let Some(value) = lookup("RINGSYNC_MIGRATION_BATCH_SIZE")
            .as_deref()
            .and_then(parse_u64)
        {
            cfg.migration_batch_size = value.max(1) as usize;
        }
        if let Some(value) = lookup("RINGSYNC_REFERENCE_FRESHNESS_MS")
            .as_deref()
            .and_then(parse_u64)
        {
            cfg.reference_freshness_ms = value;
        }
        if let Some(dir) = lookup("RINGSYNC_DATA_DIR") {
            let dir = dir.trim();
            if !dir.is_empty() {
                cfg.data_dir = PathBuf::from(dir);
            }
        }

        cfg
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("ringsync.sqlite")
    }

    /// Markers live apart from the cache database so clearing the cache never re-runs migration.
    pub fn markers_path(&self) -> PathBuf {
        self.data_dir.join("migration_markers.sqlite")
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
