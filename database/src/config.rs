use crate::{
    cache::CachePolicy,
    db::{ConnBuilder, DEFAULT_LOCK_TIMEOUT},
    errors::{StoreError, StoreResult},
};
use beacon_utils::mem_size::MemMode;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

pub mod defaults {
    /// Byte budget of the block cache, enough for on the order of a thousand recent blocks
    pub const BLOCK_CACHE_MAX_COST: usize = 1 << 21;
    pub const BLOCK_CACHE_MAX_ITEMS: usize = 1000;
    pub const INDEX_CACHE_MAX_COST: usize = 1 << 23;
    pub const INDEX_CACHE_MAX_ITEMS: usize = 1 << 20;
    pub const FILES_LIMIT: i32 = 256;
    pub const MEM_BUDGET: usize = 64 * 1024 * 1024;
}

/// Tunables of a [`ChainStore`](crate::store::ChainStore)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub block_cache_max_cost: usize,
    pub block_cache_max_items: usize,
    pub index_cache_max_cost: usize,
    pub index_cache_max_items: usize,
    /// Bound on waiting for another owner to release the database lock
    pub lock_timeout: Duration,
    pub files_limit: i32,
    pub mem_budget: usize,
    /// Whether every commit is fsync'ed
    pub sync_writes: bool,
    /// Background threads available to the engine
    pub parallelism: usize,
    /// Whether the engine collects its internal statistics
    pub enable_stats: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_cache_max_cost: defaults::BLOCK_CACHE_MAX_COST,
            block_cache_max_items: defaults::BLOCK_CACHE_MAX_ITEMS,
            index_cache_max_cost: defaults::INDEX_CACHE_MAX_COST,
            index_cache_max_items: defaults::INDEX_CACHE_MAX_ITEMS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            files_limit: defaults::FILES_LIMIT,
            mem_budget: defaults::MEM_BUDGET,
            sync_writes: true,
            parallelism: 1,
            enable_stats: true,
        }
    }
}

impl StoreConfig {
    /// A small configuration suitable for tests running many stores side by side
    pub fn for_tests() -> Self {
        Self { files_limit: 10, mem_budget: 4 * 1024 * 1024, sync_writes: false, enable_stats: false, ..Default::default() }
    }

    pub fn validate(&self) -> StoreResult<()> {
        let sizes = [
            ("block_cache_max_cost", self.block_cache_max_cost),
            ("block_cache_max_items", self.block_cache_max_items),
            ("index_cache_max_cost", self.index_cache_max_cost),
            ("index_cache_max_items", self.index_cache_max_items),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, size)| *size == 0) {
            return Err(StoreError::CacheConstruction(format!("{name} must be positive")));
        }
        if self.files_limit <= 0 {
            return Err(StoreError::CacheConstruction(format!("files_limit must be positive, got {}", self.files_limit)));
        }
        Ok(())
    }

    pub fn block_cache_policy(&self) -> CachePolicy {
        CachePolicy::Tracked { max_cost: self.block_cache_max_cost, max_items: self.block_cache_max_items, mem_mode: MemMode::Bytes }
    }

    pub fn index_cache_policy(&self) -> CachePolicy {
        CachePolicy::Tracked { max_cost: self.index_cache_max_cost, max_items: self.index_cache_max_items, mem_mode: MemMode::Bytes }
    }

    pub(crate) fn conn_builder(&self, db_path: PathBuf) -> ConnBuilder<PathBuf, i32> {
        let builder = ConnBuilder::default()
            .with_db_path(db_path)
            .with_files_limit(self.files_limit)
            .with_parallelism(self.parallelism)
            .with_mem_budget(self.mem_budget)
            .with_lock_timeout(self.lock_timeout)
            .with_sync_writes(self.sync_writes);
        if self.enable_stats { builder } else { builder.disable_stats() }
    }
}
