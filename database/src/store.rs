//! The chain store: owns the engine, the schema, the caches, the presence bitmaps and the
//! metrics registration of one database directory.

use crate::{
    bitmap::PresenceIndex,
    config::StoreConfig,
    db::{ChainDb, create_private_dir, delete_db},
    errors::{StoreError, StoreResult},
    metrics::MetricsBridge,
    registry::Bucket,
    schema::ensure_schema,
    stores::{
        archive::DbArchiveStore,
        attestations::DbAttestationStore,
        blocks::{DbBlockStore, HotObjectCache},
        checkpoints::DbCheckpointStore,
        metadata::{DbMetadataStore, IndexCache},
        operations::DbOperationStore,
        states::DbStateStore,
    },
    summary_cache::StateSummaryCache,
};
use log::{info, warn};
use prometheus::Registry;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Name of the database inside the store directory
pub const DATABASE_FILE_NAME: &str = "beaconchain.db";

// Field order is the shutdown order: metrics go before the engine is released
struct OpenStore {
    metrics: MetricsBridge,
    blocks: DbBlockStore,
    states: DbStateStore,
    attestations: DbAttestationStore,
    operations: DbOperationStore,
    checkpoints: DbCheckpointStore,
    metadata: DbMetadataStore,
    archive: DbArchiveStore,
    presence: PresenceIndex,
    db: Arc<ChainDb>,
}

pub struct ChainStore {
    dir: PathBuf,
    summary_cache: Arc<StateSummaryCache>,
    inner: Option<OpenStore>,
}

impl ChainStore {
    /// Opens the store in `dir` with the default configuration, registering its metrics in the
    /// process wide `prometheus` registry
    pub fn open(dir: impl Into<PathBuf>, summary_cache: Arc<StateSummaryCache>) -> StoreResult<Self> {
        Self::open_with_config(dir, summary_cache, StoreConfig::default())
    }

    pub fn open_with_config(dir: impl Into<PathBuf>, summary_cache: Arc<StateSummaryCache>, config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_registry(dir, summary_cache, config, prometheus::default_registry())
    }

    /// Opens the store in `dir`, creating the directory owner-only if missing. Either every
    /// component is set up or the call fails leaving no lock held and no metrics registered.
    pub fn open_with_registry(
        dir: impl Into<PathBuf>,
        summary_cache: Arc<StateSummaryCache>,
        config: StoreConfig,
        registry: &Registry,
    ) -> StoreResult<Self> {
        let dir = dir.into();
        config.validate()?;
        let block_cache = HotObjectCache::new(config.block_cache_policy())?;
        let index_cache = IndexCache::new(config.index_cache_policy())?;

        if !dir.exists() {
            create_private_dir(&dir).map_err(|source| StoreError::Configuration { path: dir.clone(), source })?;
        }
        let db = config.conn_builder(dir.join(DATABASE_FILE_NAME)).build()?;
        ensure_schema(&db, &Bucket::ALL)?;
        let presence = PresenceIndex::load(&db)?;
        let metrics = MetricsBridge::register(registry, &db);

        let inner = OpenStore {
            metrics,
            blocks: DbBlockStore::new(db.clone(), block_cache, presence.clone()),
            states: DbStateStore::new(db.clone(), presence.clone(), summary_cache.clone()),
            attestations: DbAttestationStore::new(db.clone()),
            operations: DbOperationStore::new(db.clone()),
            checkpoints: DbCheckpointStore::new(db.clone()),
            metadata: DbMetadataStore::new(db.clone(), index_cache),
            archive: DbArchiveStore::new(db.clone()),
            presence,
            db,
        };
        info!("opened chain store at {}", dir.display());
        Ok(Self { dir, summary_cache, inner: Some(inner) })
    }

    fn open_store(&self) -> StoreResult<&OpenStore> {
        self.inner.as_ref().ok_or(StoreError::Closed)
    }

    /// The store directory, whether or not the database currently exists
    pub fn database_path(&self) -> &Path {
        &self.dir
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn db(&self) -> StoreResult<&Arc<ChainDb>> {
        Ok(&self.open_store()?.db)
    }

    pub fn blocks(&self) -> StoreResult<&DbBlockStore> {
        Ok(&self.open_store()?.blocks)
    }

    pub fn states(&self) -> StoreResult<&DbStateStore> {
        Ok(&self.open_store()?.states)
    }

    pub fn attestations(&self) -> StoreResult<&DbAttestationStore> {
        Ok(&self.open_store()?.attestations)
    }

    pub fn operations(&self) -> StoreResult<&DbOperationStore> {
        Ok(&self.open_store()?.operations)
    }

    pub fn checkpoints(&self) -> StoreResult<&DbCheckpointStore> {
        Ok(&self.open_store()?.checkpoints)
    }

    pub fn metadata(&self) -> StoreResult<&DbMetadataStore> {
        Ok(&self.open_store()?.metadata)
    }

    pub fn archive(&self) -> StoreResult<&DbArchiveStore> {
        Ok(&self.open_store()?.archive)
    }

    pub fn presence(&self) -> StoreResult<&PresenceIndex> {
        Ok(&self.open_store()?.presence)
    }

    pub fn summary_cache(&self) -> &Arc<StateSummaryCache> {
        &self.summary_cache
    }

    pub fn metrics_registered(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.metrics.is_registered())
    }

    /// Unregisters the metrics and closes the database. Closing a closed store is a no-op.
    pub fn close(&mut self) -> StoreResult<()> {
        let Some(inner) = self.inner.take() else {
            return Ok(());
        };
        inner.metrics.unregister();
        let flushed = inner.db.flush();
        inner.blocks.cache().close();
        inner.metadata.index_cache().close();
        drop(inner);
        info!("closed chain store at {}", self.dir.display());
        flushed
    }

    /// Closes the store and deletes its database. The store directory itself is kept, and a
    /// missing directory is not an error.
    pub fn clear_db(&mut self) -> StoreResult<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        self.close()?;
        delete_db(&self.dir.join(DATABASE_FILE_NAME))?;
        info!("cleared chain store at {}", self.dir.display());
        Ok(())
    }
}

impl Drop for ChainStore {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("failed closing chain store at {}: {err}", self.dir.display());
        }
    }
}
