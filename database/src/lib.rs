pub mod bitmap;
mod cache;
pub mod config;
mod db;
mod errors;
mod index;
mod key;
mod lockfile;
pub mod metrics;
pub mod registry;
pub mod schema;
pub mod store;
pub mod stores;
pub mod summary_cache;
mod txn;
pub mod types;

pub mod utils;

pub mod prelude {
    use crate::{db, errors};

    pub use super::bitmap::{PresenceIndex, SlotBitmap, SlotKind};
    pub use super::cache::{Cache, CachePolicy};
    pub use super::config::StoreConfig;
    pub use super::key::DbKey;
    pub use super::metrics::{DbCollector, MetricsBridge};
    pub use super::registry::Bucket;
    pub use super::store::{ChainStore, DATABASE_FILE_NAME};
    pub use super::stores::{
        archive::DbArchiveStore,
        attestations::{AttestationFilter, DbAttestationStore},
        blocks::{BlockFilter, BlockStore, BlockStoreReader, DbBlockStore, HotObjectCache},
        checkpoints::DbCheckpointStore,
        metadata::{DbMetadataStore, IndexCache},
        operations::{DbOperationStore, OperationKind},
        states::{DbStateStore, StateStore, StateStoreReader},
    };
    pub use super::summary_cache::StateSummaryCache;
    pub use super::txn::{ReadTxn, TxnStatsSnapshot, WriteTxn};
    pub use db::{ChainDb, ConnBuilder, DB, DEFAULT_LOCK_TIMEOUT, delete_db};
    pub use errors::{StoreError, StoreErrorPredicates, StoreResult, StoreResultExt};
}
