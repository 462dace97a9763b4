use crate::{
    db::{ChainDb, DB, LOCK_FILE_NAME},
    errors::{StoreError, StoreResult},
    lockfile::Lockfile,
};
use beacon_utils::fd_budget;
use log::info;
use rocksdb::{BlockBasedOptions, DBCompressionType};
use std::{fs, path::PathBuf, sync::Arc, thread::available_parallelism, time::Duration};

const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// Default bound on waiting for the database lock held by another owner
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Unspecified;

/// Builder of a [`ChainDb`]. The path and the files limit must be set before `build` is available.
#[derive(Debug)]
pub struct ConnBuilder<Path, FDLimit> {
    db_path: Path,
    create_if_missing: bool,
    parallelism: usize,
    files_limit: FDLimit,
    mem_budget: usize,
    lock_timeout: Duration,
    sync_writes: bool,
    enable_stats: bool,
}

impl Default for ConnBuilder<Unspecified, Unspecified> {
    fn default() -> Self {
        ConnBuilder {
            db_path: Unspecified,
            create_if_missing: true,
            parallelism: 1,
            files_limit: Unspecified,
            mem_budget: 64 * MB,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            sync_writes: true,
            enable_stats: true,
        }
    }
}

impl<Path, FDLimit> ConnBuilder<Path, FDLimit> {
    pub fn with_db_path(self, db_path: PathBuf) -> ConnBuilder<PathBuf, FDLimit> {
        ConnBuilder {
            db_path,
            create_if_missing: self.create_if_missing,
            parallelism: self.parallelism,
            files_limit: self.files_limit,
            mem_budget: self.mem_budget,
            lock_timeout: self.lock_timeout,
            sync_writes: self.sync_writes,
            enable_stats: self.enable_stats,
        }
    }
    pub fn with_files_limit(self, files_limit: impl Into<i32>) -> ConnBuilder<Path, i32> {
        ConnBuilder {
            db_path: self.db_path,
            create_if_missing: self.create_if_missing,
            parallelism: self.parallelism,
            files_limit: files_limit.into(),
            mem_budget: self.mem_budget,
            lock_timeout: self.lock_timeout,
            sync_writes: self.sync_writes,
            enable_stats: self.enable_stats,
        }
    }
    pub fn with_create_if_missing(self, create_if_missing: bool) -> Self {
        ConnBuilder { create_if_missing, ..self }
    }
    pub fn with_parallelism(self, parallelism: impl Into<usize>) -> Self {
        ConnBuilder { parallelism: parallelism.into(), ..self }
    }
    pub fn with_mem_budget(self, mem_budget: impl Into<usize>) -> Self {
        ConnBuilder { mem_budget: mem_budget.into(), ..self }
    }
    pub fn with_lock_timeout(self, lock_timeout: Duration) -> Self {
        ConnBuilder { lock_timeout, ..self }
    }
    pub fn with_sync_writes(self, sync_writes: bool) -> Self {
        ConnBuilder { sync_writes, ..self }
    }
    pub fn disable_stats(self) -> Self {
        ConnBuilder { enable_stats: false, ..self }
    }
}

impl ConnBuilder<PathBuf, i32> {
    fn options(&self) -> rocksdb::Options {
        let mut opts = rocksdb::Options::default();
        if self.parallelism > 1 {
            opts.increase_parallelism(self.parallelism as i32);
        }
        let background_jobs = available_parallelism().map(|n| n.get() / 2).unwrap_or(1).max(1);
        opts.set_max_background_jobs(background_jobs as i32);
        opts.optimize_level_style_compaction(self.mem_budget);
        opts.set_keep_log_file_num(1);
        opts.set_bytes_per_sync(MB as u64);
        opts.set_compression_per_level(&[
            DBCompressionType::None,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
            DBCompressionType::Lz4,
        ]);
        let mut b_opts = BlockBasedOptions::default();
        b_opts.set_bloom_filter(10.0, false);
        b_opts.set_block_size(16 * KB);
        opts.set_block_based_table_factory(&b_opts);

        if self.enable_stats {
            opts.enable_statistics();
            opts.set_report_bg_io_stats(true);
        }
        opts.set_max_open_files(self.files_limit);
        opts.create_if_missing(self.create_if_missing);
        opts
    }

    /// Opens the engine: creates the data directory, takes the exclusive lock within the
    /// configured timeout, reserves descriptors and finally opens RocksDB.
    pub fn build(self) -> StoreResult<Arc<ChainDb>> {
        if !self.db_path.exists() {
            if !self.create_if_missing {
                return Err(StoreError::Configuration {
                    path: self.db_path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "database does not exist"),
                });
            }
            create_private_dir(&self.db_path)
                .map_err(|source| StoreError::Configuration { path: self.db_path.clone(), source })?;
        }
        let lock = Lockfile::acquire(self.db_path.join(LOCK_FILE_NAME), self.lock_timeout)?;
        let fd_guard = fd_budget::acquire_guard(self.files_limit.max(0) as u64)?;
        let opts = self.options();
        let inner = DB::open(&opts, &self.db_path)?;
        info!("opened database at {}", self.db_path.display());
        Ok(Arc::new(ChainDb::new(inner, self.db_path, self.sync_writes, fd_guard, lock)))
    }
}

/// Creates `path` and its missing parents, readable by the owner only
pub(crate) fn create_private_dir(path: &std::path::Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}
