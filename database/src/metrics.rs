//! Exposes the engine's operational counters to a `prometheus` registry.

use crate::db::ChainDb;
use log::{debug, warn};
use parking_lot::Mutex;
use prometheus::{
    IntGauge, Opts, Registry,
    core::{Collector, Desc},
    proto::MetricFamily,
};
use std::sync::{Arc, Weak};

const NAMESPACE: &str = "beacondb";

/// RocksDB integer properties exported as gauges, with their metric names
const ENGINE_PROPERTIES: [(&str, &str, &str); 3] = [
    ("rocksdb.estimate-num-keys", "estimated_keys", "Estimated number of keys in the database"),
    ("rocksdb.total-sst-files-size", "sst_files_bytes", "Total size of all SST files"),
    ("rocksdb.cur-size-all-mem-tables", "mem_tables_bytes", "Approximate size of active and unflushed memtables"),
];

/// A collector reading the engine lazily at scrape time. It holds the engine weakly so a
/// registered collector never keeps a closed database alive.
#[derive(Clone)]
pub struct DbCollector {
    db: Weak<ChainDb>,
    read_txns: IntGauge,
    write_txns: IntGauge,
    commits: IntGauge,
    rollbacks: IntGauge,
    properties: Vec<(&'static str, IntGauge)>,
}

impl DbCollector {
    pub fn new(db: &Arc<ChainDb>) -> Result<Self, prometheus::Error> {
        // The path label keeps collectors of distinct stores apart within one registry
        let db_path = db.path().display().to_string();
        let gauge = |name: &str, help: &str| {
            IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE).const_label("db_path", db_path.as_str()))
        };
        let mut properties = Vec::with_capacity(ENGINE_PROPERTIES.len());
        for (property, name, help) in ENGINE_PROPERTIES {
            properties.push((property, gauge(name, help)?));
        }
        Ok(Self {
            db: Arc::downgrade(db),
            read_txns: gauge("read_txns_total", "Number of read transactions started")?,
            write_txns: gauge("write_txns_total", "Number of write transactions started")?,
            commits: gauge("commits_total", "Number of committed write transactions")?,
            rollbacks: gauge("rollbacks_total", "Number of rolled back write transactions")?,
            properties,
        })
    }

    fn gauges(&self) -> impl Iterator<Item = &IntGauge> {
        [&self.read_txns, &self.write_txns, &self.commits, &self.rollbacks].into_iter().chain(self.properties.iter().map(|(_, g)| g))
    }

    fn refresh(&self, db: &ChainDb) {
        let stats = db.stats();
        self.read_txns.set(stats.read_txns as i64);
        self.write_txns.set(stats.write_txns as i64);
        self.commits.set(stats.commits as i64);
        self.rollbacks.set(stats.rollbacks as i64);
        for (property, gauge) in &self.properties {
            match db.property_int_value(property) {
                Ok(Some(value)) => gauge.set(value as i64),
                Ok(None) => {}
                Err(err) => debug!("cannot read {property}: {err}"),
            }
        }
    }
}

impl Collector for DbCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.gauges().flat_map(|g| g.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self.db.upgrade() {
            Some(db) => {
                self.refresh(&db);
                self.gauges().flat_map(|g| g.collect()).collect()
            }
            None => Vec::new(),
        }
    }
}

/// The registration of one [`DbCollector`] within a registry
pub struct MetricsBridge {
    registry: Registry,
    // `None` once unregistered
    collector: Mutex<Option<DbCollector>>,
}

impl MetricsBridge {
    /// Registers a collector for `db`. Failure is not fatal: it is logged and the returned
    /// bridge is simply inactive.
    pub fn register(registry: &Registry, db: &Arc<ChainDb>) -> Self {
        let collector = match DbCollector::new(db) {
            Ok(collector) => match registry.register(Box::new(collector.clone())) {
                Ok(()) => Some(collector),
                Err(err) => {
                    warn!("cannot register database metrics for {}: {err}", db.path().display());
                    None
                }
            },
            Err(err) => {
                warn!("cannot create database metrics for {}: {err}", db.path().display());
                None
            }
        };
        Self { registry: registry.clone(), collector: Mutex::new(collector) }
    }

    pub fn is_registered(&self) -> bool {
        self.collector.lock().is_some()
    }

    /// Removes the collector from the registry. Calling it again is a no-op.
    pub fn unregister(&self) {
        if let Some(collector) = self.collector.lock().take() {
            if let Err(err) = self.registry.unregister(Box::new(collector)) {
                debug!("database metrics were already unregistered: {err}");
            }
        }
    }
}

impl Drop for MetricsBridge {
    fn drop(&mut self) {
        self.unregister();
    }
}
