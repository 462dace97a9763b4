use crate::db::ChainDb;
use std::{fs, io, sync::Weak, thread, time::Duration};
use tempfile::TempDir;

/// Keeps a temporary database directory alive until every handle to the database is gone
pub struct DbLifetime {
    weak_db_ref: Weak<ChainDb>,
    optional_tempdir: Option<TempDir>,
}

impl DbLifetime {
    pub fn new(tempdir: TempDir, weak_db_ref: Weak<ChainDb>) -> Self {
        Self { optional_tempdir: Some(tempdir), weak_db_ref }
    }
}

impl Drop for DbLifetime {
    fn drop(&mut self) {
        for _ in 0..16 {
            if self.weak_db_ref.strong_count() > 0 {
                // Sometimes another thread is shutting down and still holds a reference
                thread::sleep(Duration::from_millis(50));
            } else {
                break;
            }
        }
        assert_eq!(self.weak_db_ref.strong_count(), 0, "DB is expected to have no strong references when lifetime is dropped");
        // Dropping the tempdir removes the directory
        self.optional_tempdir.take();
    }
}

/// Creates a fresh directory under the system temp dir for a throwaway database
pub fn get_chaindb_tempdir() -> io::Result<TempDir> {
    let global_tempdir = std::env::temp_dir();
    let chaindb_tempdir = global_tempdir.join("beacon-chaindb");
    fs::create_dir_all(chaindb_tempdir.as_path())?;
    tempfile::tempdir_in(chaindb_tempdir.as_path())
}

/// Opens a database in a temporary directory from a `ConnBuilder` with the files limit set.
/// Returns the lifetime guard followed by the database; destructure them in that order so the
/// database is dropped first.
#[macro_export]
macro_rules! create_temp_db {
    ($conn_builder: expr) => {{
        let db_tempdir = $crate::utils::get_chaindb_tempdir().unwrap();
        let db_path = db_tempdir.path().join("chaindb");
        let db = $conn_builder.with_db_path(db_path).build().unwrap();
        ($crate::utils::DbLifetime::new(db_tempdir, std::sync::Arc::downgrade(&db)), db)
    }};
}
