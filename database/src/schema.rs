//! Creation and inspection of the bucket namespace set.
//!
//! Buckets are key prefixes, so "creating" one means registering a marker under the
//! [`Bucket::Schema`] prefix. All missing markers of a run are written by a single write
//! transaction: after a crash either every bucket of the set is registered or none of the
//! new ones is.

use crate::{
    db::ChainDb,
    errors::{StoreError, StoreResult},
    key::DbKey,
    registry::{Bucket, SCHEMA_VERSION},
};
use log::debug;
use num_traits::FromPrimitive;

fn marker_key(bucket: Bucket) -> DbKey {
    DbKey::new(Bucket::Schema, [u8::from(bucket)])
}

/// Registers every bucket of `buckets` which is not registered yet. Existing buckets and their
/// contents are left untouched. Returns the buckets created by this call.
pub fn ensure_schema(db: &ChainDb, buckets: &[Bucket]) -> StoreResult<Vec<Bucket>> {
    db.run_write_txn(|txn| {
        let mut created = Vec::new();
        for &bucket in buckets {
            if bucket == Bucket::Schema {
                return Err(StoreError::Schema("the schema registry cannot register itself".to_string()));
            }
            let key = marker_key(bucket);
            match txn.get(&key)? {
                None => {
                    txn.put(key, vec![SCHEMA_VERSION]);
                    created.push(bucket);
                }
                Some(version) if version == [SCHEMA_VERSION] => {}
                Some(version) => {
                    return Err(StoreError::Schema(format!(
                        "bucket {} was created with schema version {:?}, expected {}",
                        bucket.name(),
                        version,
                        SCHEMA_VERSION
                    )));
                }
            }
        }
        if !created.is_empty() {
            debug!("creating {} buckets: {:?}", created.len(), created.iter().map(|b| b.name()).collect::<Vec<_>>());
        }
        Ok(created)
    })
}

/// Lists the registered buckets in prefix order
pub fn existing_buckets(db: &ChainDb) -> StoreResult<Vec<Bucket>> {
    db.run_read_txn(|txn| {
        txn.prefix_iter(&DbKey::prefix_only(Bucket::Schema))
            .map(|item| {
                let (key, _) = item?;
                match key.as_ref() {
                    [byte] => Bucket::from_u8(*byte)
                        .ok_or_else(|| StoreError::Schema(format!("unknown bucket prefix {byte:#04x} in the schema registry"))),
                    other => Err(StoreError::Schema(format!("malformed schema marker {}", faster_hex::hex_string(other)))),
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ConnBuilder;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.db");
        {
            let db = ConnBuilder::default().with_db_path(path.clone()).with_files_limit(10).build().unwrap();
            let created = ensure_schema(&db, &Bucket::ALL).unwrap();
            assert_eq!(created.len(), Bucket::ALL.len());
            assert!(ensure_schema(&db, &Bucket::ALL).unwrap().is_empty());
        }

        let db = ConnBuilder::default().with_db_path(path).with_files_limit(10).build().unwrap();
        assert!(ensure_schema(&db, &Bucket::ALL).unwrap().is_empty());
        let mut expected = Bucket::ALL.to_vec();
        expected.sort();
        assert_eq!(existing_buckets(&db).unwrap(), expected);
    }

    #[test]
    fn test_failed_creation_leaves_no_partial_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = ConnBuilder::default().with_db_path(dir.path().join("schema.db")).with_files_limit(10).build().unwrap();
        let err = ensure_schema(&db, &[Bucket::Blocks, Bucket::States, Bucket::Schema]).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)));
        assert!(existing_buckets(&db).unwrap().is_empty());
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = ConnBuilder::default().with_db_path(dir.path().join("schema.db")).with_files_limit(10).build().unwrap();
        db.run_write_txn(|txn| {
            txn.put(marker_key(Bucket::Blocks), vec![SCHEMA_VERSION + 1]);
            Ok(())
        })
        .unwrap();
        assert!(matches!(ensure_schema(&db, &Bucket::ALL), Err(StoreError::Schema(_))));
        assert_eq!(existing_buckets(&db).unwrap(), vec![Bucket::Blocks]);
    }
}
