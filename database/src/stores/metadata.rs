use crate::{
    cache::Cache,
    db::ChainDb,
    errors::{StoreError, StoreResult},
    key::DbKey,
    registry::Bucket,
    types::ValidatorPubkey,
};
use std::sync::Arc;

/// Validator indices by public key
pub type IndexCache = Cache<ValidatorPubkey, u64>;

const POWCHAIN_DATA_KEY: &[u8] = b"powchain-data";
const VALIDATOR_INDEX_PREFIX: &[u8] = b"validator-index";
const STATE_SERVICE_FLAG_KEY: &[u8] = b"compatible";

fn validator_index_key(pubkey: &ValidatorPubkey) -> DbKey {
    let mut key = DbKey::prefix_only(Bucket::ChainMetadata);
    key.add_bucket(VALIDATOR_INDEX_PREFIX);
    key.add_key(pubkey);
    key
}

#[derive(Clone)]
pub struct DbMetadataStore {
    db: Arc<ChainDb>,
    index_cache: IndexCache,
}

impl DbMetadataStore {
    pub fn new(db: Arc<ChainDb>, index_cache: IndexCache) -> Self {
        Self { db, index_cache }
    }

    pub fn index_cache(&self) -> &IndexCache {
        &self.index_cache
    }

    pub fn save_powchain_data(&self, data: &[u8]) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(DbKey::new(Bucket::PowchainData, POWCHAIN_DATA_KEY), data);
            Ok(())
        })
    }

    pub fn powchain_data(&self) -> StoreResult<Arc<Vec<u8>>> {
        Ok(Arc::new(self.db.run_read_txn(|txn| txn.read(&DbKey::new(Bucket::PowchainData, POWCHAIN_DATA_KEY)))?))
    }

    /// Records whether the database layout is compatible with the new state management service
    pub fn save_state_service_compatible(&self, compatible: bool) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(DbKey::new(Bucket::NewStateServiceCompatible, STATE_SERVICE_FLAG_KEY), [compatible as u8]);
            Ok(())
        })
    }

    /// Unset means incompatible
    pub fn is_state_service_compatible(&self) -> StoreResult<bool> {
        let key = DbKey::new(Bucket::NewStateServiceCompatible, STATE_SERVICE_FLAG_KEY);
        Ok(self.db.run_read_txn(|txn| txn.get(&key))?.is_some_and(|flag| flag.first() == Some(&1)))
    }

    pub fn save_validator_index(&self, pubkey: ValidatorPubkey, index: u64) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.put(validator_index_key(&pubkey), index.to_be_bytes());
            let cache = self.index_cache.clone();
            txn.on_commit(move || {
                cache.insert(pubkey, index);
            });
            Ok(())
        })
    }

    pub fn validator_index(&self, pubkey: ValidatorPubkey) -> StoreResult<u64> {
        if let Some(index) = self.index_cache.get(&pubkey) {
            return Ok(index);
        }
        let generation = self.index_cache.generation();
        let key = validator_index_key(&pubkey);
        let bytes = self.db.run_read_txn(|txn| txn.read(&key))?;
        let index = <[u8; 8]>::try_from(bytes.as_slice())
            .map(u64::from_be_bytes)
            .map_err(|_| StoreError::DataInconsistency(format!("{key} does not hold a validator index")))?;
        self.index_cache.insert_if_unchanged(pubkey, index, generation);
        Ok(index)
    }

    pub fn has_validator_index(&self, pubkey: ValidatorPubkey) -> StoreResult<bool> {
        if self.index_cache.contains_key(&pubkey) {
            return Ok(true);
        }
        self.db.run_read_txn(|txn| txn.has(&validator_index_key(&pubkey)))
    }

    pub fn delete_validator_index(&self, pubkey: ValidatorPubkey) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            txn.delete(validator_index_key(&pubkey));
            let cache = self.index_cache.clone();
            txn.on_commit(move || {
                cache.remove(&pubkey);
            });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::StoreResultExt,
        stores::test_utils::{bytes_policy, temp_db},
        types::PUBKEY_SIZE,
    };

    fn pubkey(i: u8) -> ValidatorPubkey {
        ValidatorPubkey::from_bytes([i; PUBKEY_SIZE])
    }

    #[test]
    fn test_validator_index_survives_eviction() {
        let (_lifetime, db) = temp_db();
        // Room for two indices
        let store = DbMetadataStore::new(db, IndexCache::new(bytes_policy(16)).unwrap());
        for i in 0..10u8 {
            store.save_validator_index(pubkey(i), i as u64 * 1000).unwrap();
        }
        assert!(store.index_cache().len() <= 2);
        for i in 0..10u8 {
            assert_eq!(store.validator_index(pubkey(i)).unwrap(), i as u64 * 1000);
        }

        store.delete_validator_index(pubkey(3)).unwrap();
        assert!(!store.has_validator_index(pubkey(3)).unwrap());
        assert!(store.validator_index(pubkey(3)).optional().unwrap().is_none());
    }

    #[test]
    fn test_state_service_flag() {
        let (_lifetime, db) = temp_db();
        let store = DbMetadataStore::new(db, IndexCache::new(bytes_policy(16)).unwrap());
        assert!(!store.is_state_service_compatible().unwrap());
        store.save_state_service_compatible(true).unwrap();
        assert!(store.is_state_service_compatible().unwrap());
        store.save_state_service_compatible(false).unwrap();
        assert!(!store.is_state_service_compatible().unwrap());
    }

    #[test]
    fn test_powchain_data() {
        let (_lifetime, db) = temp_db();
        let store = DbMetadataStore::new(db, IndexCache::new(bytes_policy(16)).unwrap());
        assert!(store.powchain_data().optional().unwrap().is_none());
        store.save_powchain_data(b"eth1").unwrap();
        assert_eq!(store.powchain_data().unwrap().as_slice(), b"eth1");
    }
}
