use super::{decode, encode};
use crate::{
    db::ChainDb,
    errors::StoreResult,
    index::{append_root, intersect, numeric_key, read_roots, remove_root, root_key},
    key::DbKey,
    registry::Bucket,
    txn::{ReadTxn, WriteTxn},
    types::{AttestationRecord, Epoch, Root},
};
use std::sync::Arc;

/// Constraints of an attestation query, intersected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttestationFilter {
    pub head_block_root: Option<Root>,
    pub source_root: Option<Root>,
    pub source_epoch: Option<Epoch>,
    pub target_root: Option<Root>,
    pub target_epoch: Option<Epoch>,
}

/// The index keys one attestation is reachable through
fn index_keys(attestation: &AttestationRecord) -> [DbKey; 5] {
    [
        root_key(Bucket::AttestationHeadBlockRootIndices, &attestation.head_block_root),
        root_key(Bucket::AttestationSourceRootIndices, &attestation.source.root),
        numeric_key(Bucket::AttestationSourceEpochIndices, attestation.source.epoch),
        root_key(Bucket::AttestationTargetRootIndices, &attestation.target.root),
        numeric_key(Bucket::AttestationTargetEpochIndices, attestation.target.epoch),
    ]
}

impl AttestationFilter {
    fn index_keys(&self) -> Vec<DbKey> {
        [
            self.head_block_root.map(|root| root_key(Bucket::AttestationHeadBlockRootIndices, &root)),
            self.source_root.map(|root| root_key(Bucket::AttestationSourceRootIndices, &root)),
            self.source_epoch.map(|epoch| numeric_key(Bucket::AttestationSourceEpochIndices, epoch)),
            self.target_root.map(|root| root_key(Bucket::AttestationTargetRootIndices, &root)),
            self.target_epoch.map(|epoch| numeric_key(Bucket::AttestationTargetEpochIndices, epoch)),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[derive(Clone)]
pub struct DbAttestationStore {
    db: Arc<ChainDb>,
}

impl DbAttestationStore {
    pub fn new(db: Arc<ChainDb>) -> Self {
        Self { db }
    }

    fn save_in_txn(txn: &mut WriteTxn<'_>, attestation: &AttestationRecord) -> StoreResult<()> {
        txn.put(root_key(Bucket::Attestations, &attestation.root), encode(attestation)?);
        for key in index_keys(attestation) {
            append_root(txn, key, &attestation.root)?;
        }
        Ok(())
    }

    fn read(txn: &ReadTxn<'_>, root: &Root) -> StoreResult<Arc<AttestationRecord>> {
        Ok(Arc::new(decode(&txn.read(&root_key(Bucket::Attestations, root))?)?))
    }

    pub fn save_attestation(&self, attestation: &AttestationRecord) -> StoreResult<()> {
        self.db.run_write_txn(|txn| Self::save_in_txn(txn, attestation))
    }

    pub fn save_attestations(&self, attestations: &[AttestationRecord]) -> StoreResult<()> {
        self.db.run_write_txn(|txn| attestations.iter().try_for_each(|attestation| Self::save_in_txn(txn, attestation)))
    }

    pub fn attestation(&self, root: Root) -> StoreResult<Arc<AttestationRecord>> {
        self.db.run_read_txn(|txn| Self::read(txn, &root))
    }

    pub fn has_attestation(&self, root: Root) -> StoreResult<bool> {
        self.db.run_read_txn(|txn| txn.has(&root_key(Bucket::Attestations, &root)))
    }

    /// Deletes the attestation and drops it from every index it was reachable through
    pub fn delete_attestation(&self, root: Root) -> StoreResult<()> {
        self.db.run_write_txn(|txn| {
            let key = root_key(Bucket::Attestations, &root);
            let Some(bytes) = txn.get(&key)? else {
                return Ok(());
            };
            let attestation: AttestationRecord = decode(&bytes)?;
            txn.delete(key);
            for key in index_keys(&attestation) {
                remove_root(txn, key, &root)?;
            }
            Ok(())
        })
    }

    pub fn attestations(&self, filter: &AttestationFilter) -> StoreResult<Vec<Arc<AttestationRecord>>> {
        self.db.run_read_txn(|txn| {
            let candidates = filter.index_keys().iter().map(|key| read_roots(txn, key)).collect::<StoreResult<Vec<_>>>()?;
            match intersect(candidates) {
                Some(roots) => roots.iter().map(|root| Self::read(txn, root)).collect(),
                None => txn
                    .prefix_iter(&DbKey::prefix_only(Bucket::Attestations))
                    .map(|item| -> StoreResult<Arc<AttestationRecord>> { Ok(Arc::new(decode(&item?.1)?)) })
                    .collect(),
            }
        })
    }
}
