//! Secondary index encoding. Numeric keys are big endian so that key order is numeric order,
//! and an index value is the concatenation of the 32 byte roots it points to.

use crate::{
    errors::{StoreError, StoreResult},
    key::DbKey,
    registry::Bucket,
    txn::{ReadTxn, WriteTxn},
    types::{ROOT_SIZE, Root},
};
use std::collections::HashSet;

pub fn numeric_key(bucket: Bucket, value: u64) -> DbKey {
    DbKey::new(bucket, value.to_be_bytes())
}

pub fn root_key(bucket: Bucket, root: &Root) -> DbKey {
    DbKey::new(bucket, root)
}

pub fn decode_numeric(key: &[u8]) -> StoreResult<u64> {
    <[u8; 8]>::try_from(key)
        .map(u64::from_be_bytes)
        .map_err(|_| StoreError::DataInconsistency(format!("numeric index key has {} bytes", key.len())))
}

pub fn decode_roots(value: &[u8]) -> StoreResult<Vec<Root>> {
    if value.len() % ROOT_SIZE != 0 {
        return Err(StoreError::DataInconsistency(format!("root list of {} bytes is not a multiple of {ROOT_SIZE}", value.len())));
    }
    Ok(value.chunks_exact(ROOT_SIZE).filter_map(Root::from_slice).collect())
}

pub fn read_roots(txn: &ReadTxn<'_>, key: &DbKey) -> StoreResult<Vec<Root>> {
    match txn.get(key)? {
        Some(value) => decode_roots(&value),
        None => Ok(Vec::new()),
    }
}

/// Adds `root` to the list under `key` unless it is already there
pub fn append_root(txn: &mut WriteTxn<'_>, key: DbKey, root: &Root) -> StoreResult<()> {
    let mut value = txn.get(&key)?.unwrap_or_default();
    if decode_roots(&value)?.contains(root) {
        return Ok(());
    }
    value.extend_from_slice(root.as_ref());
    txn.put(key, value);
    Ok(())
}

/// Drops `root` from the list under `key`, deleting the key once the list is empty
pub fn remove_root(txn: &mut WriteTxn<'_>, key: DbKey, root: &Root) -> StoreResult<()> {
    let Some(value) = txn.get(&key)? else {
        return Ok(());
    };
    let roots = decode_roots(&value)?;
    if !roots.contains(root) {
        return Ok(());
    }
    let remaining: Vec<u8> = roots.iter().filter(|r| *r != root).flat_map(|r| *r.as_bytes()).collect();
    if remaining.is_empty() {
        txn.delete(key);
    } else {
        txn.put(key, remaining);
    }
    Ok(())
}

/// Keeps the roots of the first candidate list which appear in every other list. No lists
/// means no constraint, which is reported as `None`.
pub fn intersect(lists: Vec<Vec<Root>>) -> Option<Vec<Root>> {
    let mut lists = lists.into_iter();
    let first = lists.next()?;
    let others: Vec<HashSet<Root>> = lists.map(|list| list.into_iter().collect()).collect();
    Some(first.into_iter().filter(|root| others.iter().all(|set| set.contains(root))).collect())
}
