pub mod archive;
pub mod attestations;
pub mod blocks;
pub mod checkpoints;
pub mod metadata;
pub mod operations;
pub mod states;

use crate::errors::StoreResult;
use serde::{Serialize, de::DeserializeOwned};

pub(crate) fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    Ok(bincode::deserialize(bytes)?)
}
