use crate::registry::Bucket;
use beacon_utils::mem_size::MemSizeEstimator;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Debug, Display, Formatter},
    mem::size_of,
    sync::Arc,
};

pub type Slot = u64;
pub type Epoch = u64;

pub const SLOTS_PER_EPOCH: u64 = 32;

pub const ROOT_SIZE: usize = 32;
pub const PUBKEY_SIZE: usize = 48;

/// A 32 byte content-derived root identifying a chain object
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Root([u8; ROOT_SIZE]);

impl Root {
    pub const ZERO: Root = Root([0; ROOT_SIZE]);

    pub const fn from_bytes(bytes: [u8; ROOT_SIZE]) -> Self {
        Root(bytes)
    }

    /// Builds a root from a slice, returning `None` if the length is not exactly 32
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; ROOT_SIZE]>::try_from(bytes).ok().map(Root)
    }

    /// Builds a root whose first 8 bytes hold `word` in little endian. Mostly useful for tests.
    pub fn from_u64_word(word: u64) -> Self {
        let mut bytes = [0u8; ROOT_SIZE];
        bytes[..8].copy_from_slice(&word.to_le_bytes());
        Root(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ROOT_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self == &Self::ZERO
    }
}

impl From<[u8; ROOT_SIZE]> for Root {
    fn from(bytes: [u8; ROOT_SIZE]) -> Self {
        Root(bytes)
    }
}

impl From<u64> for Root {
    fn from(word: u64) -> Self {
        Root::from_u64_word(word)
    }
}

impl AsRef<[u8]> for Root {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Root {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&faster_hex::hex_string(&self.0))
    }
}

impl Debug for Root {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl MemSizeEstimator for Root {
    fn estimate_mem_bytes(&self) -> usize {
        size_of::<Self>()
    }

    fn estimate_mem_units(&self) -> usize {
        1
    }
}

/// A BLS public key of a validator
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidatorPubkey([u8; PUBKEY_SIZE]);

impl ValidatorPubkey {
    pub const fn from_bytes(bytes: [u8; PUBKEY_SIZE]) -> Self {
        ValidatorPubkey(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; PUBKEY_SIZE]>::try_from(bytes).ok().map(ValidatorPubkey)
    }
}

impl AsRef<[u8]> for ValidatorPubkey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for ValidatorPubkey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&faster_hex::hex_string(&self.0))
    }
}

/// An (epoch, root) reference point in chain history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Root,
}

impl Checkpoint {
    pub fn new(epoch: Epoch, root: Root) -> Self {
        Self { epoch, root }
    }
}

/// The minimal locator of a stored state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateSummary {
    pub slot: Slot,
    pub root: Root,
}

/// A block payload together with the keys it is indexed by
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub root: Root,
    pub slot: Slot,
    pub parent_root: Root,
    pub payload: Arc<Vec<u8>>,
}

impl BlockRecord {
    pub fn new(root: Root, slot: Slot, parent_root: Root, payload: impl Into<Vec<u8>>) -> Self {
        Self { root, slot, parent_root, payload: Arc::new(payload.into()) }
    }
}

impl MemSizeEstimator for BlockRecord {
    fn estimate_mem_bytes(&self) -> usize {
        self.payload.len() + size_of::<Self>()
    }

    fn estimate_mem_units(&self) -> usize {
        1
    }
}

/// A state payload together with the slot it belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub root: Root,
    pub slot: Slot,
    pub payload: Arc<Vec<u8>>,
}

impl StateRecord {
    pub fn new(root: Root, slot: Slot, payload: impl Into<Vec<u8>>) -> Self {
        Self { root, slot, payload: Arc::new(payload.into()) }
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary { slot: self.slot, root: self.root }
    }
}

/// An attestation payload together with the vote it carries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationRecord {
    pub root: Root,
    pub head_block_root: Root,
    pub source: Checkpoint,
    pub target: Checkpoint,
    pub payload: Arc<Vec<u8>>,
}

impl AttestationRecord {
    pub fn new(root: Root, head_block_root: Root, source: Checkpoint, target: Checkpoint, payload: impl Into<Vec<u8>>) -> Self {
        Self { root, head_block_root, source, target, payload: Arc::new(payload.into()) }
    }
}

/// The kinds of periodically archived summaries, each kept in its own bucket keyed by epoch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    ValidatorSetChanges,
    CommitteeInfo,
    Balances,
    ValidatorParticipation,
    IndexRoots,
}

impl ArchiveKind {
    pub const ALL: [ArchiveKind; 5] = [
        ArchiveKind::ValidatorSetChanges,
        ArchiveKind::CommitteeInfo,
        ArchiveKind::Balances,
        ArchiveKind::ValidatorParticipation,
        ArchiveKind::IndexRoots,
    ];

    pub fn bucket(self) -> Bucket {
        match self {
            ArchiveKind::ValidatorSetChanges => Bucket::ArchivedValidatorSetChanges,
            ArchiveKind::CommitteeInfo => Bucket::ArchivedCommitteeInfo,
            ArchiveKind::Balances => Bucket::ArchivedBalances,
            ArchiveKind::ValidatorParticipation => Bucket::ArchivedValidatorParticipation,
            ArchiveKind::IndexRoots => Bucket::ArchivedIndexRoots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_from_slice() {
        assert_eq!(Root::from_slice(&[7u8; 32]), Some(Root::from_bytes([7u8; 32])));
        assert_eq!(Root::from_slice(&[7u8; 31]), None);
        assert!(Root::default().is_zero());
        assert!(!Root::from(1).is_zero());
    }

    #[test]
    fn test_root_display() {
        let root = Root::from_u64_word(0xff);
        assert!(root.to_string().starts_with("ff00"));
        assert_eq!(root.to_string().len(), 64);
    }

    #[test]
    fn test_block_record_estimates() {
        use beacon_utils::mem_size::MemMode;
        let block = Arc::new(BlockRecord::new(Root::from(1), 3, Root::ZERO, vec![0u8; 256]));
        assert_eq!(block.estimate_size(MemMode::Units), 1);
        assert!(block.estimate_size(MemMode::Bytes) > 256);
    }
}
