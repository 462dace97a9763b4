use enum_primitive_derive::Primitive;

/// Version written into every bucket marker of the schema registry. Bumped only when the
/// meaning of an existing bucket changes; new buckets are additive and keep the version.
pub const SCHEMA_VERSION: u8 = 1;

/// The closed set of namespaces of the chain database. Each bucket owns the key range
/// starting with its one byte prefix.
#[derive(Primitive, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Bucket {
    // ---- Chain objects ----
    Attestations = 1,
    Blocks = 2,
    States = 3,
    ProposerSlashings = 4,
    AttesterSlashings = 5,
    VoluntaryExits = 6,
    ChainMetadata = 7,
    Checkpoints = 8,

    // ---- Archive ----
    ArchivedValidatorSetChanges = 16,
    ArchivedCommitteeInfo = 17,
    ArchivedBalances = 18,
    ArchivedValidatorParticipation = 19,
    ArchivedIndexRoots = 20,

    // ---- Sync and state management ----
    PowchainData = 32,
    StateSummaries = 33,
    SlotsHasObject = 34,
    NewStateServiceCompatible = 35,

    // ---- Indices ----
    AttestationHeadBlockRootIndices = 64,
    AttestationSourceRootIndices = 65,
    AttestationSourceEpochIndices = 66,
    AttestationTargetRootIndices = 67,
    AttestationTargetEpochIndices = 68,
    BlockSlotIndices = 69,
    BlockParentRootIndices = 70,
    FinalizedBlockRootsIndex = 71,

    // ---- Registry ----
    /// Holds one marker per created bucket. Not part of [`Bucket::ALL`].
    Schema = 0xF0,
}

impl Bucket {
    /// Every namespace created at open time
    pub const ALL: [Bucket; 25] = [
        Bucket::Attestations,
        Bucket::Blocks,
        Bucket::States,
        Bucket::ProposerSlashings,
        Bucket::AttesterSlashings,
        Bucket::VoluntaryExits,
        Bucket::ChainMetadata,
        Bucket::Checkpoints,
        Bucket::ArchivedValidatorSetChanges,
        Bucket::ArchivedCommitteeInfo,
        Bucket::ArchivedBalances,
        Bucket::ArchivedValidatorParticipation,
        Bucket::ArchivedIndexRoots,
        Bucket::PowchainData,
        Bucket::StateSummaries,
        Bucket::SlotsHasObject,
        Bucket::NewStateServiceCompatible,
        Bucket::AttestationHeadBlockRootIndices,
        Bucket::AttestationSourceRootIndices,
        Bucket::AttestationSourceEpochIndices,
        Bucket::AttestationTargetRootIndices,
        Bucket::AttestationTargetEpochIndices,
        Bucket::BlockSlotIndices,
        Bucket::BlockParentRootIndices,
        Bucket::FinalizedBlockRootsIndex,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Bucket::Attestations => "attestations",
            Bucket::Blocks => "blocks",
            Bucket::States => "state",
            Bucket::ProposerSlashings => "proposer-slashings",
            Bucket::AttesterSlashings => "attester-slashings",
            Bucket::VoluntaryExits => "voluntary-exits",
            Bucket::ChainMetadata => "chain-metadata",
            Bucket::Checkpoints => "check-point",
            Bucket::ArchivedValidatorSetChanges => "archived-active-changes",
            Bucket::ArchivedCommitteeInfo => "archived-committee-info",
            Bucket::ArchivedBalances => "archived-balances",
            Bucket::ArchivedValidatorParticipation => "archived-validator-participation",
            Bucket::ArchivedIndexRoots => "archived-index-root",
            Bucket::PowchainData => "powchain",
            Bucket::StateSummaries => "state-summary",
            Bucket::SlotsHasObject => "slots-has-objects",
            Bucket::NewStateServiceCompatible => "new-state-service-compatible",
            Bucket::AttestationHeadBlockRootIndices => "attestation-head-block-root-indices",
            Bucket::AttestationSourceRootIndices => "attestation-source-root-indices",
            Bucket::AttestationSourceEpochIndices => "attestation-source-epoch-indices",
            Bucket::AttestationTargetRootIndices => "attestation-target-root-indices",
            Bucket::AttestationTargetEpochIndices => "attestation-target-epoch-indices",
            Bucket::BlockSlotIndices => "block-slot-indices",
            Bucket::BlockParentRootIndices => "block-parent-root-indices",
            Bucket::FinalizedBlockRootsIndex => "finalized-block-roots-index",
            Bucket::Schema => "schema",
        }
    }
}

impl From<Bucket> for u8 {
    fn from(value: Bucket) -> Self {
        value as u8
    }
}

impl From<Bucket> for Vec<u8> {
    fn from(value: Bucket) -> Self {
        [value as u8].to_vec()
    }
}

impl AsRef<[u8]> for Bucket {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: enum has repr(u8)
        std::slice::from_ref(unsafe { &*(self as *const Self as *const u8) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;
    use std::collections::HashSet;

    #[test]
    fn test_as_ref() {
        let bucket = Bucket::BlockSlotIndices;
        assert_eq!(&[bucket as u8], bucket.as_ref());
        assert_eq!(size_of::<u8>(), size_of::<Bucket>(), "Bucket is expected to have the same memory layout of u8");
    }

    #[test]
    fn test_all_is_exhaustive_and_unique() {
        let prefixes: HashSet<u8> = Bucket::ALL.iter().map(|b| u8::from(*b)).collect();
        let names: HashSet<&str> = Bucket::ALL.iter().map(|b| b.name()).collect();
        assert_eq!(prefixes.len(), Bucket::ALL.len());
        assert_eq!(names.len(), Bucket::ALL.len());
        assert!(!prefixes.contains(&(Bucket::Schema as u8)));

        // Every prefix byte that decodes to a bucket other than the registry must be listed
        for byte in 0..=u8::MAX {
            if let Some(bucket) = Bucket::from_u8(byte) {
                assert!(bucket == Bucket::Schema || Bucket::ALL.contains(&bucket), "{bucket:?} missing from Bucket::ALL");
            }
        }
    }
}
