use crate::registry::Bucket;
use smallvec::SmallVec;
use std::fmt::{Debug, Display};

/// Inline capacity covering a bucket prefix, a sub-bucket tag and a 48 byte public key
const INLINE_KEY_SIZE: usize = 56;

/// A full store key: the bucket prefix followed by the bucket-local key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DbKey {
    path: SmallVec<[u8; INLINE_KEY_SIZE]>,
    prefix_len: usize,
}

impl DbKey {
    pub fn new<TKey>(bucket: Bucket, key: TKey) -> Self
    where
        TKey: AsRef<[u8]>,
    {
        let mut path = SmallVec::new();
        path.push(bucket.into());
        path.extend_from_slice(key.as_ref());
        Self { path, prefix_len: 1 }
    }

    pub fn prefix_only(bucket: Bucket) -> Self {
        Self::new(bucket, [])
    }

    /// Appends a sub-bucket tag. The tag becomes part of the prefix.
    pub fn add_bucket<TBucket>(&mut self, bucket: TBucket)
    where
        TBucket: AsRef<[u8]>,
    {
        debug_assert_eq!(self.path.len(), self.prefix_len, "sub-buckets must be added before the key");
        self.path.extend_from_slice(bucket.as_ref());
        self.prefix_len += bucket.as_ref().len();
    }

    /// Appends key bytes. The prefix length is unchanged.
    pub fn add_key<TKey>(&mut self, key: TKey)
    where
        TKey: AsRef<[u8]>,
    {
        self.path.extend_from_slice(key.as_ref());
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    pub fn prefix(&self) -> &[u8] {
        &self.path[..self.prefix_len]
    }

    /// The bucket-local part of the key
    pub fn key(&self) -> &[u8] {
        &self.path[self.prefix_len..]
    }
}

impl AsRef<[u8]> for DbKey {
    fn as_ref(&self) -> &[u8] {
        &self.path
    }
}

impl Display for DbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use num_traits::FromPrimitive;
        match self.path.first().copied().and_then(Bucket::from_u8) {
            Some(bucket) => f.write_str(bucket.name())?,
            None => f.write_str("?")?,
        }
        f.write_str("/")?;
        if self.prefix_len > 1 {
            f.write_str(&faster_hex::hex_string(&self.path[1..self.prefix_len]))?;
            f.write_str("/")?;
        }
        f.write_str(&faster_hex::hex_string(self.key()))
    }
}

impl Debug for DbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self, f)
    }
}
