//! Defines a [`MemSizeEstimator`] trait and a companion [`MemMode`] used to estimate the
//! in-memory cost of cached objects, including the heap data they own.

use std::{mem::size_of, sync::Arc};

/// The unit in which the cost of a tracked object is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemMode {
    Bytes,
    Units,
}

/// Estimates the memory owned by an object. Objects of statically known size (or containers of
/// such objects) implement the `_units` estimation and return their logical item count. Objects
/// whose size varies at runtime implement the `_bytes` estimation.
///
/// The unimplemented counterpart panics so that tests catch a cache configured with a mode the
/// cached type does not support.
pub trait MemSizeEstimator {
    /// Estimates the size of this object in the requested mode
    fn estimate_size(&self, mem_mode: MemMode) -> usize {
        match mem_mode {
            MemMode::Bytes => self.estimate_mem_bytes(),
            MemMode::Units => self.estimate_mem_units(),
        }
    }

    /// Estimates the (deep) size of this object in bytes
    fn estimate_mem_bytes(&self) -> usize {
        unimplemented!()
    }

    /// Estimates the number of logical units this object holds
    fn estimate_mem_units(&self) -> usize {
        unimplemented!()
    }
}

impl MemSizeEstimator for u64 {
    fn estimate_mem_bytes(&self) -> usize {
        size_of::<Self>()
    }

    fn estimate_mem_units(&self) -> usize {
        1
    }
}

impl<T> MemSizeEstimator for Vec<T> {
    fn estimate_mem_bytes(&self) -> usize {
        self.len() * size_of::<T>() + size_of::<Self>()
    }

    fn estimate_mem_units(&self) -> usize {
        self.len()
    }
}

impl<T: MemSizeEstimator> MemSizeEstimator for Arc<T> {
    fn estimate_mem_bytes(&self) -> usize {
        self.as_ref().estimate_mem_bytes() + size_of::<Self>()
    }

    fn estimate_mem_units(&self) -> usize {
        self.as_ref().estimate_mem_units()
    }
}
