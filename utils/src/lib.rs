//!
//! Shared utilities for the beacon chain database crates.
//!

#[cfg(feature = "fd_budget")]
pub mod fd_budget;
#[cfg(feature = "mem_size")]
pub mod mem_size;
