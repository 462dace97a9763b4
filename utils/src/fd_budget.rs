//! A process-wide budget of file descriptors shared by all database handles.
//!
//! Every engine reserves its `max_open_files` up front. The reservation is returned when
//! the [`FDGuard`] is dropped, so opening and closing stores in a loop never leaks budget.

use std::{
    ops::Deref,
    sync::atomic::{AtomicU64, Ordering},
};
use thiserror::Error;

static ACQUIRED_FD: AtomicU64 = AtomicU64::new(0);

/// A reservation of file descriptors, released on drop
#[derive(Debug)]
pub struct FDGuard(u64);

impl FDGuard {
    pub fn acquired(&self) -> u64 {
        self.0
    }
}

impl Deref for FDGuard {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Drop for FDGuard {
    fn drop(&mut self) {
        ACQUIRED_FD.fetch_sub(self.0, Ordering::SeqCst);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("file descriptor budget exceeded, acquired: {acquired}, requested: {requested}, limit: {limit}")]
pub struct Error {
    pub acquired: u64,
    pub requested: u64,
    pub limit: u64,
}

/// Reserves `value` descriptors from the process budget
pub fn acquire_guard(value: u64) -> Result<FDGuard, Error> {
    let limit = get_limit();
    let mut acquired = ACQUIRED_FD.load(Ordering::SeqCst);
    loop {
        if acquired + value > limit {
            return Err(Error { acquired, requested: value, limit });
        }
        match ACQUIRED_FD.compare_exchange(acquired, acquired + value, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return Ok(FDGuard(value)),
            // Another thread moved the counter, retry against the fresh value
            Err(current) => acquired = current,
        }
    }
}

/// Returns the number of descriptors currently reserved
pub fn acquired() -> u64 {
    ACQUIRED_FD.load(Ordering::SeqCst)
}

pub fn get_limit() -> u64 {
    cfg_if::cfg_if! {
        if #[cfg(test)] {
            100
        }
        else if #[cfg(any(target_os = "macos", target_os = "linux"))] {
            match rlimit::getrlimit(rlimit::Resource::NOFILE) {
                Ok((soft, _)) => soft,
                Err(err) => {
                    log::warn!("could not read the open files limit ({err}), assuming 1024");
                    1024
                }
            }
        }
        else {
            // Platforms without a queryable soft limit fall back to the common default
            1024
        }
    }
}
