//! Batch acquisition of reader-writer locks with rollback.
//!
//! Deadlock avoidance is by lock ordering, not detection: every caller that
//! holds more than one lock at a time must acquire through [`lock_all`] with
//! the locks in one globally agreed order. For field locks that order is the
//! schema's declaration order.

use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::SyncError;

/// LockMode selects how a whole batch of locks is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Acquire every lock shared.
    Read,
    /// Acquire every lock exclusive.
    Write,
}

enum SlotGuard<'a, T> {
    Read(RwLockReadGuard<'a, T>),
    Write(RwLockWriteGuard<'a, T>),
}

/// MultiLockGuard holds a fully acquired batch and releases it in reverse
/// acquisition order when dropped.
#[must_use]
pub struct MultiLockGuard<'a, T> {
    guards: Vec<SlotGuard<'a, T>>,
}

impl<T> MultiLockGuard<'_, T> {
    /// The number of locks held by this guard.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Returns true if the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl<T> Drop for MultiLockGuard<'_, T> {
    fn drop(&mut self) {
        // Vec drops front to back; releasing must run back to front.
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// Acquire every lock in `locks`, in the order given, in one mode.
///
/// Each acquisition waits at most `timeout`. If one times out, everything
/// acquired so far is released in reverse order and the whole batch fails
/// with [`SyncError::LockTimeout`]; partial acquisition is never observable
/// by the caller.
pub fn lock_all<'a, T>(
    mode: LockMode,
    locks: &[&'a RwLock<T>],
    timeout: Duration,
) -> Result<MultiLockGuard<'a, T>, SyncError> {
    let mut held = MultiLockGuard {
        guards: Vec::with_capacity(locks.len()),
    };
    for (index, lock) in locks.iter().enumerate() {
        let guard = match mode {
            LockMode::Read => lock.try_read_for(timeout).map(SlotGuard::Read),
            LockMode::Write => lock.try_write_for(timeout).map(SlotGuard::Write),
        };
        match guard {
            Some(guard) => held.guards.push(guard),
            // Dropping `held` here rolls the acquired prefix back.
            None => {
                return Err(SyncError::LockTimeout {
                    index,
                    total: locks.len(),
                })
            }
        }
    }
    Ok(held)
}
