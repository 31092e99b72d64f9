//! Lock helpers that recover from poisoning
//!
//! A panicking event handler must never wedge the coordinator, so every shared
//! lock goes through these helpers instead of `.unwrap()`.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Safe RwLock read helper that recovers from poisoning
#[inline]
pub(crate) fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during read, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Safe RwLock write helper that recovers from poisoning
#[inline]
pub(crate) fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("RwLock poisoned during write, recovering (data is still valid)");
        poisoned.into_inner()
    })
}

/// Safe Mutex helper that recovers from poisoning
#[inline]
pub(crate) fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Mutex poisoned, recovering (data is still valid)");
        poisoned.into_inner()
    })
}
