//! Lock helpers for std mutexes
//!
//! Critical sections in this crate never leave guarded state half-updated,
//! so a poisoned lock is recovered rather than propagated.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
