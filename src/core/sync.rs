//! Synchronization utilities for lock poisoning
//!
//! The registry, cache and job index all sit behind std locks that are only
//! ever held for short bookkeeping sections. A poisoned lock means a panic
//! happened inside one of those sections; callers that can report an error
//! convert it with the `handle_*` helpers, callers that only answer a
//! yes/no question recover the guard with the `recover_*` helpers.

use std::sync::{LockResult, MutexGuard, RwLockReadGuard, RwLockWriteGuard};

/// Convert a poisoned mutex lock into an application error
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use plugrack::core::sync::handle_mutex_poison;
/// use plugrack::plugin::api::PluginError;
///
/// let mutex = Mutex::new(42);
/// let guard = handle_mutex_poison(
///     mutex.lock(),
///     |message| PluginError::Sync { message }
/// ).unwrap();
/// assert_eq!(*guard, 42);
/// ```
pub fn handle_mutex_poison<T, E>(
    result: LockResult<T>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<T, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "Internal synchronisation error (mutex poisoned). This indicates a panic occurred while holding a lock. PoisonError: {:?}",
            poison_err
        ))
    })
}

/// Convert a poisoned RwLock read into an application error
pub fn handle_rwlock_read<T, E>(
    result: LockResult<RwLockReadGuard<T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockReadGuard<T>, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "Internal synchronisation error (RwLock read poisoned). This indicates a panic occurred while holding a write lock. PoisonError: {:?}",
            poison_err
        ))
    })
}

/// Convert a poisoned RwLock write into an application error
pub fn handle_rwlock_write<T, E>(
    result: LockResult<RwLockWriteGuard<T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockWriteGuard<T>, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "Internal synchronisation error (RwLock write poisoned). This indicates a panic occurred while holding the lock. PoisonError: {:?}",
            poison_err
        ))
    })
}

/// Take the guard out of a possibly poisoned mutex lock
pub fn recover_mutex<T>(result: LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    result.unwrap_or_else(|poisoned| {
        log::warn!("Recovering poisoned mutex");
        poisoned.into_inner()
    })
}

/// Take the guard out of a possibly poisoned RwLock read
pub fn recover_read<T>(result: LockResult<RwLockReadGuard<'_, T>>) -> RwLockReadGuard<'_, T> {
    result.unwrap_or_else(|poisoned| {
        log::warn!("Recovering poisoned RwLock (read)");
        poisoned.into_inner()
    })
}

/// Take the guard out of a possibly poisoned RwLock write
pub fn recover_write<T>(result: LockResult<RwLockWriteGuard<'_, T>>) -> RwLockWriteGuard<'_, T> {
    result.unwrap_or_else(|poisoned| {
        log::warn!("Recovering poisoned RwLock (write)");
        poisoned.into_inner()
    })
}
