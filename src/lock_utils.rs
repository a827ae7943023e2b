//! Lock Poisoning Recovery
//!
//! The signature cache, the denial index and the single-flight map are
//! shared by every worker thread. A panic in one worker while it holds one
//! of those locks must not take the signer down for everybody else, so the
//! guards are recovered and the event is logged at ERROR level.
//!
//! All three structures keep their invariants across each individual
//! mutation (an entry is either fully inserted or absent), so continuing
//! with the recovered data is safe.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::error;

/// Acquire a Mutex lock, recovering from poisoning if necessary.
///
/// # Arguments
/// * `mutex` - The Mutex to lock
/// * `context` - What the lock protects (for logging)
pub fn lock_or_recover<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("Mutex poisoned for '{}' - recovering", context);
            poisoned.into_inner()
        }
    }
}

/// Acquire a RwLock read lock, recovering from poisoning if necessary.
pub fn read_lock_or_recover<'a, T>(rwlock: &'a RwLock<T>, context: &str) -> RwLockReadGuard<'a, T> {
    match rwlock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("RwLock (read) poisoned for '{}' - recovering", context);
            poisoned.into_inner()
        }
    }
}

/// Acquire a RwLock write lock, recovering from poisoning if necessary.
pub fn write_lock_or_recover<'a, T>(
    rwlock: &'a RwLock<T>,
    context: &str,
) -> RwLockWriteGuard<'a, T> {
    match rwlock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            error!("RwLock (write) poisoned for '{}' - recovering", context);
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_after_write() {
        let rwlock = RwLock::new(HashMap::new());
        write_lock_or_recover(&rwlock, "registry").insert("web", 1);
        assert_eq!(read_lock_or_recover(&rwlock, "registry").get("web"), Some(&1));
    }

    #[test]
    fn test_mutex_poisoning_recovery() {
        let mutex = Arc::new(Mutex::new(vec![1u32]));
        let mutex_clone = Arc::clone(&mutex);

        // Poison the lock from another thread
        let handle = thread::spawn(move || {
            let _guard = mutex_clone.lock().unwrap();
            panic!("Intentional panic to poison the lock");
        });
        let _ = handle.join();

        let guard = lock_or_recover(&mutex, "in-flight calls");
        assert_eq!(*guard, vec![1]);
    }

    #[test]
    fn test_rwlock_poisoning_recovery() {
        let rwlock = Arc::new(RwLock::new(String::from("alpha")));
        let rwlock_clone = Arc::clone(&rwlock);

        let handle = thread::spawn(move || {
            let _guard = rwlock_clone.write().unwrap();
            panic!("Intentional panic to poison the lock");
        });
        let _ = handle.join();

        assert_eq!(*read_lock_or_recover(&rwlock, "denial index"), "alpha");
        write_lock_or_recover(&rwlock, "denial index").push_str(".gamma");
        assert_eq!(*read_lock_or_recover(&rwlock, "denial index"), "alpha.gamma");
    }
}
