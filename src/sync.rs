//! Concurrency primitives
//!
//! - [`EntryLock`]: per-entry exclusive lock that knows which thread holds it, so a
//!   thread already building an entry can re-enter without deadlocking.
//! - [`OncePerKey`]: lazy-once-per-key initialization for the specialization cache.

use crate::Result;
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Thread tokens
// =============================================================================

/// No thread holds the lock.
const UNOWNED: u64 = 0;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// A process-unique, never-zero id for the calling thread.
#[inline]
pub(crate) fn current_thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

// =============================================================================
// EntryLock
// =============================================================================

/// Exclusive lock guarding first-time instantiation of a shared entry.
pub(crate) struct EntryLock {
    mutex: Mutex<()>,
    holder: AtomicU64,
}

impl EntryLock {
    pub(crate) const fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            holder: AtomicU64::new(UNOWNED),
        }
    }

    /// Whether the calling thread currently holds this lock.
    #[inline]
    pub(crate) fn held_by_current_thread(&self) -> bool {
        self.holder.load(Ordering::Acquire) == current_thread_token()
    }

    /// Block until the lock is free and take it.
    ///
    /// Returns `None` without blocking when the calling thread already holds it.
    pub(crate) fn acquire(&self) -> Option<EntryGuard<'_>> {
        if self.held_by_current_thread() {
            return None;
        }
        let guard = self.mutex.lock();
        self.holder.store(current_thread_token(), Ordering::Release);
        Some(EntryGuard {
            lock: self,
            _guard: guard,
        })
    }
}

pub(crate) struct EntryGuard<'a> {
    lock: &'a EntryLock,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        // Cleared before the mutex guard field is dropped.
        self.lock.holder.store(UNOWNED, Ordering::Release);
    }
}

// =============================================================================
// OncePerKey
// =============================================================================

/// A concurrent map whose values are initialized at most once per key.
///
/// Concurrent first requests for the same key block on one initializer; a failed
/// initializer leaves the key empty so a later request can retry.
pub(crate) struct OncePerKey<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>, RandomState>,
}

impl<K: Eq + Hash + Clone, V: Clone> OncePerKey<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            cells: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// The value for `key` if it was already initialized.
    pub(crate) fn get(&self, key: &K) -> Option<V> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Return the value for `key`, running `init` if no value exists yet.
    pub(crate) fn get_or_try_init<F>(&self, key: &K, init: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        // The shard guard is released before `init` runs; `init` may touch other keys.
        let cell = match self.cells.get(key) {
            Some(cell) => Arc::clone(cell.value()),
            None => Arc::clone(self.cells.entry(key.clone()).or_default().value()),
        };
        cell.get_or_try_init(init).cloned()
    }

    /// All initialized values.
    pub(crate) fn values(&self) -> Vec<V> {
        self.cells
            .iter()
            .filter_map(|cell| cell.value().get().cloned())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.cells.iter().filter(|cell| cell.value().get().is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiError;
    use std::sync::atomic::AtomicU32;
    use std::thread;

    #[test]
    fn test_thread_tokens_differ() {
        let here = current_thread_token();
        let there = thread::spawn(current_thread_token).join().unwrap();
        assert_ne!(here, UNOWNED);
        assert_ne!(here, there);
        assert_eq!(here, current_thread_token());
    }

    #[test]
    fn test_entry_lock_reentrancy() {
        let lock = EntryLock::new();
        assert!(!lock.held_by_current_thread());
        {
            let guard = lock.acquire();
            assert!(guard.is_some());
            assert!(lock.held_by_current_thread());
            // Re-entering on the same thread does not block
            assert!(lock.acquire().is_none());
        }
        assert!(!lock.held_by_current_thread());
        assert!(lock.acquire().is_some());
    }

    #[test]
    fn test_entry_lock_excludes_other_threads() {
        let lock = Arc::new(EntryLock::new());
        let guard = lock.acquire();
        assert!(guard.is_some());

        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || other.held_by_current_thread());
        assert!(!handle.join().unwrap());
        drop(guard);

        let other = Arc::clone(&lock);
        let handle = thread::spawn(move || other.acquire().is_some());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_once_per_key_runs_initializer_once() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        let map: Arc<OncePerKey<u32, Arc<String>>> = Arc::new(OncePerKey::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    map.get_or_try_init(&7, || {
                        CALLS.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(5));
                        Ok(Arc::new("seven".to_string()))
                    })
                    .unwrap()
                })
            })
            .collect();

        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_once_per_key_failure_is_retried() {
        let map: OncePerKey<&'static str, u32> = OncePerKey::new();
        let err = map.get_or_try_init(&"k", || Err(DiError::Internal("nope".into())));
        assert!(err.is_err());
        assert!(map.get(&"k").is_none());
        assert_eq!(map.get_or_try_init(&"k", || Ok(3)).unwrap(), 3);
        assert_eq!(map.values(), vec![3]);
    }
}
