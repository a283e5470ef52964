//! Per-runtime walk serialization.
//!
//! At most one enumeration may be in flight per runtime instance. Locks are
//! keyed by [`HostRuntime::runtime_id`](crate::HostRuntime::runtime_id). An
//! entry is dropped as soon as no thread holds or waits on it, so ids of
//! runtimes that have gone away do not accumulate.

use std::cell::RefCell;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

static WALK_LOCKS: Lazy<Mutex<FxHashMap<usize, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

thread_local! {
    // Runtime ids whose walk lock this thread holds.
    static HELD: RefCell<FxHashSet<usize>> = RefCell::new(FxHashSet::default());
}

/// A second enumeration was started on a thread that is already walking the
/// same runtime (typically from inside a visitor).
#[derive(Debug, Error)]
#[error("runtime {runtime_id} is already being walked on this thread")]
pub struct ReentrantWalk {
    /// The runtime being walked
    pub runtime_id: usize,
}

/// Holds a runtime's walk lock until dropped.
pub(crate) struct WalkGuard {
    runtime_id: usize,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for WalkGuard {
    fn drop(&mut self) {
        HELD.with(|held| {
            held.borrow_mut().remove(&self.runtime_id);
        });

        drop(self.guard.take());
        // Waiters clone the entry under the map lock, so a count of one
        // means the map holds the last reference.
        let mut locks = WALK_LOCKS.lock();
        if locks
            .get(&self.runtime_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.runtime_id);
        }
    }
}

/// Block until no other thread is walking `runtime_id`.
pub(crate) fn acquire(runtime_id: usize) -> Result<WalkGuard, ReentrantWalk> {
    if HELD.with(|held| held.borrow().contains(&runtime_id)) {
        return Err(ReentrantWalk { runtime_id });
    }

    let lock = WALK_LOCKS.lock().entry(runtime_id).or_default().clone();
    let guard = lock.lock_arc();
    HELD.with(|held| {
        held.borrow_mut().insert(runtime_id);
    });

    Ok(WalkGuard {
        runtime_id,
        guard: Some(guard),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_reentrant_acquire_fails() {
        let guard = acquire(usize::MAX - 1).unwrap();
        let err = acquire(usize::MAX - 1).err().unwrap();
        assert_eq!(err.runtime_id, usize::MAX - 1);
        drop(guard);
        assert!(acquire(usize::MAX - 1).is_ok());
    }

    #[test]
    fn test_distinct_runtimes_do_not_block() {
        let _a = acquire(usize::MAX - 2).unwrap();
        let _b = acquire(usize::MAX - 3).unwrap();
    }

    #[test]
    fn test_released_lock_is_pruned() {
        let runtime_id = usize::MAX - 4;
        for _ in 0..3 {
            let guard = acquire(runtime_id).unwrap();
            assert!(WALK_LOCKS.lock().contains_key(&runtime_id));
            drop(guard);
            assert!(!WALK_LOCKS.lock().contains_key(&runtime_id));
        }
    }

    #[test]
    fn test_other_thread_waits_for_release() {
        let runtime_id = usize::MAX - 5;
        let released = AtomicBool::new(false);
        let guard = acquire(runtime_id).unwrap();

        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let _guard = acquire(runtime_id).unwrap();
                released.load(Ordering::SeqCst)
            });
            thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::SeqCst);
            drop(guard);
            assert!(waiter.join().unwrap(), "second walker ran while the lock was held");
        });

        assert!(!WALK_LOCKS.lock().contains_key(&runtime_id));
    }
}
