/// Lock ordering enforcement for the service registry.
///
/// Debug builds track every registry lock acquisition per thread and panic
/// on an out-of-order acquisition. Release builds compile this to nothing.
///
/// # Lock Ordering Hierarchy
///
/// 1. `partitions` (RwLock) - identity -> bucket map
/// 2. `bucket` (Mutex) - one identity's configuration -> services map
/// 3. `suppliers` (RwLock) - live configuration suppliers
///
/// No registry lock is ever held across an `.await`, so thread-local
/// tracking sees every acquisition and its matching release.
///
/// # Usage
///
/// ```ignore
/// let _order = lock_order::hold(LockId::Partitions);
/// let partitions = self.partitions.read();
/// ```
#[cfg(debug_assertions)]
use std::cell::RefCell;

/// Tracked registry locks. Discriminant order is acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockId {
    Partitions = 1,
    Bucket = 2,
    Suppliers = 3,
}

impl LockId {
    pub fn name(&self) -> &'static str {
        match self {
            LockId::Partitions => "partitions",
            LockId::Bucket => "bucket",
            LockId::Suppliers => "suppliers",
        }
    }
}

#[cfg(debug_assertions)]
thread_local! {
    static LOCK_STACK: RefCell<Vec<LockId>> = const { RefCell::new(Vec::new()) };
}

/// Record acquisition of `lock`.
///
/// # Panics
///
/// Panics (debug builds only) if a lock ordered after `lock` is already held,
/// or if `lock` itself is already held by this thread.
#[cfg(debug_assertions)]
pub fn track_lock_acquisition(lock: LockId) {
    LOCK_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();

        for held_lock in stack.iter() {
            if *held_lock >= lock {
                panic!(
                    "Lock ordering violation: attempted to acquire '{}' (priority {}) \
                     while holding '{}' (priority {}). \
                     Locks must be acquired in order: Partitions < Bucket < Suppliers",
                    lock.name(),
                    lock as u8,
                    held_lock.name(),
                    *held_lock as u8
                );
            }
        }

        stack.push(lock);
    });
}

/// Record release of `lock`. Releases must be LIFO.
#[cfg(debug_assertions)]
pub fn track_lock_release(lock: LockId) {
    LOCK_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();

        match stack.pop() {
            Some(top_lock) if top_lock == lock => {}
            Some(top_lock) => {
                panic!(
                    "Lock release order violation: attempted to release '{}' \
                     but most recently acquired lock was '{}'.",
                    lock.name(),
                    top_lock.name()
                );
            }
            None => {
                panic!(
                    "Lock release without acquisition: attempted to release '{}' \
                     but no locks are currently held.",
                    lock.name()
                );
            }
        }
    });
}

#[cfg(not(debug_assertions))]
#[inline(always)]
pub fn track_lock_acquisition(_lock: LockId) {}

#[cfg(not(debug_assertions))]
#[inline(always)]
pub fn track_lock_release(_lock: LockId) {}

/// Scope token: tracks acquisition now and release on drop.
///
/// Declare it immediately before the guard it covers so it drops right after.
#[must_use = "the lock is tracked only while the token is alive"]
pub struct Held(LockId);

pub fn hold(lock: LockId) -> Held {
    track_lock_acquisition(lock);
    Held(lock)
}

impl Drop for Held {
    fn drop(&mut self) {
        track_lock_release(self.0);
    }
}
