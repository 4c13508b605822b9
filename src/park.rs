//! Address-keyed thread parking.
//!
//! The lock words in this crate block by parking the calling thread on the
//! word's own address: [`park`] suspends the caller while the word still
//! holds an expected value, and [`unpark_one`] wakes at least one thread
//! parked on that address. Every wait may return spuriously; callers loop
//! on their real predicate.
//!
//! On Linux this maps directly onto `futex` wait/wake. Elsewhere it is
//! simulated with a small hashed table of mutex/condvar pairs, which
//! preserves the contract (a wake may rouse any waiter on the address, and
//! then some). Under `cfg(loom)` parking degenerates to a scheduler yield,
//! which the contract also permits, so the lock protocols can be model
//! checked without a kernel.

use crate::loom::sync::atomic::AtomicU32;

pub(crate) use self::imp::{park, unpark_one};

#[cfg(loom)]
mod imp {
    use super::AtomicU32;

    pub(crate) fn park(_word: &AtomicU32, _expected: u32) {
        // Model parking as an immediate spurious wake. The caller's retry
        // loop becomes a yield loop, which loom interleaves exhaustively.
        loom::thread::yield_now();
    }

    pub(crate) fn unpark_one(_word: &AtomicU32) {}
}

#[cfg(all(not(loom), target_os = "linux"))]
mod imp {
    use super::AtomicU32;
    use core::ptr::{null, null_mut};
    use core::sync::atomic::Ordering::Relaxed;
    use rustix::thread::{futex, FutexFlags, FutexOperation};

    pub(crate) fn park(word: &AtomicU32, expected: u32) {
        // No need to enter the kernel if the value already changed.
        if word.load(Relaxed) != expected {
            return;
        }

        // Every outcome returns to the caller: a wake, `EAGAIN` because the
        // word no longer holds `expected`, or `EINTR` from a signal. All of
        // them look like a (possibly spurious) wake, and the caller
        // re-checks its predicate before parking again.
        unsafe {
            let _ = futex(
                word.as_ptr(),
                FutexOperation::Wait,
                FutexFlags::PRIVATE,
                expected,
                null(),
                null_mut(),
                0,
            );
        }
    }

    pub(crate) fn unpark_one(word: &AtomicU32) {
        unsafe {
            futex(
                word.as_ptr(),
                FutexOperation::Wake,
                FutexFlags::PRIVATE,
                1,
                null(),
                null_mut(),
                0,
            )
            .ok();
        }
    }
}

#[cfg(all(not(loom), not(target_os = "linux")))]
mod imp {
    use super::AtomicU32;
    use core::sync::atomic::Ordering::Relaxed;
    use std::sync::{Condvar, Mutex};

    /// Number of wait-table buckets. Collisions only cost extra spurious
    /// wakes, so this does not need to scale with the number of locks.
    const BUCKETS: usize = 64;

    struct Bucket {
        lock: Mutex<()>,
        cond: Condvar,
    }

    static TABLE: [Bucket; BUCKETS] = [const {
        Bucket {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }; BUCKETS];

    fn bucket(word: &AtomicU32) -> &'static Bucket {
        // Lock words are 4-aligned; the low bits carry no information.
        let addr = word.as_ptr() as usize >> 2;
        &TABLE[addr % BUCKETS]
    }

    pub(crate) fn park(word: &AtomicU32, expected: u32) {
        let bucket = bucket(word);
        let guard = bucket.lock.lock().unwrap_or_else(|e| e.into_inner());
        // Re-check under the bucket lock: a waker that changed the word
        // must either see our wait or lose the race before we sleep.
        if word.load(Relaxed) == expected {
            drop(bucket.cond.wait(guard).unwrap_or_else(|e| e.into_inner()));
        }
    }

    pub(crate) fn unpark_one(word: &AtomicU32) {
        let bucket = bucket(word);
        drop(bucket.lock.lock().unwrap_or_else(|e| e.into_inner()));
        // A bucket may hold waiters for several addresses; wake them all
        // and let each re-check. Surplus wakes are spurious by contract.
        bucket.cond.notify_all();
    }
}
