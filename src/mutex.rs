use crate::{
    loom::{
        hint,
        sync::atomic::{AtomicU32, Ordering::*},
    },
    park,
    util::Backoff,
};
use core::fmt;

/// Set while some thread holds the lock. The remaining bits count waiters.
const HOLDER: u32 = 1 << 31;

/// Mask of the waiter-count bits.
const WAITERS: u32 = !HOLDER;

/// A 4-byte exclusive lock.
///
/// The entire lock is one atomic word: the sign bit records the holder,
/// the low 31 bits count the threads parked (or about to park) waiting for
/// it. The idle, unlocked state is exactly zero, so zero-initialized
/// memory is a valid unlocked `Mutex` and [`new`](Self::new) is a `const
/// fn` that performs no work beyond producing that zero.
///
/// Acquisition and release are separate calls rather than an RAII guard:
/// the lock protects no data of its own, records no owner, and may be
/// released by a different thread than the one that acquired it. Because
/// release cannot be checked against an acquisition, [`unlock`](Self::unlock)
/// is `unsafe`. For a guard-based API over the same word, enable the
/// `lock_api` feature and use `guarded::Mutex`.
///
/// # Fairness
///
/// This is *not* a fair mutex: a thread that arrives while the lock is
/// momentarily free may acquire it ahead of parked waiters.
///
/// # Liveness
///
/// Re-acquiring a `Mutex` on the thread that already holds it deadlocks
/// that thread. Dropping (or reusing the memory of) a `Mutex` for which
/// [`is_locked_or_waiting`](Self::is_locked_or_waiting) returns `true`
/// breaks the contract of every thread still using it.
#[repr(transparent)]
pub struct Mutex {
    word: AtomicU32,
}

// === impl Mutex ===

impl Mutex {
    loom_const_fn! {
        /// Returns a new `Mutex`, in the unlocked state.
        ///
        /// # Examples
        ///
        /// ```
        /// use slimlock::Mutex;
        ///
        /// static LOCK: Mutex = Mutex::new();
        /// ```
        #[must_use]
        pub fn new() -> Self {
            Self { word: AtomicU32::new(0) }
        }
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// Returns `true` if the lock was acquired. This only succeeds from
    /// the fully idle state; if other threads are queued for the lock,
    /// `try_lock` fails even during the instant the holder bit is clear.
    #[inline]
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.word
            .compare_exchange(0, HOLDER, Acquire, Relaxed)
            .is_ok()
    }

    /// Acquires the lock, blocking the current thread until it is able to
    /// do so.
    ///
    /// On contention the thread registers itself in the waiter count and
    /// parks on the lock word; it is woken when a holder releases.
    #[inline]
    pub fn lock(&self) {
        if !self.try_lock() {
            self.lock_contended();
        }
    }

    /// Acquires the lock, spinning for up to `rounds` iterations before
    /// parking.
    ///
    /// Each round is a relaxed read of the lock word plus, when the word
    /// looks free, one [`try_lock`](Self::try_lock) attempt; the spin body
    /// performs no writes and no system calls. `spin_lock(0)` is exactly
    /// [`lock`](Self::lock). Spinning pays off when critical sections are
    /// shorter than the cost of a park/unpark round trip.
    pub fn spin_lock(&self, rounds: usize) {
        for _ in 0..rounds {
            if self.word.load(Relaxed) & HOLDER == 0 && self.try_lock() {
                return;
            }
            hint::spin_loop();
        }
        self.lock();
    }

    /// Acquires the lock, spinning for [`DEFAULT_SPIN_ROUNDS`] before
    /// parking.
    ///
    /// [`DEFAULT_SPIN_ROUNDS`]: crate::DEFAULT_SPIN_ROUNDS
    #[inline]
    pub fn spin_lock_default(&self) {
        self.spin_lock(crate::DEFAULT_SPIN_ROUNDS);
    }

    #[cold]
    fn lock_contended(&self) {
        // Register as a waiter. The increment is also the first step of
        // the handoff: once the holder bit clears, one waiter installs
        // itself and consumes its own unit in a single CAS.
        let prev = test_dbg!(self.word.fetch_add(1, AcqRel));
        assert!(
            prev & WAITERS < WAITERS,
            "mutex waiter count overflow; this exceeds any plausible number \
             of live threads"
        );

        let mut cur = prev + 1;
        let mut boff = Backoff::new();
        loop {
            if cur & HOLDER == 0 {
                // The lock is free and the low bits count queued waiters,
                // ourselves included.
                debug_assert!(cur & WAITERS >= 1);
                match self.word.compare_exchange(
                    cur,
                    (cur - 1) | HOLDER,
                    Acquire,
                    Relaxed,
                ) {
                    Ok(_) => return,
                    Err(actual) => {
                        cur = actual;
                        boff.spin();
                    }
                }
            } else {
                trace!(word = cur, "Mutex::lock: parking");
                park::park(&self.word, cur);
                cur = self.word.load(Relaxed);
            }
        }
    }

    /// Releases the lock.
    ///
    /// If any waiters are queued, one parked thread is woken. No ownership
    /// is recorded, so the releasing thread need not be the acquiring one.
    ///
    /// # Safety
    ///
    /// Must be paired with a successful [`lock`](Self::lock),
    /// [`try_lock`](Self::try_lock), or [`spin_lock`](Self::spin_lock) on
    /// this mutex whose hold has not yet been released.
    pub unsafe fn unlock(&self) {
        let prev = test_dbg!(self.word.fetch_and(!HOLDER, Release));
        debug_assert!(prev & HOLDER != 0, "unlock of an unheld Mutex");
        if prev & WAITERS != 0 {
            park::unpark_one(&self.word);
        }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// The load is relaxed and unsynchronized: the answer may be stale by
    /// the time the caller inspects it. This is intended for
    /// instrumentation and for transactional-elision fast paths, not for
    /// program logic; in particular it says nothing about *which* thread
    /// holds the lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.word.load(Relaxed) & HOLDER != 0
    }

    /// Returns `true` if the lock is held *or* any thread is waiting for
    /// it.
    ///
    /// The same advisory caveats as [`is_locked`](Self::is_locked) apply.
    /// A `Mutex` may only be destroyed when this is `false`.
    #[inline]
    #[must_use]
    pub fn is_locked_or_waiting(&self) -> bool {
        self.word.load(Relaxed) != 0
    }

    /// Current waiter count; test-only observer.
    #[cfg(test)]
    pub(crate) fn waiters(&self) -> u32 {
        self.word.load(Relaxed) & WAITERS
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Unpack both fields from one load; two independent loads could
        // display a state the lock was never in.
        let word = self.word.load(Relaxed);
        f.debug_struct("Mutex")
            .field("locked", &(word & HOLDER != 0))
            .field("waiters", &(word & WAITERS))
            .finish()
    }
}

// === lock_api integration ===

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl lock_api::RawMutex for Mutex {
    // The whole point of this constant is to make a *new* mutex each time.
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Mutex::new();

    // Any thread may release, so guards may be sent across threads.
    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        Mutex::lock(self)
    }

    #[inline]
    fn try_lock(&self) -> bool {
        Mutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        Mutex::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Mutex::is_locked(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loom::{self, cell::UnsafeCell, sync::Arc, thread};

    #[test]
    fn uncontended() {
        loom::model(|| {
            let m = Mutex::new();
            assert!(m.try_lock());
            assert!(m.is_locked());
            unsafe { m.unlock() };
            assert!(!m.is_locked());
            assert!(!m.is_locked_or_waiting());
        });
    }

    #[test]
    fn try_lock_excludes() {
        loom::model(|| {
            let m = Mutex::new();
            assert!(m.try_lock());

            // A second attempt fails while the first hold is live.
            assert!(!m.try_lock());

            unsafe { m.unlock() };
            assert!(m.try_lock());
            unsafe { m.unlock() };
        });
    }

    #[test]
    fn mutual_exclusion() {
        loom::model(|| {
            struct Shared {
                lock: Mutex,
                value: UnsafeCell<usize>,
            }

            let shared = Arc::new(Shared {
                lock: Mutex::new(),
                value: UnsafeCell::new(0),
            });

            let t1 = {
                let shared = shared.clone();
                thread::spawn(move || {
                    shared.lock.lock();
                    shared.value.with_mut(|v| unsafe { *v += 1 });
                    unsafe { shared.lock.unlock() };
                })
            };

            shared.lock.lock();
            shared.value.with_mut(|v| unsafe { *v += 1 });
            unsafe { shared.lock.unlock() };

            t1.join().unwrap();

            shared.lock.lock();
            shared.value.with(|v| assert_eq!(unsafe { *v }, 2));
            unsafe { shared.lock.unlock() };

            // Zero idle: all holds released, the word is back to zero.
            assert!(!shared.lock.is_locked_or_waiting());
            assert_eq!(shared.lock.waiters(), 0);
        });
    }

    #[test]
    fn spin_lock_zero_rounds() {
        loom::model(|| {
            // A zero-round spin is just `lock`.
            let m = Mutex::new();
            m.spin_lock(0);
            assert!(m.is_locked());
            unsafe { m.unlock() };
            assert!(!m.is_locked_or_waiting());
        });
    }

    #[test]
    fn contended_handoff() {
        loom::model(|| {
            let m = Arc::new(Mutex::new());

            let t1 = {
                let m = m.clone();
                thread::spawn(move || {
                    m.lock();
                    unsafe { m.unlock() };
                })
            };

            m.lock();
            unsafe { m.unlock() };

            t1.join().unwrap();
            assert!(!m.is_locked_or_waiting());
        });
    }
}
