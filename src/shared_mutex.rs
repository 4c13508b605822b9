use crate::{
    loom::{
        hint,
        sync::atomic::{AtomicU32, Ordering::*},
    },
    mutex::Mutex,
    park,
    util::Backoff,
};
use core::fmt;

/// Set while a writer is installed or waiting for readers to drain.
/// The remaining bits count shared holders plus the update holder.
const X: u32 = 1 << 31;

/// Mask of the holder-count bits.
const HOLDERS: u32 = !X;

/// An 8-byte reader-writer lock with an upgradable *update* mode.
///
/// The lock is a pair of 32-bit words. The first is an internal [`Mutex`]
/// (the *outer* gate) that serializes writers and update holders; the
/// second (the *inner* word) carries the shared-holder count in its low
/// bits and an exclusive-pending flag in its sign bit. Shared acquisition
/// touches only the inner word: a burst of readers with no writer in
/// sight is one atomic add per acquire and never takes the outer gate.
///
/// Three modes are provided:
///
/// - **exclusive** ([`lock`](Self::lock)): conflicts with everything;
/// - **shared** ([`lock_shared`](Self::lock_shared)): coexists with other
///   shared holders and with the update holder;
/// - **update** ([`lock_update`](Self::lock_update)): coexists with shared
///   holders, excludes writers and other update holders, and can be
///   [upgraded](Self::update_lock_upgrade) in place to exclusive (waiting
///   for readers to drain) and [downgraded](Self::update_lock_downgrade)
///   back.
///
/// Like [`Mutex`], the idle state of both words is zero, so
/// zero-initialized memory is a valid unlocked `SharedMutex`; no owner is
/// recorded, holds may be released from any thread, and the release
/// operations are `unsafe` because they cannot be checked against an
/// acquisition. For RAII guards over the same words, enable the
/// `lock_api` feature and use `guarded::RwLock`.
///
/// # Writer preference
///
/// Once a writer has installed its intent (the sign bit of the inner
/// word), new shared acquisitions fail their increment and queue behind
/// the outer gate, so a steady stream of readers cannot starve a writer.
/// No strict FIFO order is promised in any direction.
#[repr(C)]
pub struct SharedMutex {
    outer: Mutex,
    inner: AtomicU32,
}

// === impl SharedMutex ===

impl SharedMutex {
    loom_const_fn! {
        /// Returns a new `SharedMutex`, in the unlocked state.
        ///
        /// # Examples
        ///
        /// ```
        /// use slimlock::SharedMutex;
        ///
        /// static LOCK: SharedMutex = SharedMutex::new();
        /// ```
        #[must_use]
        pub fn new() -> Self {
            Self {
                outer: Mutex::new(),
                inner: AtomicU32::new(0),
            }
        }
    }

    // --- exclusive ---

    /// Attempts to acquire the lock exclusively without blocking.
    ///
    /// Succeeds only when both the outer gate and the inner word are free
    /// at the test point. In particular this does not wait for current
    /// readers to drain, and it leaves no writer-pending state behind when
    /// it fails.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        if !self.outer.try_lock() {
            return false;
        }
        if self.inner.compare_exchange(0, X, Acquire, Relaxed).is_ok() {
            true
        } else {
            // Holders are still inside. This operation must not block, and
            // it must not leave the exclusive-pending flag set on a failed
            // attempt, so undo the outer acquisition and report failure.
            unsafe { self.outer.unlock() };
            false
        }
    }

    /// Acquires the lock exclusively, blocking until no other holder of
    /// any mode remains.
    ///
    /// The caller first acquires the outer gate (parking behind other
    /// writers and update holders), then installs the exclusive-pending
    /// flag and parks on the inner word until current shared holders have
    /// drained. Shared holders that arrive after the flag is installed are
    /// refused and queue behind the outer gate.
    pub fn lock(&self) {
        self.outer.lock();
        self.lock_inner();
    }

    /// Acquires the lock exclusively, spinning for up to `rounds`
    /// iterations at each wait point before parking.
    pub fn spin_lock(&self, rounds: usize) {
        self.outer.spin_lock(rounds);
        let prev = test_dbg!(self.inner.fetch_or(X, Acquire));
        debug_assert_eq!(prev & X, 0, "only the outer holder may install X");
        if prev == 0 {
            return;
        }
        let mut cur = prev | X;
        for _ in 0..rounds {
            if cur == X {
                return;
            }
            hint::spin_loop();
            cur = self.inner.load(Acquire);
        }
        self.lock_inner_wait(cur);
    }

    /// Exclusive acquisition with [`DEFAULT_SPIN_ROUNDS`] of spinning.
    ///
    /// [`DEFAULT_SPIN_ROUNDS`]: crate::DEFAULT_SPIN_ROUNDS
    #[inline]
    pub fn spin_lock_default(&self) {
        self.spin_lock(crate::DEFAULT_SPIN_ROUNDS);
    }

    /// Installs the exclusive-pending flag and waits out the drain.
    /// Requires the outer gate to be held by the caller.
    fn lock_inner(&self) {
        let prev = test_dbg!(self.inner.fetch_or(X, Acquire));
        debug_assert_eq!(prev & X, 0, "only the outer holder may install X");
        if prev != 0 {
            self.lock_inner_wait(prev | X);
        }
    }

    #[cold]
    fn lock_inner_wait(&self, mut cur: u32) {
        while cur != X {
            trace!(inner = cur, "SharedMutex: waiting for holders to drain");
            park::park(&self.inner, cur);
            cur = self.inner.load(Acquire);
        }
    }

    /// Releases an exclusive hold.
    ///
    /// # Safety
    ///
    /// Must be paired with a successful exclusive acquisition ([`lock`],
    /// [`try_lock`], [`spin_lock`], or [`update_lock_upgrade`]) whose hold
    /// has not yet been released or downgraded.
    ///
    /// [`lock`]: Self::lock
    /// [`try_lock`]: Self::try_lock
    /// [`spin_lock`]: Self::spin_lock
    /// [`update_lock_upgrade`]: Self::update_lock_upgrade
    pub unsafe fn unlock(&self) {
        debug_assert_eq!(self.inner.load(Relaxed), X, "unlock of an unheld SharedMutex");
        self.inner.store(0, Release);
        park::unpark_one(&self.inner);
        self.outer.unlock();
    }

    // --- shared ---

    /// Attempts to acquire a shared hold without blocking.
    ///
    /// Fails as soon as a writer is pending or installed, even if that
    /// writer is itself still waiting for older readers to drain.
    #[must_use]
    pub fn try_lock_shared(&self) -> bool {
        let mut cur = self.inner.load(Relaxed);
        while cur & X == 0 {
            assert!(
                cur & HOLDERS < HOLDERS,
                "shared-mutex holder count overflow; this exceeds any \
                 plausible number of live threads"
            );
            match self
                .inner
                .compare_exchange_weak(cur, cur + 1, Acquire, Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }

    /// Acquires a shared hold, blocking while a writer is pending or
    /// installed.
    ///
    /// Readers never *hold* the outer gate; when refused by a pending
    /// writer they briefly queue behind it (acquire, retry the increment,
    /// release), which is what gives writers their preference.
    pub fn lock_shared(&self) {
        let mut boff = Backoff::new();
        loop {
            if self.try_lock_shared() {
                return;
            }
            trace!("SharedMutex::lock_shared: writer pending, queueing behind outer");
            self.outer.lock();
            let acquired = self.try_lock_shared();
            unsafe { self.outer.unlock() };
            if acquired {
                return;
            }
            boff.spin();
        }
    }

    /// Acquires a shared hold, spinning for up to `rounds` iterations
    /// before parking behind the outer gate.
    pub fn spin_lock_shared(&self, rounds: usize) {
        for _ in 0..rounds {
            if self.inner.load(Relaxed) & X == 0 && self.try_lock_shared() {
                return;
            }
            hint::spin_loop();
        }
        self.lock_shared();
    }

    /// Shared acquisition with [`DEFAULT_SPIN_ROUNDS`] of spinning.
    ///
    /// [`DEFAULT_SPIN_ROUNDS`]: crate::DEFAULT_SPIN_ROUNDS
    #[inline]
    pub fn spin_lock_shared_default(&self) {
        self.spin_lock_shared(crate::DEFAULT_SPIN_ROUNDS);
    }

    /// Releases a shared hold.
    ///
    /// If this was the last holder a pending writer was waiting on, that
    /// writer is woken.
    ///
    /// # Safety
    ///
    /// Must be paired with a successful shared acquisition whose hold has
    /// not yet been released.
    pub unsafe fn unlock_shared(&self) {
        let prev = test_dbg!(self.inner.fetch_sub(1, Release));
        debug_assert_ne!(prev & HOLDERS, 0, "unlock_shared with no shared holders");
        if prev == X | 1 {
            // Drain complete: we were the last holder a writer was
            // waiting out.
            park::unpark_one(&self.inner);
        }
    }

    // --- update ---

    /// Attempts to acquire an update hold without blocking.
    ///
    /// Update mode coexists with shared holders but excludes writers and
    /// other update holders; it occupies one unit of the holder count,
    /// exactly like a shared hold, plus the outer gate.
    #[must_use]
    pub fn try_lock_update(&self) -> bool {
        if !self.outer.try_lock() {
            return false;
        }
        let prev = self.inner.fetch_add(1, Acquire);
        debug_assert_eq!(prev & X, 0, "X set while the outer gate was free");
        true
    }

    /// Acquires an update hold, blocking behind other writers and update
    /// holders (but not behind shared holders).
    pub fn lock_update(&self) {
        self.outer.lock();
        let prev = self.inner.fetch_add(1, Acquire);
        debug_assert_eq!(prev & X, 0, "X set while the outer gate was free");
    }

    /// Update acquisition, spinning for up to `rounds` iterations on the
    /// outer gate before parking.
    pub fn spin_lock_update(&self, rounds: usize) {
        self.outer.spin_lock(rounds);
        let prev = self.inner.fetch_add(1, Acquire);
        debug_assert_eq!(prev & X, 0, "X set while the outer gate was free");
    }

    /// Update acquisition with [`DEFAULT_SPIN_ROUNDS`] of spinning.
    ///
    /// [`DEFAULT_SPIN_ROUNDS`]: crate::DEFAULT_SPIN_ROUNDS
    #[inline]
    pub fn spin_lock_update_default(&self) {
        self.spin_lock_update(crate::DEFAULT_SPIN_ROUNDS);
    }

    /// Releases an update hold.
    ///
    /// # Safety
    ///
    /// Must be paired with a successful update acquisition whose hold has
    /// not been released or upgraded.
    pub unsafe fn unlock_update(&self) {
        let prev = self.inner.fetch_sub(1, Release);
        debug_assert_ne!(prev & HOLDERS, 0, "unlock_update with no holders");
        if prev == X | 1 {
            park::unpark_one(&self.inner);
        }
        self.outer.unlock();
    }

    /// Upgrades an update hold to an exclusive hold, blocking until the
    /// shared holders it coexisted with have drained.
    ///
    /// The outer gate remains held across the upgrade, so no other writer
    /// or update holder can slip in between the two modes. One atomic add
    /// simultaneously cancels the caller's own holder unit and installs
    /// the exclusive-pending flag; if no shared holders remain the
    /// exclusive hold is granted immediately.
    ///
    /// # Safety
    ///
    /// The caller must hold this lock in update mode, and afterwards holds
    /// it exclusively: release with [`unlock`](Self::unlock) or
    /// [`update_lock_downgrade`](Self::update_lock_downgrade), not
    /// [`unlock_update`](Self::unlock_update).
    pub unsafe fn update_lock_upgrade(&self) {
        let prev = test_dbg!(self.inner.fetch_add(X - 1, AcqRel));
        debug_assert_eq!(prev & X, 0, "upgrade with a writer already installed");
        debug_assert_ne!(prev & HOLDERS, 0, "upgrade with no update holder");
        if prev - 1 != 0 {
            self.lock_inner_wait((prev - 1) | X);
        }
    }

    /// Downgrades an exclusive hold back to an update hold.
    ///
    /// The store reinstates the caller's holder unit and clears the
    /// exclusive flag; newly arriving readers may immediately acquire
    /// shared holds. No wake is needed: while the exclusive flag was set
    /// no reader could have parked on the inner word, and writers park on
    /// the outer gate, which the caller retains.
    ///
    /// # Safety
    ///
    /// The caller must hold this lock exclusively, and afterwards holds it
    /// in update mode: release with
    /// [`unlock_update`](Self::unlock_update), not
    /// [`unlock`](Self::unlock).
    pub unsafe fn update_lock_downgrade(&self) {
        debug_assert_eq!(self.inner.load(Relaxed), X, "downgrade without exclusive");
        self.inner.store(1, Release);
    }

    // --- observers ---

    /// Returns `true` if a writer is pending or installed.
    ///
    /// A relaxed, advisory load, exposed for instrumentation and for
    /// transactional-elision fast paths; ownership must not be inferred
    /// from it.
    #[inline]
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.inner.load(Relaxed) & X != 0
    }

    /// Returns `true` if any thread holds the lock in any mode.
    ///
    /// The same advisory caveats as [`is_waiting`](Self::is_waiting) apply.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.load(Relaxed) != 0
    }

    /// Returns `true` if any thread holds the lock *or* is waiting for it
    /// in any mode.
    ///
    /// A `SharedMutex` may only be destroyed when this is `false`.
    #[inline]
    #[must_use]
    pub fn is_locked_or_waiting(&self) -> bool {
        self.inner.load(Relaxed) != 0 || self.outer.is_locked_or_waiting()
    }

    /// The current number of holders: shared holders, plus one for the
    /// update holder if present.
    ///
    /// Unsynchronized and immediately stale; for debugging and heuristics,
    /// never for synchronization.
    #[inline]
    #[must_use]
    pub fn holder_count(&self) -> u32 {
        self.inner.load(Relaxed) & HOLDERS
    }
}

impl Default for SharedMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SharedMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Unpack from one load of the inner word; independent loads could
        // display a holder set the lock never actually had.
        let inner = self.inner.load(Relaxed);
        f.debug_struct("SharedMutex")
            .field("holders", &(inner & HOLDERS))
            .field("exclusive", &(inner & X != 0))
            .field("outer", &self.outer)
            .finish()
    }
}

// === lock_api integration ===
//
// Update mode is exactly `lock_api`'s upgradable read, so the full
// upgrade/downgrade trait family maps onto the inner word's state machine.

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl lock_api::RawRwLock for SharedMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = SharedMutex::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock_shared(&self) {
        SharedMutex::lock_shared(self)
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        SharedMutex::try_lock_shared(self)
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        SharedMutex::unlock_shared(self)
    }

    #[inline]
    fn lock_exclusive(&self) {
        SharedMutex::lock(self)
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        SharedMutex::try_lock(self)
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        SharedMutex::unlock(self)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        SharedMutex::is_locked(self)
    }

    #[inline]
    fn is_locked_exclusive(&self) -> bool {
        self.inner.load(Relaxed) == X
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl lock_api::RawRwLockUpgrade for SharedMutex {
    #[inline]
    fn lock_upgradable(&self) {
        SharedMutex::lock_update(self)
    }

    #[inline]
    fn try_lock_upgradable(&self) -> bool {
        SharedMutex::try_lock_update(self)
    }

    #[inline]
    unsafe fn unlock_upgradable(&self) {
        SharedMutex::unlock_update(self)
    }

    #[inline]
    unsafe fn upgrade(&self) {
        SharedMutex::update_lock_upgrade(self)
    }

    #[inline]
    unsafe fn try_upgrade(&self) -> bool {
        // Succeeds only if the caller's own unit is the sole holder.
        self.inner.compare_exchange(1, X, Acquire, Relaxed).is_ok()
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl lock_api::RawRwLockDowngrade for SharedMutex {
    #[inline]
    unsafe fn downgrade(&self) {
        // Exclusive -> shared: the stored unit becomes a plain shared
        // hold, and the outer gate is released so writers and update
        // holders may queue again.
        self.inner.store(1, Release);
        self.outer.unlock();
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl lock_api::RawRwLockUpgradeDowngrade for SharedMutex {
    #[inline]
    unsafe fn downgrade_upgradable(&self) {
        // Update -> shared: keep the holder unit, release the outer gate.
        self.outer.unlock();
    }

    #[inline]
    unsafe fn downgrade_to_upgradable(&self) {
        SharedMutex::update_lock_downgrade(self)
    }
}
