//! RAII, data-carrying wrappers over the raw lock words.
//!
//! The types in this module are [`lock_api`] containers parametrized with
//! this crate's [`Mutex`](crate::Mutex) and [`SharedMutex`](crate::SharedMutex)
//! as their raw locks. They restore the familiar guard-based API (the
//! data lives inside the lock, acquisition returns a guard, and release
//! happens on drop) while keeping the lock state itself at one or two
//! 32-bit words.
//!
//! [`SharedMutex`](crate::SharedMutex)'s update mode surfaces here as
//! `lock_api`'s *upgradable read*: [`RwLock::upgradable_read`] returns a
//! [`RwLockUpgradableReadGuard`], which coexists with read guards and can
//! be upgraded in place to a write guard (waiting for readers to drain)
//! or downgraded back.
//!
//! ```
//! use slimlock::guarded::Mutex;
//!
//! let counter = Mutex::new(0u64);
//! *counter.lock() += 1;
//! assert_eq!(*counter.lock(), 1);
//! ```
//!
//! [`RwLock::upgradable_read`]: lock_api::RwLock::upgradable_read

/// A [`lock_api::Mutex`] keyed on the 4-byte [`Mutex`](crate::Mutex) word.
pub type Mutex<T> = lock_api::Mutex<crate::Mutex, T>;

/// An RAII guard returned by [`Mutex::lock`] and [`Mutex::try_lock`].
///
/// [`Mutex::lock`]: lock_api::Mutex::lock
/// [`Mutex::try_lock`]: lock_api::Mutex::try_lock
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, crate::Mutex, T>;

/// A [`lock_api::RwLock`] keyed on the 8-byte
/// [`SharedMutex`](crate::SharedMutex) word pair.
pub type RwLock<T> = lock_api::RwLock<crate::SharedMutex, T>;

/// An RAII guard for a shared hold.
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, crate::SharedMutex, T>;

/// An RAII guard for an exclusive hold.
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, crate::SharedMutex, T>;

/// An RAII guard for an update hold, upgradable to a
/// [`RwLockWriteGuard`] and downgradable to a [`RwLockReadGuard`].
pub type RwLockUpgradableReadGuard<'a, T> =
    lock_api::RwLockUpgradableReadGuard<'a, crate::SharedMutex, T>;
