#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

pub(crate) mod loom;

#[macro_use]
mod util;

mod mutex;
mod park;
mod shared_mutex;

#[cfg(all(feature = "lock_api", not(loom)))]
pub mod guarded;

#[doc(inline)]
pub use self::mutex::Mutex;
#[doc(inline)]
pub use self::shared_mutex::SharedMutex;

/// Spin budget used by the `spin_lock_default` convenience methods.
///
/// This is the number of pause-and-reload rounds attempted before falling
/// back to the parking path, sized for critical sections of a few dozen
/// instructions. Workloads that know their hold times should call the
/// explicitly-parametrized `spin_lock(rounds)` forms instead.
pub const DEFAULT_SPIN_ROUNDS: usize = 100;
