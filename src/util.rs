//! Macros and small helpers shared by the lock implementations.

#[cfg(any(test, feature = "tracing"))]
macro_rules! trace {
    ($($t:tt)*) => { tracing::trace!($($t)*) }
}

#[cfg(not(any(test, feature = "tracing")))]
macro_rules! trace {
    ($($t:tt)*) => {};
}

#[cfg(test)]
macro_rules! test_dbg {
    ($e:expr) => {
        match $e {
            e => {
                tracing::debug!(
                    location = %core::panic::Location::caller(),
                    "{} = {:?}",
                    stringify!($e),
                    &e
                );
                e
            }
        }
    };
}

#[cfg(not(test))]
macro_rules! test_dbg {
    ($e:expr) => {
        $e
    };
}

macro_rules! loom_const_fn {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($($arg:ident: $T:ty),*) -> $Ret:ty $body:block
    ) => {
        $(#[$meta])*
        #[cfg(not(loom))]
        $vis const fn $name($($arg: $T),*) -> $Ret $body

        $(#[$meta])*
        #[cfg(loom)]
        $vis fn $name($($arg: $T),*) -> $Ret $body
    }
}

/// An exponential backoff for retry loops.
///
/// Used between failed compare-and-swap attempts on the contended paths.
/// The user-visible bounded spins (`spin_lock(rounds)`) deliberately do
/// *not* use this: their contract is a fixed number of pause-and-reload
/// rounds.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Backoff {
    exp: u8,
}

// === impl Backoff ===

impl Backoff {
    /// Maximum exponent: cap each backoff at `2^6` spin-loop hints.
    const MAX_EXPONENT: u8 = 6;

    pub(crate) const fn new() -> Self {
        Self { exp: 0 }
    }

    /// Issues `2^exp` spin-loop hints and bumps the exponent.
    ///
    /// Under loom this yields to the simulated scheduler instead, so that
    /// the model can interleave the other thread's progress.
    #[inline(always)]
    pub(crate) fn spin(&mut self) {
        #[cfg(not(loom))]
        for _ in 0..(1 << self.exp) {
            crate::loom::hint::spin_loop();
        }

        #[cfg(loom)]
        loom::thread::yield_now();

        if self.exp < Self::MAX_EXPONENT {
            self.exp += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    /// Holds the tracing default-subscriber guard for the duration of a
    /// test, so that events emitted by spawned threads are captured too.
    #[must_use]
    #[cfg(not(loom))]
    pub(crate) struct TestGuard {
        _x1: tracing::subscriber::DefaultGuard,
    }

    /// Initialize tracing output for a test.
    #[cfg(not(loom))]
    pub(crate) fn trace_init() -> TestGuard {
        use tracing_subscriber::{
            filter::{EnvFilter, LevelFilter},
            util::SubscriberInitExt,
        };

        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
        let filter = if env.is_empty() {
            builder.parse_lossy("slimlock=info")
        } else {
            builder.parse_lossy(env)
        };
        let collector = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .without_time()
            .finish();

        TestGuard {
            _x1: collector.set_default(),
        }
    }
}
