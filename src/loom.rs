#[allow(unused_imports)]
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(dead_code, unused_imports)]

    pub(crate) use loom::{cell, hint, model, thread};

    pub(crate) mod sync {
        pub(crate) use loom::sync::*;
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code, unused_imports)]

    pub(crate) mod sync {
        #[cfg(test)]
        pub(crate) use std::sync::Arc;

        pub(crate) mod atomic {
            pub(crate) use portable_atomic::{AtomicU32, Ordering};
        }
    }

    pub(crate) use portable_atomic::hint;

    #[cfg(test)]
    pub(crate) use std::thread;

    #[cfg(test)]
    pub(crate) fn model(f: impl FnOnce()) {
        let _trace = crate::util::test::trace_init();
        f()
    }

    pub(crate) mod cell {
        /// Mock version of `loom::cell::UnsafeCell`, so that tests exercise
        /// the same access-checked API whether or not the model checker is
        /// running.
        #[derive(Debug)]
        pub(crate) struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

        impl<T> UnsafeCell<T> {
            pub(crate) const fn new(data: T) -> UnsafeCell<T> {
                UnsafeCell(core::cell::UnsafeCell::new(data))
            }
        }

        // Mirrors `loom::cell::UnsafeCell`'s Send/Sync impls, so that tests
        // compile identically whether or not the model checker is running.
        unsafe impl<T: ?Sized + Send> Send for UnsafeCell<T> {}
        unsafe impl<T: ?Sized + Send> Sync for UnsafeCell<T> {}

        impl<T: ?Sized> UnsafeCell<T> {
            #[inline(always)]
            pub(crate) fn with<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*const T) -> R,
            {
                f(self.0.get())
            }

            #[inline(always)]
            pub(crate) fn with_mut<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*mut T) -> R,
            {
                f(self.0.get())
            }
        }
    }
}
