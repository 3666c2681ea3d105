// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Exclusive-access cell for state shared with the dispatch path. The
// request FIFO and the transport staging buffers are mutated from
// contexts that must not sleep, so acquisition spins (CPU pause, then a
// thread yield under sustained contention) and never parks. In exchange,
// a critical section is at most a frame copy or a flag flip, and must
// not call back into code that takes the same cell; the transports
// therefore dispatch completed frames only after leaving theirs.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// A value guarded by a non-sleeping exclusive section.
///
/// Access is closure-scoped: [`Guarded::with`] acquires, runs the
/// closure against `&mut T`, and releases. There is no guard object to
/// hold across a dispatch or a wait.
pub(crate) struct Guarded<T> {
    taken: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: `with` hands out `&mut T` to one thread at a time.
unsafe impl<T: Send> Send for Guarded<T> {}
unsafe impl<T: Send> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            taken: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// Holders finish within a few stores, so a contended acquire is
    /// served by pause hints in the common case; the pause batch doubles
    /// up to a cap, after which the waiter yields its timeslice to let a
    /// preempted holder run.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut batch = 1u32;
        while self
            .taken
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            for _ in 0..batch {
                std::hint::spin_loop();
            }
            if batch < 64 {
                batch <<= 1;
            } else {
                std::thread::yield_now();
            }
        }
        let result = f(unsafe { &mut *self.value.get() });
        self.taken.store(false, Ordering::Release);
        result
    }
}
