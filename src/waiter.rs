// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Condition-variable + mutex wrapper used by the front end to suspend
// readers waiting for queued requests and writers waiting for the response
// channel to reopen. Waits are cancellable: after quit_waiting, every
// current and future wait returns Interrupted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// A waiter combining a condition variable, a mutex, and a quit flag.
///
/// Predicates are re-checked after every wakeup; spurious wakeups are
/// harmless. Wakers must only be invoked from blocking-tolerant contexts
/// in the sense that they briefly acquire the internal lock.
pub struct Waiter {
    cond: Condvar,
    lock: Mutex<()>,
    quit: AtomicBool,
}

impl Waiter {
    /// Create a waiter with no one waiting.
    pub fn new() -> Self {
        Self {
            cond: Condvar::new(),
            lock: Mutex::new(()),
            quit: AtomicBool::new(false),
        }
    }

    /// Block while `pred` returns `true`.
    ///
    /// Returns `Ok(true)` once the predicate clears, `Ok(false)` on
    /// timeout, `Err(Interrupted)` once [`Waiter::quit_waiting`] has fired.
    pub fn wait_if<F>(&self, pred: F, timeout_ms: Option<u64>) -> Result<bool>
    where
        F: Fn() -> bool,
    {
        let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
        let mut held = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if self.quit.load(Ordering::Acquire) {
                return Err(Error::Interrupted);
            }
            if !pred() {
                return Ok(true);
            }
            match deadline {
                Some(dl) => {
                    let remaining = dl.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    let (guard, timeout) = self
                        .cond
                        .wait_timeout(held, remaining)
                        .unwrap_or_else(|e| e.into_inner());
                    held = guard;
                    if timeout.timed_out() {
                        // Deadline passed while asleep; one last predicate
                        // check decides between success and timeout.
                        if self.quit.load(Ordering::Acquire) {
                            return Err(Error::Interrupted);
                        }
                        return Ok(!pred());
                    }
                }
                None => {
                    held = self.cond.wait(held).unwrap_or_else(|e| e.into_inner());
                }
            }
        }
    }

    /// Wake one waiter.
    pub fn notify(&self) {
        // Barrier: briefly acquire the lock so a waiter between its
        // predicate check and the sleep cannot miss the wakeup.
        drop(self.lock.lock().unwrap_or_else(|e| e.into_inner()));
        self.cond.notify_one();
    }

    /// Wake all waiters.
    pub fn broadcast(&self) {
        drop(self.lock.lock().unwrap_or_else(|e| e.into_inner()));
        self.cond.notify_all();
    }

    /// Cancel: all current and future waits return `Interrupted`.
    pub fn quit_waiting(&self) {
        self.quit.store(true, Ordering::Release);
        self.broadcast();
    }
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}
