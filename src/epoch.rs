// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Epoch-based reader quiescence. Readers (dispatch, fan-out, response
// sends) take a guard that never blocks; writers (registration changes)
// publish a new snapshot, flip the generation, and wait for the previous
// generation's readers to drain before freeing the old snapshot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Two-generation reader tracking.
///
/// `gen`'s low bit selects which of the two counters new readers bump.
/// [`Epoch::synchronize`] flips the generation and waits for the counter of
/// the generation it left behind to reach zero; any reader that might have
/// observed state published before the flip is counted there.
///
/// All operations are `SeqCst`: the safety of the publish protocol depends
/// on a single total order over {pointer swap, generation flip, counter
/// increment, counter poll, pointer load}. A reader whose increment the
/// writer's poll did not observe is ordered after that poll, so its
/// subsequent pointer load sees the newly published snapshot, never the one
/// the writer is about to free.
pub struct Epoch {
    gen: AtomicUsize,
    readers: [AtomicUsize; 2],
}

/// Proof that the holder is counted in a reader generation.
///
/// Entering never waits; dropping decrements the generation counter.
pub struct ReadGuard<'a> {
    epoch: &'a Epoch,
    slot: usize,
}

impl Epoch {
    /// Create a new epoch with no active readers.
    pub const fn new() -> Self {
        Self {
            gen: AtomicUsize::new(0),
            readers: [AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    /// Enter a read-side critical section.
    ///
    /// Never blocks, sleeps, or allocates, so it is safe from contexts
    /// that forbid all three.
    pub fn enter(&self) -> ReadGuard<'_> {
        let slot = self.gen.load(Ordering::SeqCst) & 1;
        self.readers[slot].fetch_add(1, Ordering::SeqCst);
        ReadGuard { epoch: self, slot }
    }

    /// Flip the generation and wait until every reader of the previous
    /// generation has left its critical section.
    ///
    /// Blocking-tolerant callers only. Calls must be serialised by the
    /// caller (the registry writer mutex); two concurrent flips would share
    /// a counter slot.
    pub fn synchronize(&self) {
        let old = self.gen.fetch_add(1, Ordering::SeqCst);
        let slot = old & 1;
        // A reader's critical section is a roster walk plus handler
        // calls, so the drain usually completes within the spin phase;
        // past it, poll at a sleep cadence. This side is
        // blocking-tolerant.
        let mut spins = 0u32;
        while self.readers[slot].load(Ordering::SeqCst) != 0 {
            if spins < 128 {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::sleep(Duration::from_micros(50));
            }
        }
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.epoch.readers[self.slot].fetch_sub(1, Ordering::SeqCst);
    }
}
