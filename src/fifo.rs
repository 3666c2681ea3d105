// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bounded FIFO of whole Block Transfer frames. Capacity is a power of two
// so the head/tail cursors wrap by masking. Push runs in dispatch context:
// each operation is one short exclusive section around a frame copy.

use crate::guarded::Guarded;
use crate::msg::{BtMsg, SEQ_MAX};
use crate::{Error, Result};

/// Default capacity: one slot per possible sequence number, rounded up to
/// a power of two.
pub const REQUEST_FIFO_SIZE: usize = SEQ_MAX.next_power_of_two();

struct Ring {
    head: u32,
    tail: u32,
    slots: Box<[BtMsg]>,
}

/// A bounded queue of whole [`BtMsg`] frames.
///
/// One producer (the dispatcher) pushes, any number of consumers (front-end
/// readers) pop. Either side may run where sleeping is forbidden. A full
/// queue surfaces as [`Error::Busy`], which the dispatcher converts to a
/// completion-code response.
pub struct MsgFifo {
    ring: Guarded<Ring>,
}

impl MsgFifo {
    /// Create a FIFO with the default capacity of [`REQUEST_FIFO_SIZE`].
    pub fn new() -> Self {
        Self::with_capacity(REQUEST_FIFO_SIZE)
    }

    /// Create a FIFO holding at least `capacity` frames (rounded up to a
    /// power of two).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            ring: Guarded::new(Ring {
                head: 0,
                tail: 0,
                slots: vec![BtMsg::default(); capacity].into_boxed_slice(),
            }),
        }
    }

    /// Number of frames the FIFO can hold.
    pub fn capacity(&self) -> usize {
        self.ring.with(|ring| ring.slots.len())
    }

    /// Append one frame. Fails with [`Error::Busy`] when full.
    pub fn push(&self, msg: &BtMsg) -> Result<()> {
        self.ring.with(|ring| {
            let cap = ring.slots.len() as u32;
            if ring.tail.wrapping_sub(ring.head) == cap {
                return Err(Error::Busy);
            }
            let idx = (ring.tail & (cap - 1)) as usize;
            ring.slots[idx] = *msg;
            ring.tail = ring.tail.wrapping_add(1);
            Ok(())
        })
    }

    /// Remove and return the oldest frame, if any.
    pub fn pop(&self) -> Option<BtMsg> {
        self.ring.with(|ring| {
            if ring.tail == ring.head {
                return None;
            }
            let cap = ring.slots.len() as u32;
            let idx = (ring.head & (cap - 1)) as usize;
            let msg = ring.slots[idx];
            ring.head = ring.head.wrapping_add(1);
            Some(msg)
        })
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.ring
            .with(|ring| ring.tail.wrapping_sub(ring.head) as usize)
    }

    /// Whether the FIFO holds no frames.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MsgFifo {
    fn default() -> Self {
        Self::new()
    }
}
