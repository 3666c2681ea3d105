// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Recording transport double. Accepts responses while the response
// channel is marked open, remembers everything it accepted, and lets the
// caller drive the open/closed arbitration by hand. Used by the crate's
// tests and benchmarks; useful to downstream handler tests for the same
// reason.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::ctx::BmcBus;
use crate::msg::BtMsg;
use crate::{Error, Result};

/// A mock transport.
///
/// `send_response` succeeds while the response channel is open, records
/// the frame, and closes the channel: exactly one response is in flight
/// until [`MockBus::set_response_open`] reopens it, which mirrors the
/// arbitration contract real transports implement in hardware.
pub struct MockBus {
    sent: Mutex<Vec<BtMsg>>,
    response_open: AtomicBool,
    fail_next: Mutex<Option<Error>>,
}

impl MockBus {
    /// A mock with the response channel open.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            response_open: AtomicBool::new(true),
            fail_next: Mutex::new(None),
        })
    }

    /// Open or close the response channel. Reopening models the host
    /// consuming the in-flight response; the caller still has to fan out
    /// `signal_response_open` through the context, as a transport would.
    pub fn set_response_open(&self, open: bool) {
        self.response_open.store(open, Ordering::Release);
    }

    /// Make the next `send_response` fail with `err` regardless of the
    /// channel state.
    pub fn fail_next_send(&self, err: Error) {
        *self.fail_next.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
    }

    /// Every frame accepted so far, oldest first.
    pub fn sent(&self) -> Vec<BtMsg> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drain and return the accepted frames.
    pub fn take_sent(&self) -> Vec<BtMsg> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Number of frames accepted so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl BmcBus for MockBus {
    fn send_response(&self, response: &BtMsg) -> Result<()> {
        if let Some(err) = self.fail_next.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(err);
        }
        if !self.response_open.swap(false, Ordering::AcqRel) {
            return Err(Error::Busy);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(*response);
        Ok(())
    }

    fn is_response_open(&self) -> bool {
        self.response_open.load(Ordering::Acquire)
    }
}
