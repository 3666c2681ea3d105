// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Default-device sink: queues every request no in-process handler claims
// into a bounded FIFO and exposes the queue to a user agent through a
// character-device-shaped front end (read / write / poll, blocking or
// non-blocking). The VFS wiring itself lives outside this crate.

use std::sync::Arc;

use bitflags::bitflags;

use crate::ctx::{BmcCtx, BmcDevice};
use crate::fifo::MsgFifo;
use crate::msg::BtMsg;
use crate::waiter::Waiter;
use crate::{Error, Result};

bitflags! {
    /// Readiness mask reported by [`DevIntf::poll`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollMask: u16 {
        /// A whole request frame is waiting to be read.
        const POLLIN = 0x0001;
        /// The transport can accept a response.
        const POLLOUT = 0x0004;
    }
}

/// The default device: a FIFO of unclaimed requests plus the user-agent
/// front end draining it.
///
/// Created registered via [`DevIntf::register`]; all waits are cancelled
/// by [`DevIntf::interrupt`] (and by [`DevIntf::unregister`], which tears
/// the front end down for good).
pub struct DevIntf {
    ctx: Arc<BmcCtx>,
    requests: MsgFifo,
    wait_queue: Waiter,
}

impl DevIntf {
    /// Create the device interface and register it as `ctx`'s default
    /// device. Fails with [`Error::Busy`] if another default is present.
    pub fn register(ctx: Arc<BmcCtx>) -> Result<Arc<Self>> {
        let devintf = Arc::new(Self {
            ctx: Arc::clone(&ctx),
            requests: MsgFifo::new(),
            wait_queue: Waiter::new(),
        });
        let as_device: Arc<dyn BmcDevice> = Arc::clone(&devintf) as Arc<dyn BmcDevice>;
        ctx.register_default_device(as_device)?;
        log::info!("bmc device interface initialized");
        Ok(devintf)
    }

    /// Remove this interface from its context and cancel all suspended
    /// front-end operations.
    pub fn unregister(self: &Arc<Self>) -> Result<()> {
        let as_device: Arc<dyn BmcDevice> = Arc::clone(self) as Arc<dyn BmcDevice>;
        self.ctx.unregister_default_device(&as_device)?;
        self.wait_queue.quit_waiting();
        Ok(())
    }

    /// Pop one whole request frame into `buf`.
    ///
    /// Returns the number of bytes copied: the frame's on-wire length, or
    /// `buf.len()` if the buffer is smaller. Partial reads are not
    /// supported; the remainder of a truncated frame is discarded.
    ///
    /// An empty queue returns [`Error::Busy`] in non-blocking mode and
    /// otherwise suspends until a request arrives ([`Error::Interrupted`]
    /// on cancellation).
    pub fn read(&self, buf: &mut [u8], blocking: bool) -> Result<usize> {
        let msg = loop {
            // Another reader may win the race between wakeup and pop, so
            // re-arm the wait instead of trusting the wakeup.
            if let Some(msg) = self.requests.pop() {
                break msg;
            }
            if !blocking {
                return Err(Error::Busy);
            }
            self.wait_queue.wait_if(|| self.requests.is_empty(), None)?;
        };
        let n = buf.len().min(msg.wire_len());
        buf[..n].copy_from_slice(&msg.as_bytes()[..n]);
        Ok(n)
    }

    /// Submit one whole response frame.
    ///
    /// `buf` must be exactly one frame (`buf.len() == buf[0] + 1`);
    /// anything else is [`Error::Invalid`]. If a response is already in
    /// flight, non-blocking mode surfaces [`Error::Busy`] and blocking
    /// mode suspends until the response channel reopens, then retries.
    /// Returns the byte count on success.
    pub fn write(&self, buf: &[u8], blocking: bool) -> Result<usize> {
        let msg = BtMsg::from_bytes(buf)?;
        let mut ret = self.ctx.send_response(&msg);
        while blocking && ret == Err(Error::Busy) {
            self.wait_queue
                .wait_if(|| !self.ctx.is_response_open(), None)?;
            ret = self.ctx.send_response(&msg);
        }
        ret.map(|()| buf.len())
    }

    /// Current readiness: readable iff a request is queued, writable iff
    /// the transport reports response-open.
    pub fn poll(&self) -> PollMask {
        let mut mask = PollMask::empty();
        if !self.requests.is_empty() {
            mask |= PollMask::POLLIN;
        }
        if self.ctx.is_response_open() {
            mask |= PollMask::POLLOUT;
        }
        mask
    }

    /// Cancel all suspended reads and writes; they return
    /// [`Error::Interrupted`], as does every later attempt to block.
    pub fn interrupt(&self) {
        self.wait_queue.quit_waiting();
    }
}

impl BmcDevice for DevIntf {
    fn match_request(&self, _request: &BtMsg) -> bool {
        // Default device: matches everything. The core only consults it
        // after every registered device has declined.
        true
    }

    fn handle_request(&self, request: &BtMsg) -> Result<()> {
        if request.len == 0 {
            return Err(Error::Invalid);
        }
        self.requests.push(request)?;
        self.wait_queue.broadcast();
        Ok(())
    }

    fn signal_response_open(&self) {
        self.wait_queue.broadcast();
    }
}
