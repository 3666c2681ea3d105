// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Block Transfer transport over an I²C slave channel. The host master
// writes a request one byte at a time and reads the response back the
// same way; the slave controller surfaces both as per-byte events. The
// first response byte is previewed without advancing, because the
// controller cannot know whether the master will actually consume it.

use std::sync::Arc;

use crate::ctx::{BmcBus, BmcCtx};
use crate::guarded::Guarded;
use crate::msg::BtMsg;
use crate::{Error, Result};

/// Per-byte events delivered by the I²C slave controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cSlaveEvent {
    /// The master opened a write transfer.
    WriteRequested,
    /// The master wrote one byte.
    WriteReceived(u8),
    /// The master opened a read transfer; the first byte must be
    /// produced without advancing.
    ReadRequested,
    /// The previous byte was clocked out; produce the next one.
    ReadProcessed,
    /// Stop condition.
    Stop,
}

struct SlaveState {
    request: BtMsg,
    response: BtMsg,
    response_in_progress: bool,
    msg_idx: usize,
}

/// The BT-over-I²C transport.
///
/// Outbound it implements [`BmcBus`] with a single staged response;
/// inbound, the slave controller feeds [`BtI2cBus::slave_event`] and the
/// accumulated frame is dispatched the moment it reaches its declared
/// length.
pub struct BtI2cBus {
    ctx: Arc<BmcCtx>,
    state: Guarded<SlaveState>,
}

impl BtI2cBus {
    /// Create the transport and bind it to `ctx`. Fails with
    /// [`Error::Busy`] if another transport is bound.
    pub fn bind(ctx: Arc<BmcCtx>) -> Result<Arc<Self>> {
        let bus = Arc::new(Self {
            ctx: Arc::clone(&ctx),
            state: Guarded::new(SlaveState {
                request: BtMsg::default(),
                response: BtMsg::default(),
                response_in_progress: false,
                msg_idx: 0,
            }),
        });
        let as_bus: Arc<dyn BmcBus> = Arc::clone(&bus) as Arc<dyn BmcBus>;
        ctx.register_bus(as_bus)?;
        log::info!("bt-i2c transport bound");
        Ok(bus)
    }

    /// Unbind from the context.
    pub fn unbind(self: &Arc<Self>) -> Result<()> {
        let as_bus: Arc<dyn BmcBus> = Arc::clone(self) as Arc<dyn BmcBus>;
        self.ctx.unregister_bus(&as_bus)
    }

    /// Feed one slave-controller event. Read events return the byte to
    /// clock out; write events return `None`.
    pub fn slave_event(&self, event: I2cSlaveEvent) -> Option<u8> {
        match event {
            I2cSlaveEvent::WriteRequested | I2cSlaveEvent::Stop => {
                self.state.with(|st| st.msg_idx = 0);
                None
            }

            I2cSlaveEvent::WriteReceived(val) => {
                let complete = self.state.with(|st| {
                    let buf = st.request.as_mut_bytes();
                    if st.msg_idx >= buf.len() {
                        return None;
                    }
                    buf[st.msg_idx] = val;
                    st.msg_idx += 1;
                    if st.msg_idx == st.request.wire_len() {
                        Some(st.request)
                    } else {
                        None
                    }
                });
                // Dispatch outside the exclusive section: the core may
                // answer on this same transport before returning.
                if let Some(request) = complete {
                    self.ctx.handle_request(&request);
                }
                None
            }

            I2cSlaveEvent::ReadRequested => Some(self.state.with(|st| {
                st.msg_idx = 0;
                // Do not advance: this byte may never be consumed.
                st.response.as_bytes()[0]
            })),

            I2cSlaveEvent::ReadProcessed => {
                let (val, signal) = self.state.with(|st| {
                    st.msg_idx += 1;
                    let val = if st.response.len != 0 && st.msg_idx < st.response.wire_len() {
                        st.response.as_bytes()[st.msg_idx]
                    } else {
                        // Trailing zero past end-of-frame.
                        0
                    };
                    let mut signal = false;
                    if st.response_in_progress && st.msg_idx + 1 >= st.response.wire_len() {
                        // Invalidate the buffered response to mark it sent.
                        st.response.len = 0;
                        st.response_in_progress = false;
                        signal = true;
                    }
                    (val, signal)
                });
                if signal {
                    self.ctx.signal_response_open();
                }
                Some(val)
            }
        }
    }
}

impl BmcBus for BtI2cBus {
    fn send_response(&self, response: &BtMsg) -> Result<()> {
        self.state.with(|st| {
            if st.response_in_progress {
                return Err(Error::Busy);
            }
            st.response = *response;
            st.response_in_progress = true;
            Ok(())
        })
    }

    fn is_response_open(&self) -> bool {
        self.state.with(|st| !st.response_in_progress)
    }
}
