// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// BMC-side IPMI Block Transfer core. A host CPU sends management requests
// over a low-speed transport; this crate routes each request to the first
// handler that claims it (or a default sink feeding a user agent), keeps
// at most one response in flight on the transport, and answers failed or
// unclaimed requests with a completion-code response.

mod error;
pub use error::{Error, Result};

mod msg;
pub use msg::{payload_to_len, BtMsg, NETFN_LUN_RESPONSE_MASK, PAYLOAD_LEN_MAX, SEQ_MAX};

mod guarded;

mod epoch;
pub use epoch::{Epoch, ReadGuard};

mod waiter;
pub use waiter::Waiter;

mod fifo;
pub use fifo::{MsgFifo, REQUEST_FIFO_SIZE};

mod ctx;
pub use ctx::{global_ctx, BmcBus, BmcCtx, BmcDevice};

mod devintf;
pub use devintf::{DevIntf, PollMask};

pub mod bus;
