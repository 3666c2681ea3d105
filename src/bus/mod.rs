// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Transport drivers: the Aspeed Block Transfer register window, the I²C
// slave channel, and a recording mock for tests and benchmarks. Each one
// implements `BmcBus` and feeds received frames into `BmcCtx::handle_request`.

pub mod aspeed;
pub mod i2c;
pub mod mock;

pub use aspeed::{AspeedBtBus, BtCtrl, Regmap};
pub use i2c::{BtI2cBus, I2cSlaveEvent};
pub use mock::MockBus;
