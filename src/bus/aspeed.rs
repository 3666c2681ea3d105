// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Block Transfer transport for the Aspeed-family BT controller. The
// controller exposes whole-message framing through a small register bank:
// the host raises H2B_ATN when a request is buffered, the BMC streams the
// bytes out of BMC2HOST, and raises B2H_ATN after writing a response back.
//
// Register access goes through the `Regmap` trait so the same driver runs
// against a real MMIO window or a test double.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;

use crate::ctx::{BmcBus, BmcCtx};
use crate::guarded::Guarded;
use crate::msg::BtMsg;
use crate::{Error, Result};

/// Host-side I/O base advertised in CR0.
const BT_IO_BASE: u32 = 0xe4;
/// Host-side IRQ advertised in CR0.
const BT_IRQ: u32 = 10;

pub const BT_CR0: u32 = 0x0;
const BT_CR0_IO_BASE: u32 = 16;
const BT_CR0_IRQ: u32 = 12;
const BT_CR0_EN_CLR_SLV_RDP: u32 = 0x8;
const BT_CR0_EN_CLR_SLV_WRP: u32 = 0x4;
const BT_CR0_ENABLE_IBT: u32 = 0x1;
pub const BT_CR1: u32 = 0x4;
pub const BT_CR2: u32 = 0x8;
pub const BT_CR3: u32 = 0xc;
pub const BT_CTRL: u32 = 0x10;
pub const BT_BMC2HOST: u32 = 0x14;
pub const BT_INTMASK: u32 = 0x18;

bitflags! {
    /// BT_CTRL bits. Writing a 1 toggles the sticky bits (B_BUSY, the
    /// attention bits); CLR_RD_PTR / CLR_WR_PTR are write-only strobes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BtCtrl: u8 {
        const B_BUSY = 0x80;
        const H_BUSY = 0x40;
        const OEM0 = 0x20;
        const SMS_ATN = 0x10;
        const B2H_ATN = 0x08;
        const H2B_ATN = 0x04;
        const CLR_RD_PTR = 0x02;
        const CLR_WR_PTR = 0x01;
    }
}

bitflags! {
    /// Interrupt enable (CR1) / status (CR2) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BtIrq: u32 {
        const H2B = 0x01;
        const HBUSY = 0x40;
    }
}

/// CR0 value that enables the interface.
pub const fn enable_mask() -> u32 {
    (BT_IO_BASE << BT_CR0_IO_BASE)
        | (BT_IRQ << BT_CR0_IRQ)
        | BT_CR0_EN_CLR_SLV_RDP
        | BT_CR0_EN_CLR_SLV_WRP
        | BT_CR0_ENABLE_IBT
}

/// Poll cadence when no interrupt line is wired up.
pub const POLL_INTERVAL_MS: u64 = 500;

/// Register-bank access, 32 bits wide per register.
///
/// Stands in for the syscon regmap: the production implementation reads
/// and writes the mapped BT window, tests supply an in-memory double.
pub trait Regmap: Send + Sync {
    fn read(&self, offset: u32) -> u32;
    fn write(&self, offset: u32, val: u32);
}

impl<T: Regmap + ?Sized> Regmap for Arc<T> {
    fn read(&self, offset: u32) -> u32 {
        (**self).read(offset)
    }
    fn write(&self, offset: u32, val: u32) {
        (**self).write(offset, val)
    }
}

/// The Aspeed BT transport.
///
/// Outbound it implements [`BmcBus`]; inbound, [`AspeedBtBus::poll_once`]
/// or [`AspeedBtBus::handle_interrupt`] pull buffered requests out of the
/// controller and hand them to the core.
pub struct AspeedBtBus<R: Regmap> {
    io: R,
    offset: u32,
    ctx: Arc<BmcCtx>,
    // Serialises the multi-register sequences (fetch, send) against each
    // other; there is no data to guard, the registers are the state.
    regs: Guarded<()>,
    stop: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Regmap + 'static> AspeedBtBus<R> {
    /// Create the transport over `io` (registers at `offset`), bind it to
    /// `ctx`, and enable the controller. Fails with [`Error::Busy`] if
    /// another transport is bound.
    pub fn bind(ctx: Arc<BmcCtx>, io: R, offset: u32) -> Result<Arc<Self>> {
        let bus = Arc::new(Self {
            io,
            offset,
            ctx: Arc::clone(&ctx),
            regs: Guarded::new(()),
            stop: AtomicBool::new(false),
            poller: Mutex::new(None),
        });
        let as_bus: Arc<dyn BmcBus> = Arc::clone(&bus) as Arc<dyn BmcBus>;
        ctx.register_bus(as_bus)?;
        bus.enable();
        log::info!("aspeed bt transport bound");
        Ok(bus)
    }

    /// Stop polling and unbind from the context.
    pub fn unbind(self: &Arc<Self>) -> Result<()> {
        self.stop_polling();
        let as_bus: Arc<dyn BmcBus> = Arc::clone(self) as Arc<dyn BmcBus>;
        self.ctx.unregister_bus(&as_bus)
    }

    /// Spawn the fallback poller used when no interrupt line is present:
    /// every [`POLL_INTERVAL_MS`] it signals response-open if the channel
    /// is clear and drains any buffered request.
    ///
    /// The poller thread keeps the bus alive until [`stop_polling`]
    /// (or [`unbind`]) is called.
    ///
    /// [`stop_polling`]: AspeedBtBus::stop_polling
    /// [`unbind`]: AspeedBtBus::unbind
    pub fn start_polling(self: &Arc<Self>) {
        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if poller.is_some() {
            return;
        }
        let bus = Arc::clone(self);
        *poller = Some(std::thread::spawn(move || {
            while !bus.stop.load(Ordering::Acquire) {
                bus.poll_once();
                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
            }
        }));
    }

    /// Stop and join the poller thread, if running.
    pub fn stop_polling(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl<R: Regmap> AspeedBtBus<R> {
    fn inb(&self, reg: u32) -> u8 {
        self.io.read(self.offset + reg) as u8
    }

    fn outb(&self, data: u8, reg: u32) {
        self.io.write(self.offset + reg, data as u32);
    }

    fn ctrl(&self) -> BtCtrl {
        BtCtrl::from_bits_truncate(self.inb(BT_CTRL))
    }

    fn clr_rd_ptr(&self) {
        self.outb(BtCtrl::CLR_RD_PTR.bits(), BT_CTRL);
    }

    fn clr_wr_ptr(&self) {
        self.outb(BtCtrl::CLR_WR_PTR.bits(), BT_CTRL);
    }

    fn clr_h2b_atn(&self) {
        self.outb(BtCtrl::H2B_ATN.bits(), BT_CTRL);
    }

    fn set_b_busy(&self) {
        if !self.ctrl().contains(BtCtrl::B_BUSY) {
            self.outb(BtCtrl::B_BUSY.bits(), BT_CTRL);
        }
    }

    fn clr_b_busy(&self) {
        if self.ctrl().contains(BtCtrl::B_BUSY) {
            self.outb(BtCtrl::B_BUSY.bits(), BT_CTRL);
        }
    }

    fn set_b2h_atn(&self) {
        self.outb(BtCtrl::B2H_ATN.bits(), BT_CTRL);
    }

    fn bt_read(&self) -> u8 {
        self.inb(BT_BMC2HOST)
    }

    fn bt_write(&self, c: u8) {
        self.outb(c, BT_BMC2HOST);
    }

    /// Program CR0 and clear a stale B_BUSY left over from a reset.
    pub fn enable(&self) {
        self.io.write(self.offset + BT_CR0, enable_mask());
        self.clr_b_busy();
    }

    /// Enable the H2B and HBUSY interrupts in CR1. H2B fires when the
    /// host buffers a request; HBUSY clears (with B2H) when the next
    /// response can be written.
    pub fn enable_interrupts(&self) {
        let cr1 = self.offset + BT_CR1;
        let val = self.io.read(cr1) | BtIrq::H2B.bits() | BtIrq::HBUSY.bits();
        self.io.write(cr1, val);
    }

    /// Caller is inside the register exclusive section.
    fn response_open_raw(&self) -> bool {
        !self
            .ctrl()
            .intersects(BtCtrl::H_BUSY | BtCtrl::B2H_ATN)
    }

    fn request_avail(&self) -> bool {
        self.regs.with(|_| self.ctrl().contains(BtCtrl::H2B_ATN))
    }

    /// Stream one buffered request out of the controller and dispatch it.
    ///
    /// The frame is assembled inside the exclusive section; the dispatch
    /// runs after it, because the core may synchronously answer on this
    /// same transport (the error-synthesiser path).
    fn fetch_request(&self) {
        let request = self.regs.with(|_| {
            if !self.ctrl().contains(BtCtrl::H2B_ATN) {
                return None;
            }

            self.set_b_busy();
            self.clr_h2b_atn();
            self.clr_rd_ptr();

            let mut request = BtMsg::default();
            let buf = request.as_mut_bytes();
            buf[0] = self.bt_read();
            let total = (buf[0] as usize + 1).min(buf.len());
            for slot in buf[1..total].iter_mut() {
                *slot = self.bt_read();
            }

            self.clr_b_busy();
            Some(request)
        });

        if let Some(request) = request {
            self.ctx.handle_request(&request);
        }
    }

    /// One iteration of the no-interrupt fallback: signal response-open
    /// when the channel is clear, then drain a buffered request.
    pub fn poll_once(&self) {
        if self.is_response_open() {
            self.ctx.signal_response_open();
        }
        if self.request_avail() {
            self.fetch_request();
        }
    }

    /// Service the BT interrupt: check and acknowledge the CR2 status
    /// bits, then do the same work as [`AspeedBtBus::poll_once`]. Returns
    /// `false` when the interrupt was not ours.
    pub fn handle_interrupt(&self) -> bool {
        let cr2 = self.offset + BT_CR2;
        let pending = self.io.read(cr2) & (BtIrq::H2B.bits() | BtIrq::HBUSY.bits());
        if pending == 0 {
            return false;
        }
        // ack pending IRQs
        self.io.write(cr2, pending);

        if self.is_response_open() {
            self.ctx.signal_response_open();
        }
        if self.request_avail() {
            self.fetch_request();
        }
        true
    }
}

impl<R: Regmap> BmcBus for AspeedBtBus<R> {
    /// Write a whole response into the controller and raise B2H_ATN.
    ///
    /// Wire layout of a response:
    ///
    /// ```text
    /// Byte 1  Byte 2     Byte 3  Byte 4  Byte 5  Byte 6:N
    /// Length  NetFn/LUN  Seq     Cmd     Code    Data
    /// ```
    fn send_response(&self, response: &BtMsg) -> Result<()> {
        self.regs.with(|_| {
            if !self.response_open_raw() {
                return Err(Error::Busy);
            }

            self.clr_wr_ptr();
            for &b in response.as_bytes() {
                self.bt_write(b);
            }
            self.set_b2h_atn();

            Ok(())
        })
    }

    fn is_response_open(&self) -> bool {
        self.regs.with(|_| self.response_open_raw())
    }
}

