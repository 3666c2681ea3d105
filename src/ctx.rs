// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The BMC core context: one bound transport, an ordered set of request
// handlers plus an optional default, request dispatch, the response-open
// fan-out, and synthesised completion-code responses.
//
// Readers (dispatch, fan-out, response sends) walk a copy-on-write roster
// snapshot under an epoch guard and never block. Writers (registration
// changes) serialise on a mutex, publish a new snapshot, and wait for the
// previous generation of readers to drain before freeing the old one, so a
// successful unregister guarantees no callback into that driver is still
// in progress.

use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::epoch::Epoch;
use crate::msg::{BtMsg, NETFN_LUN_RESPONSE_MASK};
use crate::{Error, Result};

/// An upper-level handler of IPMI requests.
///
/// Registered handlers are consulted in registration order; the first whose
/// [`match_request`](BmcDevice::match_request) returns `true` owns the
/// request, even if its `handle_request` then fails.
///
/// All three callbacks may be invoked from a context that forbids
/// blocking, sleeping, and allocation. A handler that needs any of those
/// must hand the request off to its own worker.
pub trait BmcDevice: Send + Sync {
    /// Whether this device can handle `request`.
    fn match_request(&self, request: &BtMsg) -> bool;

    /// Handle a request previously claimed by `match_request` (or routed
    /// here as the default). A failure is answered on the wire with the
    /// matching completion code.
    fn handle_request(&self, request: &BtMsg) -> Result<()>;

    /// A response finished sending and the transport can accept another.
    ///
    /// Every registered device receives this signal; another device may
    /// win the race for the slot, so a retried `send_response` can still
    /// come back [`Error::Busy`].
    fn signal_response_open(&self);
}

/// A lower-level transport connecting the BMC to the host.
pub trait BmcBus: Send + Sync {
    /// Submit a response to the host. [`Error::Busy`] means a response is
    /// already in flight; the caller should wait for the next
    /// response-open signal and retry.
    fn send_response(&self, response: &BtMsg) -> Result<()>;

    /// Whether a response could currently be sent. Advisory:
    /// `send_response` may still return [`Error::Busy`] if another caller
    /// claims the slot in between.
    fn is_response_open(&self) -> bool;
}

/// The read-side snapshot: ordered handlers, the default slot, the
/// transport slot. Replaced wholesale on every registration change.
#[derive(Clone)]
struct Roster {
    devices: Vec<Arc<dyn BmcDevice>>,
    default_device: Option<Arc<dyn BmcDevice>>,
    bus: Option<Arc<dyn BmcBus>>,
}

impl Roster {
    fn empty() -> Self {
        Self {
            devices: Vec::new(),
            default_device: None,
            bus: None,
        }
    }
}

/// Identity comparison for registry entries.
///
/// Compares allocation addresses only: `Arc::ptr_eq` on trait objects also
/// compares vtable pointers, which are not unique across codegen units.
fn same_entry<T: ?Sized, U: ?Sized>(a: &Arc<T>, b: &Arc<U>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Context object tying transports and devices together.
///
/// Most deployments use the process-wide instance from [`global_ctx`];
/// constructors of transports and devices take the handle explicitly, so
/// tests and embedders can run several independent contexts.
pub struct BmcCtx {
    roster: AtomicPtr<Roster>,
    epoch: Epoch,
    drivers_mutex: Mutex<()>,
    shut_down: AtomicBool,
}

impl BmcCtx {
    /// Create an empty context: no transport, no devices.
    pub fn new() -> Self {
        Self {
            roster: AtomicPtr::new(Box::into_raw(Box::new(Roster::empty()))),
            epoch: Epoch::new(),
            drivers_mutex: Mutex::new(()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Run `f` against the current roster under a read guard.
    ///
    /// Never blocks; the pointer load pairs with the `SeqCst` publish in
    /// `publish` (see `epoch.rs` for the full ordering argument).
    fn with_roster<R>(&self, f: impl FnOnce(&Roster) -> R) -> R {
        let _guard = self.epoch.enter();
        let roster = unsafe { &*self.roster.load(Ordering::SeqCst) };
        f(roster)
    }

    /// Swap in a new roster and wait for readers of the old one to drain.
    /// Must be called with `drivers_mutex` held.
    fn publish(&self, _witness: &MutexGuard<'_, ()>, next: Roster) {
        let next = Box::into_raw(Box::new(next));
        let old = self.roster.swap(next, Ordering::SeqCst);
        self.epoch.synchronize();
        // No reader can still observe `old`.
        drop(unsafe { Box::from_raw(old) });
    }

    fn writer_lock(&self) -> Result<MutexGuard<'_, ()>> {
        let guard = self.drivers_mutex.lock().unwrap_or_else(|e| e.into_inner());
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::Unsupported);
        }
        Ok(guard)
    }

    /// Roster as seen by the writer. Only valid while `drivers_mutex` is
    /// held; nothing else swaps the pointer in the meantime.
    fn writer_roster(&self, _witness: &MutexGuard<'_, ()>) -> &Roster {
        unsafe { &*self.roster.load(Ordering::SeqCst) }
    }

    /// Register a device. Fails with [`Error::AlreadyRegistered`] if this
    /// exact device (by identity) is already present.
    pub fn register_device(&self, device: Arc<dyn BmcDevice>) -> Result<()> {
        let w = self.writer_lock()?;
        let cur = self.writer_roster(&w);
        if cur.devices.iter().any(|d| same_entry(d, &device)) {
            return Err(Error::AlreadyRegistered);
        }
        let mut next = cur.clone();
        next.devices.push(device);
        self.publish(&w, next);
        Ok(())
    }

    /// Unregister a device. Fails with [`Error::NotFound`] if it is not
    /// registered. On success, no callback into the device is still in
    /// progress and none will start.
    pub fn unregister_device(&self, device: &Arc<dyn BmcDevice>) -> Result<()> {
        let w = self.writer_lock()?;
        let cur = self.writer_roster(&w);
        let idx = cur
            .devices
            .iter()
            .position(|d| same_entry(d, device))
            .ok_or(Error::NotFound)?;
        let mut next = cur.clone();
        next.devices.remove(idx);
        self.publish(&w, next);
        Ok(())
    }

    /// Make `device` the default device: it receives every request no
    /// other device matches. Fails with [`Error::Busy`] if a default is
    /// already registered.
    pub fn register_default_device(&self, device: Arc<dyn BmcDevice>) -> Result<()> {
        let w = self.writer_lock()?;
        let cur = self.writer_roster(&w);
        if cur.default_device.is_some() {
            return Err(Error::Busy);
        }
        let mut next = cur.clone();
        next.default_device = Some(device);
        self.publish(&w, next);
        Ok(())
    }

    /// Unregister the default device. Fails with [`Error::NotFound`] if
    /// `device` does not hold the slot. Waits for quiescence on success.
    pub fn unregister_default_device(&self, device: &Arc<dyn BmcDevice>) -> Result<()> {
        let w = self.writer_lock()?;
        let cur = self.writer_roster(&w);
        match &cur.default_device {
            Some(d) if same_entry(d, device) => {}
            _ => return Err(Error::NotFound),
        }
        let mut next = cur.clone();
        next.default_device = None;
        self.publish(&w, next);
        Ok(())
    }

    /// Bind a transport. Only one can be bound at a time; a second bind
    /// fails with [`Error::Busy`].
    pub fn register_bus(&self, bus: Arc<dyn BmcBus>) -> Result<()> {
        let w = self.writer_lock()?;
        let cur = self.writer_roster(&w);
        if cur.bus.is_some() {
            return Err(Error::Busy);
        }
        let mut next = cur.clone();
        next.bus = Some(bus);
        self.publish(&w, next);
        log::debug!("transport bound");
        Ok(())
    }

    /// Unbind a transport. Fails with [`Error::NotFound`] if `bus` is not
    /// the bound transport. Waits for quiescence on success.
    pub fn unregister_bus(&self, bus: &Arc<dyn BmcBus>) -> Result<()> {
        let w = self.writer_lock()?;
        let cur = self.writer_roster(&w);
        match &cur.bus {
            Some(b) if same_entry(b, bus) => {}
            _ => return Err(Error::NotFound),
        }
        let mut next = cur.clone();
        next.bus = None;
        self.publish(&w, next);
        log::debug!("transport unbound");
        Ok(())
    }

    /// Send a response on the bound transport.
    ///
    /// [`Error::NoDevice`] when no transport is bound; otherwise whatever
    /// the transport answers ([`Error::Busy`] means wait for the next
    /// response-open signal).
    pub fn send_response(&self, response: &BtMsg) -> Result<()> {
        self.with_roster(|r| match &r.bus {
            Some(bus) => bus.send_response(response),
            None => Err(Error::NoDevice),
        })
    }

    /// Whether a new response could currently be sent. `false` when no
    /// transport is bound. Advisory; `send_response` is authoritative.
    pub fn is_response_open(&self) -> bool {
        self.with_roster(|r| match &r.bus {
            Some(bus) => bus.is_response_open(),
            None => false,
        })
    }

    /// Route one received request.
    ///
    /// Called by the transport once per fully populated frame, possibly
    /// from interrupt context. The first matching device owns the request;
    /// the default device takes whatever nothing matched. A failed outcome
    /// (including "nobody took it") is answered with a completion-code
    /// response.
    pub fn handle_request(&self, request: &BtMsg) {
        if self.shut_down.load(Ordering::Acquire) {
            log::debug!("dropping request seq {} after shutdown", request.seq);
            return;
        }
        let outcome = self.with_roster(|r| {
            for device in &r.devices {
                if device.match_request(request) {
                    return device.handle_request(request);
                }
            }
            match &r.default_device {
                Some(d) => d.handle_request(request),
                None => Err(Error::Unsupported),
            }
        });
        if let Err(err) = outcome {
            self.send_error_response(request, err.completion_code());
        }
    }

    /// Notify every device, in registration order and then the default,
    /// that the transport can accept another response.
    ///
    /// Called by the transport after it finishes sending a response.
    /// Devices with queued responses re-enter [`BmcCtx::send_response`]
    /// themselves; there is no feedback loop.
    pub fn signal_response_open(&self) {
        self.with_roster(|r| {
            for device in &r.devices {
                device.signal_response_open();
            }
            if let Some(d) = &r.default_device {
                d.signal_response_open();
            }
        });
    }

    /// Answer `request` with a single-byte completion-code response.
    ///
    /// Sent once; if another response is in flight the emission fails and
    /// the host is left to time out. Buffering and retrying synthesised
    /// responses is a possible refinement, but device drivers generally
    /// report their own errors and this path is only the fallback.
    fn send_error_response(&self, request: &BtMsg, ccode: u8) {
        // One payload byte: construction cannot exceed the payload bound.
        let Ok(response) = BtMsg::new(
            request.netfn_lun | NETFN_LUN_RESPONSE_MASK,
            request.seq,
            request.cmd,
            &[ccode],
        ) else {
            return;
        };
        if let Err(err) = self.send_response(&response) {
            log::warn!(
                "failed to reply with completion code {:#04x}: {}",
                ccode,
                err
            );
        }
    }

    /// Shut the context down: refuse further registrations, wait for
    /// in-flight dispatch to drain, drop every reference the roster holds.
    /// Re-initialisation is not supported.
    pub fn shutdown(&self) {
        let w = self.drivers_mutex.lock().unwrap_or_else(|e| e.into_inner());
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.publish(&w, Roster::empty());
        log::debug!("core context shut down");
    }
}

impl Default for BmcCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BmcCtx {
    fn drop(&mut self) {
        let ptr = std::mem::replace(self.roster.get_mut(), std::ptr::null_mut());
        if !ptr.is_null() {
            // Exclusive access: no guards can be live once the ctx drops.
            drop(unsafe { Box::from_raw(ptr) });
        }
    }
}

/// The process-wide context, created on first use.
///
/// Transports and devices loaded independently find each other through
/// this handle; everything also accepts an explicit `Arc<BmcCtx>` so the
/// global is only a convenience for top-level wiring.
pub fn global_ctx() -> Arc<BmcCtx> {
    static GLOBAL: OnceLock<Arc<BmcCtx>> = OnceLock::new();
    Arc::clone(GLOBAL.get_or_init(|| Arc::new(BmcCtx::new())))
}
