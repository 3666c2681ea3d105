// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Core context tests: registration rules, first-wins dispatch, the
// response-open fan-out, completion-code synthesis, response arbitration,
// and unregister quiescence.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ipmi_bmc::bus::MockBus;
use ipmi_bmc::{BmcCtx, BmcDevice, BtMsg, Error, Result};

/// Scripted device: fixed match answer, fixed handle outcome, counters
/// for every callback, and a shared log for observing fan-out order.
struct TestDevice {
    name: &'static str,
    matches: bool,
    outcome: Result<()>,
    handled: AtomicUsize,
    last_request: Mutex<Option<BtMsg>>,
    signals: AtomicUsize,
    signal_log: Arc<Mutex<Vec<&'static str>>>,
}

impl TestDevice {
    fn new(name: &'static str, matches: bool, outcome: Result<()>) -> Arc<Self> {
        Arc::new(Self {
            name,
            matches,
            outcome,
            handled: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            signals: AtomicUsize::new(0),
            signal_log: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn with_log(
        name: &'static str,
        matches: bool,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            matches,
            outcome: Ok(()),
            handled: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            signals: AtomicUsize::new(0),
            signal_log: Arc::clone(log),
        })
    }

    fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    fn signals(&self) -> usize {
        self.signals.load(Ordering::SeqCst)
    }
}

impl BmcDevice for TestDevice {
    fn match_request(&self, _request: &BtMsg) -> bool {
        self.matches
    }

    fn handle_request(&self, request: &BtMsg) -> Result<()> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().expect("lock") = Some(*request);
        self.outcome
    }

    fn signal_response_open(&self) {
        self.signals.fetch_add(1, Ordering::SeqCst);
        self.signal_log.lock().expect("lock").push(self.name);
    }
}

fn request(netfn_lun: u8, seq: u8, cmd: u8, payload: &[u8]) -> BtMsg {
    BtMsg::new(netfn_lun, seq, cmd, payload).expect("build request")
}

// ========== Dispatch ==========

// No handler, no default: the host gets an unspecified-error response.
#[test]
fn unclaimed_request_yields_0xff_response() {
    let ctx = BmcCtx::new();
    let bus = MockBus::new();
    ctx.register_bus(bus.clone()).expect("register bus");

    ctx.handle_request(&request(0x18, 1, 0x01, &[]));

    let sent = bus.sent();
    assert_eq!(sent.len(), 1);
    let rsp = &sent[0];
    assert_eq!(rsp.len, 4);
    assert_eq!(rsp.netfn_lun, 0x1C);
    assert_eq!(rsp.seq, 1);
    assert_eq!(rsp.cmd, 0x01);
    assert_eq!(rsp.payload(), &[0xFF]);
}

// First-wins ordering: with two always-matching handlers, only the one
// registered first sees the request.
#[test]
fn first_matching_device_wins() {
    let ctx = BmcCtx::new();
    let h1 = TestDevice::new("h1", true, Ok(()));
    let h2 = TestDevice::new("h2", true, Ok(()));
    ctx.register_device(h1.clone()).expect("register h1");
    ctx.register_device(h2.clone()).expect("register h2");

    ctx.handle_request(&request(0x18, 3, 0x02, &[]));

    assert_eq!(h1.handled(), 1);
    assert_eq!(h2.handled(), 0);
}

// A matching handler owns the request even when it fails: the default is
// not consulted and the failure maps to its completion code.
#[test]
fn handler_error_maps_to_completion_code() {
    let ctx = BmcCtx::new();
    let bus = MockBus::new();
    ctx.register_bus(bus.clone()).expect("register bus");
    let h1 = TestDevice::new("h1", true, Err(Error::Busy));
    let fallback = TestDevice::new("fallback", true, Ok(()));
    ctx.register_device(h1.clone()).expect("register h1");
    ctx.register_default_device(fallback.clone())
        .expect("register default");

    ctx.handle_request(&request(0x18, 5, 0x07, &[0xAA]));

    assert_eq!(h1.handled(), 1);
    assert_eq!(fallback.handled(), 0);
    let sent = bus.sent();
    assert_eq!(sent.len(), 1);
    let rsp = &sent[0];
    assert_eq!(rsp.len, 4);
    assert_eq!(rsp.netfn_lun, 0x1C);
    assert_eq!(rsp.seq, 5);
    assert_eq!(rsp.cmd, 0x07);
    assert_eq!(rsp.payload(), &[0xC0]);
}

// Non-matching handlers are skipped and the default picks the request up.
#[test]
fn default_takes_unmatched_request() {
    let ctx = BmcCtx::new();
    let bus = MockBus::new();
    ctx.register_bus(bus.clone()).expect("register bus");
    let picky = TestDevice::new("picky", false, Ok(()));
    let fallback = TestDevice::new("fallback", true, Ok(()));
    ctx.register_device(picky.clone()).expect("register picky");
    ctx.register_default_device(fallback.clone())
        .expect("register default");

    let req = request(0x18, 2, 0x02, &[]);
    ctx.handle_request(&req);

    assert_eq!(picky.handled(), 0);
    assert_eq!(fallback.handled(), 1);
    assert_eq!(
        fallback.last_request.lock().expect("lock").expect("frame"),
        req
    );
    // The request was accepted, so the core sends nothing itself.
    assert_eq!(bus.sent_count(), 0);
}

// Completion-code table for every failure kind a handler can return.
#[test]
fn completion_code_table() {
    let cases = [
        (Error::Busy, 0xC0u8),
        (Error::Invalid, 0xC1),
        (Error::Timeout, 0xC3),
        (Error::NoMem, 0xC4),
        (Error::Unsupported, 0xFF),
        (Error::NotFound, 0xFF),
    ];
    for (err, ccode) in cases {
        let ctx = BmcCtx::new();
        let bus = MockBus::new();
        ctx.register_bus(bus.clone()).expect("register bus");
        let dev = TestDevice::new("dev", true, Err(err));
        ctx.register_device(dev).expect("register");

        ctx.handle_request(&request(0x18, 9, 0x33, &[]));

        let sent = bus.sent();
        assert_eq!(sent.len(), 1, "{err:?}");
        assert_eq!(sent[0].payload(), &[ccode], "{err:?}");
    }
}

// A synthesised response that cannot be sent is dropped, not retried.
#[test]
fn failed_error_response_is_dropped() {
    let ctx = BmcCtx::new();
    let bus = MockBus::new();
    ctx.register_bus(bus.clone()).expect("register bus");
    bus.fail_next_send(Error::Busy);

    ctx.handle_request(&request(0x18, 1, 0x01, &[]));

    assert_eq!(bus.sent_count(), 0);
}

// Dispatch without any transport still runs handlers; only the error
// response has nowhere to go.
#[test]
fn dispatch_without_bus_reaches_handlers() {
    let ctx = BmcCtx::new();
    let dev = TestDevice::new("dev", true, Ok(()));
    ctx.register_device(dev.clone()).expect("register");

    ctx.handle_request(&request(0x18, 1, 0x01, &[]));
    assert_eq!(dev.handled(), 1);
}

// ========== Fan-out ==========

// Response-open reaches every device in registration order, default last.
#[test]
fn response_open_fans_out_in_order() {
    let ctx = BmcCtx::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = TestDevice::with_log("a", false, &log);
    let b = TestDevice::with_log("b", false, &log);
    let d = TestDevice::with_log("d", true, &log);
    ctx.register_device(a.clone()).expect("register a");
    ctx.register_device(b.clone()).expect("register b");
    ctx.register_default_device(d.clone()).expect("register d");

    ctx.signal_response_open();
    ctx.signal_response_open();

    assert_eq!(a.signals(), 2);
    assert_eq!(b.signals(), 2);
    assert_eq!(d.signals(), 2);
    assert_eq!(
        *log.lock().expect("lock"),
        vec!["a", "b", "d", "a", "b", "d"]
    );
}

// ========== Registration rules ==========

#[test]
fn duplicate_device_registration_fails() {
    let ctx = BmcCtx::new();
    let dev = TestDevice::new("dev", true, Ok(()));
    ctx.register_device(dev.clone()).expect("first register");
    assert_eq!(
        ctx.register_device(dev.clone()),
        Err(Error::AlreadyRegistered)
    );
}

#[test]
fn unregister_unknown_device_fails() {
    let ctx = BmcCtx::new();
    let dev = TestDevice::new("dev", true, Ok(()));
    let as_device: Arc<dyn BmcDevice> = dev;
    assert_eq!(ctx.unregister_device(&as_device), Err(Error::NotFound));
}

#[test]
fn unregistered_device_no_longer_dispatches() {
    let ctx = BmcCtx::new();
    let dev = TestDevice::new("dev", true, Ok(()));
    ctx.register_device(dev.clone()).expect("register");
    let as_device: Arc<dyn BmcDevice> = dev.clone();
    ctx.unregister_device(&as_device).expect("unregister");

    ctx.handle_request(&request(0x18, 1, 0x01, &[]));
    assert_eq!(dev.handled(), 0);
}

#[test]
fn second_default_device_is_busy() {
    let ctx = BmcCtx::new();
    let d1 = TestDevice::new("d1", true, Ok(()));
    let d2 = TestDevice::new("d2", true, Ok(()));
    ctx.register_default_device(d1).expect("first default");
    assert_eq!(ctx.register_default_device(d2), Err(Error::Busy));
}

#[test]
fn unregister_default_checks_identity() {
    let ctx = BmcCtx::new();
    let d1 = TestDevice::new("d1", true, Ok(()));
    let d2 = TestDevice::new("d2", true, Ok(()));
    ctx.register_default_device(d1.clone()).expect("default");

    let wrong: Arc<dyn BmcDevice> = d2;
    assert_eq!(ctx.unregister_default_device(&wrong), Err(Error::NotFound));

    let right: Arc<dyn BmcDevice> = d1;
    ctx.unregister_default_device(&right).expect("unregister");
    assert_eq!(ctx.unregister_default_device(&right), Err(Error::NotFound));
}

#[test]
fn second_bus_is_busy() {
    let ctx = BmcCtx::new();
    let b1 = MockBus::new();
    let b2 = MockBus::new();
    ctx.register_bus(b1).expect("first bus");
    assert_eq!(ctx.register_bus(b2), Err(Error::Busy));
}

#[test]
fn unregister_bus_checks_identity() {
    let ctx = BmcCtx::new();
    let b1 = MockBus::new();
    let b2 = MockBus::new();
    ctx.register_bus(b1.clone()).expect("register");

    let wrong: Arc<dyn ipmi_bmc::BmcBus> = b2;
    assert_eq!(ctx.unregister_bus(&wrong), Err(Error::NotFound));

    let right: Arc<dyn ipmi_bmc::BmcBus> = b1;
    ctx.unregister_bus(&right).expect("unregister");
    assert_eq!(ctx.is_response_open(), false);
}

// ========== Transport slot ==========

#[test]
fn send_without_bus_is_no_device() {
    let ctx = BmcCtx::new();
    let msg = request(0x1C, 1, 0x01, &[0x00]);
    assert_eq!(ctx.send_response(&msg), Err(Error::NoDevice));
    assert!(!ctx.is_response_open());
}

// Between an accepted response and the next response-open signal, the
// transport reports closed and refuses a second response.
#[test]
fn one_response_in_flight() {
    let ctx = BmcCtx::new();
    let bus = MockBus::new();
    ctx.register_bus(bus.clone()).expect("register bus");

    let rsp = request(0x1C, 1, 0x01, &[0x00]);
    assert!(ctx.is_response_open());
    ctx.send_response(&rsp).expect("first send");
    assert!(!ctx.is_response_open());
    assert_eq!(ctx.send_response(&rsp), Err(Error::Busy));

    bus.set_response_open(true);
    ctx.signal_response_open();
    ctx.send_response(&rsp).expect("send after reopen");
    assert_eq!(bus.sent_count(), 2);
}

// ========== Quiescence ==========

// unregister_device must not return while a dispatch is still inside the
// device's handle_request.
#[test]
fn unregister_waits_for_in_flight_dispatch() {
    struct SlowDevice {
        in_call: AtomicBool,
        entered: AtomicBool,
    }
    impl BmcDevice for SlowDevice {
        fn match_request(&self, _request: &BtMsg) -> bool {
            true
        }
        fn handle_request(&self, _request: &BtMsg) -> Result<()> {
            self.in_call.store(true, Ordering::SeqCst);
            self.entered.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(80));
            self.in_call.store(false, Ordering::SeqCst);
            Ok(())
        }
        fn signal_response_open(&self) {}
    }

    let ctx = Arc::new(BmcCtx::new());
    let dev = Arc::new(SlowDevice {
        in_call: AtomicBool::new(false),
        entered: AtomicBool::new(false),
    });
    ctx.register_device(dev.clone()).expect("register");

    let dispatch_ctx = Arc::clone(&ctx);
    let dispatcher = thread::spawn(move || {
        dispatch_ctx.handle_request(&BtMsg::new(0x18, 1, 0x01, &[]).expect("build"));
    });

    // Wait for the dispatch to be inside the handler.
    while !dev.entered.load(Ordering::SeqCst) {
        thread::yield_now();
    }

    let as_device: Arc<dyn BmcDevice> = dev.clone();
    ctx.unregister_device(&as_device).expect("unregister");
    assert!(
        !dev.in_call.load(Ordering::SeqCst),
        "unregister returned while the handler was still running"
    );

    dispatcher.join().expect("dispatcher");
}

// ========== Shutdown ==========

#[test]
fn shutdown_refuses_registration_and_drops_requests() {
    let ctx = BmcCtx::new();
    let bus = MockBus::new();
    ctx.register_bus(bus.clone()).expect("register bus");
    ctx.shutdown();

    let dev = TestDevice::new("late", true, Ok(()));
    assert_eq!(ctx.register_device(dev), Err(Error::Unsupported));

    // Dropped silently: not even an error response goes out.
    ctx.handle_request(&request(0x18, 1, 0x01, &[]));
    assert_eq!(bus.sent_count(), 0);
}
