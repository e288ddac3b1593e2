//! slotring End-to-End Smoke Test
//!
//! Exercises the full stack over an in-process loopback datapath:
//!   Part A — Ring + transfer engine: chained slots, all-or-nothing send
//!   Part B — Socket front end: send → tx sync → loopback → capture → receive
//!   Part C — Mitigation: burst coalescing on the eventfd notifier
//!   Part D — Device front end: direct slot fill, sync ioctls, map offsets
//!   Part E — Detach: steering restored, handles unavailable
//!
//! Run: ./target/release/slotring-smoke
//! (SLR_LOG_LEVEL=info for adapter logs)

use std::sync::Arc;
use std::time::{Duration, Instant};

use slotring::transfer::{self, SendOptions};
use slotring::{
    Adapter, AdapterConfig, BufferArena, DeviceCmd, DeviceReply, EventFdNotifier,
    LoopbackDatapath, Readiness, Ring, RingDevice, RingSocket,
};
use slotring_core::error::RingError;
use slotring_core::slot::{FlagsPatch, SlotFlags};

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

/// Wait for the eventfd to become readable, then drain it.
fn wait_eventfd(n: &EventFdNotifier, timeout: Duration) -> u64 {
    let mut pfd = libc::pollfd { fd: n.fd(), events: libc::POLLIN, revents: 0 };
    let ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
    if ret <= 0 {
        return 0;
    }
    n.drain().unwrap_or(0)
}

fn attach(
    name: &str,
    interval: Duration,
) -> Result<(Arc<Adapter>, Arc<LoopbackDatapath>, Arc<EventFdNotifier>), RingError> {
    let lb = Arc::new(LoopbackDatapath::new(name));
    let n = Arc::new(EventFdNotifier::create()?);
    let config = AdapterConfig::from_env()
        .tx_slots(8)
        .rx_slots(32)
        .mit_interval(interval);
    let a = Adapter::attach(name, lb.clone(), lb.clone(), n.clone(), config)?;
    Ok((a, lb, n))
}

// ════════════════════════════════════════════════════════════
// Part A: Ring + transfer engine
// ════════════════════════════════════════════════════════════

fn test_ring(t: &mut TestRunner) {
    t.section("Part A: Ring + transfer engine");

    let arena = match BufferArena::new(4, 2048) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            t.fail("mmap buffer arena", &e.to_string());
            return;
        }
    };
    t.pass("mmap buffer arena");

    let (mut prod, mut cons) = match Ring::new(4, arena, 0) {
        Ok(pair) => pair,
        Err(e) => {
            t.fail("create ring", &e.to_string());
            return;
        }
    };

    // A1: 5000 bytes over 2048-byte slots takes 3 of 4
    let data: Vec<u8> = (0..5000u32).map(|i| (i * 31) as u8).collect();
    let sent = transfer::send(&mut prod, &[&data[..]][..], SendOptions::default());
    t.check(
        "send 5000 B → 3 slots",
        sent == Ok(5000) && prod.avail() == 1,
        &format!("{:?}, avail {}", sent, prod.avail()),
    );

    // A2: chain flags
    let flags: Vec<SlotFlags> = (0..3).filter_map(|i| cons.slot_at(i).map(|s| s.flags())).collect();
    t.check(
        "MOREFRAG chain, HEADER_PRESENT first",
        flags.len() == 3
            && flags[0].contains(SlotFlags::MOREFRAG | SlotFlags::HEADER_PRESENT)
            && flags[1] == SlotFlags::MOREFRAG
            && !flags[2].contains(SlotFlags::MOREFRAG),
        &format!("{:?}", flags),
    );

    // A3: over-capacity send is rejected whole
    let r = transfer::send(&mut prod, &[&data[..]][..], SendOptions::default());
    t.check(
        "insufficient slots rejected",
        r == Err(RingError::InsufficientSlots { needed: 3, avail: 1 }) && prod.avail() == 1,
        &format!("{:?}", r),
    );

    // A4: receive into a short buffer, then resume
    let mut first = vec![0u8; 3000];
    let mut rest = vec![0u8; 3000];
    let a = transfer::receive(&mut cons, &mut [&mut first[..]][..]);
    let b = transfer::receive(&mut cons, &mut [&mut rest[..]][..]);
    let ok = matches!((&a, &b), (Ok(x), Ok(y)) if x.more && x.header && y.bytes == 2000 && !y.more)
        && first[..] == data[..3000]
        && rest[..2000] == data[3000..];
    t.check("short receive resumes mid-slot", ok, &format!("{:?} / {:?}", a, b));
    t.check("all slots returned", prod.avail() == 4, &format!("avail {}", prod.avail()));
}

// ════════════════════════════════════════════════════════════
// Part B: Socket front end
// ════════════════════════════════════════════════════════════

fn test_socket(t: &mut TestRunner) {
    t.section("Part B: Socket front end (loopback)");

    let (adapter, _lb, n) = match attach("smoke-b", Duration::from_micros(100)) {
        Ok(x) => { t.pass("attach adapter"); x }
        Err(e) => { t.fail("attach adapter", &e.to_string()); return; }
    };

    let r = adapter.enable_interception();
    t.check("enable interception", r.is_ok(), &format!("{:?}", r));

    let sock = match RingSocket::bind(&adapter) {
        Ok(s) => s,
        Err(e) => { t.fail("bind socket", &e.to_string()); return; }
    };
    t.check(
        "second socket is Busy",
        matches!(RingSocket::bind(&adapter), Err(RingError::Busy)),
        "bind succeeded",
    );

    let msg = b"hello through the ring";
    let r = sock.send(&[&msg[..]][..]);
    t.check("send", r == Ok(msg.len()), &format!("{:?}", r));
    t.check("eventfd wakeup", wait_eventfd(&n, Duration::from_secs(2)) >= 1, "no wakeup");

    let mut buf = [0u8; 64];
    let got = sock.receive(&mut [&mut buf[..]][..]);
    t.check(
        "receive loops back, HEADER_PRESENT first",
        matches!(&got, Ok(g) if g.bytes == msg.len() && g.header) && &buf[..msg.len()] == msg,
        &format!("{:?}", got),
    );

    let s = adapter.stats();
    t.check(
        "stats: 1 sent, 1 captured, 1 delivered",
        s.egress.sent == 1 && s.ingress.captured == 1 && s.ingress.delivered == 1,
        &format!("{:?}", s),
    );
    let _ = adapter.detach();
}

// ════════════════════════════════════════════════════════════
// Part C: Mitigation
// ════════════════════════════════════════════════════════════

fn test_mitigation(t: &mut TestRunner) {
    t.section("Part C: Mitigation (20 ms interval)");

    let (adapter, lb, n) = match attach("smoke-c", Duration::from_millis(20)) {
        Ok(x) => x,
        Err(e) => { t.fail("attach adapter", &e.to_string()); return; }
    };
    let _ = adapter.enable_interception();

    let start = Instant::now();
    for _ in 0..16 {
        lb.inject(0, b"burst frame");
    }
    let first = n.drain().unwrap_or(0);
    t.check("one immediate notification", first == 1, &format!("got {}", first));

    let second = wait_eventfd(&n, Duration::from_secs(2));
    let waited = start.elapsed();
    t.check(
        "one more on expiry",
        second == 1 && waited >= Duration::from_millis(20),
        &format!("got {} after {:?}", second, waited),
    );

    let m = adapter.stats().mitigation;
    t.check("15 arrivals coalesced", m.coalesced == 15, &format!("{:?}", m));

    std::thread::sleep(Duration::from_millis(60));
    let late = n.drain().unwrap_or(0);
    t.check("timer goes idle", late == 0, &format!("{} late notifications", late));

    let r = adapter.detach();
    t.check("detach cancels timer", r.is_ok(), &format!("{:?}", r));
}

// ════════════════════════════════════════════════════════════
// Part D: Device front end
// ════════════════════════════════════════════════════════════

fn test_device(t: &mut TestRunner) {
    t.section("Part D: Device front end");

    let (adapter, lb, _n) = match attach("smoke-d", Duration::ZERO) {
        Ok(x) => x,
        Err(e) => { t.fail("attach adapter", &e.to_string()); return; }
    };

    let mut dev = RingDevice::open();
    t.check(
        "ioctl before register → NotBound",
        dev.ioctl(DeviceCmd::GetInfo) == Err(RingError::NotBound),
        "bound?",
    );
    let r = dev.register(&adapter);
    t.check("register", r.is_ok(), &format!("{:?}", r));

    match dev.ioctl(DeviceCmd::GetInfo) {
        Ok(DeviceReply::Info(info)) => {
            println!("       {:?}", info);
            let end = dev.map_offset(info.map_len).ok().flatten();
            let base = dev.map_offset(0).ok().flatten();
            t.check("map_offset bounds", base.is_some() && end.is_none(), "bad translation");
        }
        other => t.fail("GET_INFO", &format!("{:?}", other)),
    }

    t.check("poll: writable", dev.poll().contains(Readiness::WRITABLE), "not writable");

    let filled = dev.with_tx_ring(0, |p| -> Result<u32, RingError> {
        let res = p.reserve(1)?;
        if let Some(mut s) = p.slot_at(res.index(0)) {
            s.buf_mut()[..4].copy_from_slice(b"ping");
            s.set_len(4);
        }
        p.commit(res, 1, FlagsPatch::NONE)
    });
    t.check("direct slot fill", matches!(filled, Ok(Ok(1))), &format!("{:?}", filled));

    let r = dev.ioctl(DeviceCmd::TxSync);
    t.check(
        "TX_SYNC transmits",
        matches!(&r, Ok(DeviceReply::Tx(rep)) if rep.sent == 1) && lb.host_frames() == 1,
        &format!("{:?}", r),
    );
    let _ = adapter.detach();
}

// ════════════════════════════════════════════════════════════
// Part E: Detach
// ════════════════════════════════════════════════════════════

fn test_detach(t: &mut TestRunner) {
    t.section("Part E: Detach");

    let (adapter, lb, _n) = match attach("smoke-e", Duration::from_micros(100)) {
        Ok(x) => x,
        Err(e) => { t.fail("attach adapter", &e.to_string()); return; }
    };
    let _ = adapter.enable_interception();
    let sock = RingSocket::bind(&adapter);

    let r = adapter.detach();
    t.check("detach", r.is_ok(), &format!("{:?}", r));

    lb.inject(0, b"to host");
    t.check("steering restored", lb.host_frames() == 1, "frame captured after detach");

    if let Ok(sock) = sock {
        let r = sock.send(&[&b"x"[..]][..]);
        t.check("socket → AdapterUnavailable", r == Err(RingError::AdapterUnavailable), &format!("{:?}", r));
    }
}

fn main() {
    println!("=== slotring End-to-End Smoke Test ===");

    let mut t = TestRunner::new();

    test_ring(&mut t);
    test_socket(&mut t);
    test_mitigation(&mut t);
    test_device(&mut t);
    test_detach(&mut t);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
