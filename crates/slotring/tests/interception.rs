//! Receive interception toggled under live traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use slotring::{Adapter, AdapterConfig, CondvarNotifier, LoopbackDatapath};

#[test]
fn toggling_under_traffic_accounts_for_every_frame() {
    let lb = Arc::new(LoopbackDatapath::new("lo1"));
    let config = AdapterConfig::new()
        .buf_size(256)
        .tx_slots(4)
        .rx_slots(64)
        .mit_interval(Duration::from_micros(50))
        .backlog(4096);
    let a = Adapter::attach("lo1", lb.clone(), lb.clone(), Arc::new(CondvarNotifier::new()), config)
        .unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let injectors: Vec<_> = (0..2)
        .map(|_| {
            let lb = Arc::clone(&lb);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut sent = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    lb.inject(0, &[0xabu8; 60]);
                    sent += 1;
                }
                sent
            })
        })
        .collect();

    for _ in 0..50 {
        a.enable_interception().unwrap();
        thread::sleep(Duration::from_micros(200));
        a.disable_interception().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    let sent: u64 = injectors.into_iter().map(|h| h.join().unwrap()).sum();

    let ingress = a.stats().ingress;
    let seen = lb.host_frames() + ingress.captured + ingress.dropped_backlog + ingress.dropped_oversize;
    assert_eq!(seen, sent);
    a.detach().unwrap();
}

#[test]
fn mitigation_coalesces_a_burst() {
    let lb = Arc::new(LoopbackDatapath::new("lo2"));
    let n = Arc::new(CondvarNotifier::new());
    let config = AdapterConfig::new()
        .buf_size(256)
        .tx_slots(4)
        .rx_slots(64)
        .mit_interval(Duration::from_millis(50));
    let a = Adapter::attach("lo2", lb.clone(), lb.clone(), n.clone(), config).unwrap();
    a.enable_interception().unwrap();

    for _ in 0..20 {
        lb.inject(0, b"burst");
    }
    // One immediate notification; the rest wait for the timer.
    assert_eq!(n.count(), 1);
    assert_eq!(n.wait_past(1, Duration::from_secs(5)), 2);

    let m = a.stats().mitigation;
    assert_eq!(m.coalesced, 19);
    assert_eq!(a.rx_sync(0).unwrap(), 20);
}
