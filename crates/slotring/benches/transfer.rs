//! Transfer engine throughput: send then receive one packet per iteration.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use slotring::transfer::{receive, send, SendOptions};
use slotring::{BufferArena, Ring};

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_receive");
    for &len in &[64usize, 1500, 9000] {
        let arena = Arc::new(BufferArena::new(256, 2048).unwrap());
        let (mut prod, mut cons) = Ring::new(256, arena, 0).unwrap();
        let payload = vec![0x42u8; len];
        let mut out = vec![0u8; len];

        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| {
                send(&mut prod, &[&payload[..]][..], SendOptions::default()).unwrap();
                let got = receive(&mut cons, &mut [&mut out[..]][..]).unwrap();
                black_box(got.bytes)
            })
        });
    }
    group.finish();
}

fn bench_scattered_send(c: &mut Criterion) {
    let arena = Arc::new(BufferArena::new(256, 2048).unwrap());
    let (mut prod, mut cons) = Ring::new(256, arena, 0).unwrap();
    let frags: Vec<Vec<u8>> = (0..8).map(|i| vec![i as u8; 200]).collect();
    let mut sink = vec![0u8; 1600];

    c.bench_function("send_8x200_fragments", |b| {
        b.iter(|| {
            send(&mut prod, &frags[..], SendOptions::default()).unwrap();
            while cons.avail() > 0 {
                receive(&mut cons, &mut [&mut sink[..]][..]).unwrap();
            }
        })
    });
}

criterion_group!(benches, bench_round_trip, bench_scattered_send);
criterion_main!(benches);
