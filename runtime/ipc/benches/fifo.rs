use std::hint::black_box;
use std::sync::Arc;

use atlas_hwspinlock::{HwSpinlockBank, SimulatedArbiter};
use atlas_ipc::{FifoConfig, HeapRegion, NoDoorbell, ShmemFifo, VqDispatcher, VqKicker};
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_write_read(c: &mut Criterion) {
    let bank = HwSpinlockBank::new(Arc::new(SimulatedArbiter::new()));
    let config = FifoConfig::default();
    let fifo = ShmemFifo::new(
        HeapRegion::new(config.region_size()),
        bank.request(0).unwrap(),
        &config,
    )
    .unwrap();
    fifo.init().unwrap();

    let mut tx = fifo.writer(NoDoorbell).unwrap();
    let mut rx = fifo.reader().unwrap();
    let payload = [0x5au8; 64];
    let mut buf = [0u8; 64];

    c.bench_function("fifo_write_read_64", |b| {
        b.iter(|| {
            tx.write(black_box(&payload)).unwrap();
            black_box(rx.read(&mut buf).unwrap());
        })
    });
}

fn bench_vq_kick(c: &mut Criterion) {
    let bank = HwSpinlockBank::new(Arc::new(SimulatedArbiter::new()));
    let config = FifoConfig::default();
    let fifo = ShmemFifo::new(
        HeapRegion::new(config.region_size()),
        bank.request(1).unwrap(),
        &config,
    )
    .unwrap();
    fifo.init().unwrap();

    let mut kicker = VqKicker::new(fifo.writer(NoDoorbell).unwrap(), 0);
    let mut dispatcher = VqDispatcher::new(fifo.reader().unwrap());

    c.bench_function("vq_kick_drain", |b| {
        b.iter(|| {
            kicker.kick(black_box(3)).unwrap();
            dispatcher.drain(|vq| {
                black_box(vq);
            })
            .unwrap();
        })
    });
}

criterion_group!(benches, bench_write_read, bench_vq_kick);
criterion_main!(benches);
