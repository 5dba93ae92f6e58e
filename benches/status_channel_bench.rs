/*
Producer-side cost of the cross-core queues as seen by the control core:
publishing into an empty ring, into a saturated ring (evicting the oldest),
and a non-blocking command poll.
*/

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use kiln_control::{
    KilnConfig,
    config::LinkConfig,
    control_core::controller::{Controller, TickInput},
    link::channel::link,
};

fn status_publish_bench(c: &mut Criterion) {
    let mut controller = Controller::new(KilnConfig::default()).unwrap();
    controller.tick(TickInput { now: 0.0, epoch: 0.0, reading: Ok(25.0) });
    let snapshot = controller.snapshot();

    let mut group = c.benchmark_group("status_publish");
    for capacity in [4usize, 100] {
        let (control, supervisor) = link(&LinkConfig { status_capacity: capacity, ..LinkConfig::default() });
        // Pre-fill so every push in the saturated case evicts
        for _ in 0..capacity {
            control.publish(snapshot.clone());
        }
        group.bench_with_input(BenchmarkId::new("saturated", capacity), &capacity, |b, _| {
            b.iter(|| black_box(control.publish(snapshot.clone())))
        });
        group.bench_with_input(BenchmarkId::new("drained", capacity), &capacity, |b, _| {
            b.iter(|| {
                control.publish(snapshot.clone());
                black_box(supervisor.status.try_recv())
            })
        });
    }
    group.finish();
}

fn command_poll_bench(c: &mut Criterion) {
    let (control, _supervisor) = link(&LinkConfig::default());
    c.bench_function("command_poll_empty", |b| b.iter(|| black_box(control.try_recv_command())));
}

criterion_group!(benches, status_publish_bench, command_poll_bench);
criterion_main!(benches);
