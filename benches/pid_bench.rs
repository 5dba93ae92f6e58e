use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use kiln_control::control_core::{
    gain_scheduler::{GainRange, GainScheduleConfig, GainScheduler, Gains},
    pid::Pid,
};

fn pid_update_bench(c: &mut Criterion) {
    let mut pid = Pid::new(Gains::new(6.11, 0.0132, 29.5));
    let mut measured = 25.0;

    c.bench_function("pid_update", |b| {
        b.iter(|| {
            measured += 0.01;
            if measured > 1_000.0 {
                measured = 25.0;
                pid.reset();
            }
            black_box(pid.update(black_box(600.0), measured, 1.0));
        })
    });
}

// Gain lookup runs every tick before the PID update
fn gain_schedule_bench(c: &mut Criterion) {
    let base = Gains::new(6.11, 0.0132, 29.5);
    let continuous = GainScheduler::from_config(&GainScheduleConfig::default(), base).unwrap();
    let table = GainScheduler::from_config(
        &GainScheduleConfig::RangeTable {
            ranges: (0..5)
                .map(|i| GainRange {
                    temp_min: i as f64 * 260.0,
                    temp_max: (i + 1) as f64 * 260.0,
                    kp: 5.0 + i as f64,
                    ki: 0.01,
                    kd: 30.0,
                })
                .collect(),
        },
        base,
    )
    .unwrap();

    let mut group = c.benchmark_group("gain_schedule");
    for (name, scheduler) in [("continuous", &continuous), ("range_table", &table)] {
        group.bench_with_input(BenchmarkId::new(name, "1100C"), scheduler, |b, s| {
            b.iter(|| black_box(s.gains_for(black_box(1_100.0))))
        });
    }
    group.finish();
}

criterion_group!(benches, pid_update_bench, gain_schedule_bench);
criterion_main!(benches);
