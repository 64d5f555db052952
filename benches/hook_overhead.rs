// Benchmark for the cost of the timing hook around a wrapped call
// Compares untimed dispatch, timed dispatch with profiling on, and off

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use sabridge::{Instrumentation, NdarrayView, ProfilerConfig, StaticGrid1d, Value};
use std::sync::Arc;

const GRID_SIZE: usize = 1024;

fn bench_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill");

    let instr = Arc::new(Instrumentation::new(ProfilerConfig::default()));
    let wrapper = StaticGrid1d::wrapper(Arc::clone(&instr));
    let mut grid = StaticGrid1d::new(GRID_SIZE).expect("grid allocation");

    group.bench_function("untimed", |b| {
        b.iter(|| wrapper.call("fill", &mut grid, black_box(Value::Float(1.0))))
    });

    group.bench_function("timed_enabled", |b| {
        b.iter(|| wrapper.call("fill_timed", &mut grid, black_box(Value::Float(2.0))))
    });

    instr.switch().disable();
    group.bench_function("timed_disabled", |b| {
        b.iter(|| wrapper.call("fill_timed", &mut grid, black_box(Value::Float(3.0))))
    });

    group.finish();
    println!("{}", instr.registry().report());
}

fn bench_bridge(c: &mut Criterion) {
    let grid = StaticGrid1d::new(GRID_SIZE).expect("grid allocation");
    let wrapper = StaticGrid1d::wrapper(Arc::new(Instrumentation::default()));

    c.bench_function("coord_get", |b| {
        b.iter(|| wrapper.get_property("coord", black_box(&grid)))
    });

    // Fresh host memory each round; reassigning a view of the grid's own
    // buffer would chain every old buffer behind the new one
    c.bench_function("coord_set", |b| {
        b.iter_batched(
            || NdarrayView::from_vec(vec![0.0f64; GRID_SIZE], &[GRID_SIZE]).expect("view"),
            |view| wrapper.set_property("coord", &grid, &view),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_fill, bench_bridge);
criterion_main!(benches);
