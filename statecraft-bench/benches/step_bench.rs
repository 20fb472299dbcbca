//! Stepping engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use statecraft_core::{ChartDefinition, Event, StateMachine};

fn build(definition: serde_json::Value) -> StateMachine {
    let chart: ChartDefinition = serde_json::from_value(definition).unwrap();
    chart.build().unwrap()
}

fn toggle_chart() -> serde_json::Value {
    json!({
        "name": "toggle",
        "initial": "a",
        "states": [
            {"name": "a", "transitions": [{"event": "GO", "target": "b"}]},
            {"name": "b", "transitions": [{"event": "GO", "target": "a"}]}
        ]
    })
}

/// `width` parallel regions, each a three-state ring driven by TICK, with
/// a deep history so BACK restores every region.
fn parallel_chart(width: usize) -> serde_json::Value {
    let mut regions: Vec<_> = (0..width)
        .map(|r| {
            let states: Vec<_> = (0..3)
                .map(|i| {
                    json!({
                        "name": format!("r{}_s{}", r, i),
                        "transitions": [{"event": "TICK", "target": format!("r{}_s{}", r, (i + 1) % 3)}]
                    })
                })
                .collect();
            json!({"name": format!("r{}", r), "initial": format!("r{}_s0", r), "states": states})
        })
        .collect();
    regions.push(json!({"name": "grid_hist", "history": "deep", "default": "r0"}));
    json!({
        "name": "regions",
        "initial": "grid",
        "states": [
            {"name": "grid", "parallel": true, "states": regions,
             "transitions": [{"event": "LEAVE", "target": "outside"}]},
            {"name": "outside", "transitions": [{"event": "BACK", "target": "grid_hist"}]}
        ]
    })
}

fn bench_build_chart(c: &mut Criterion) {
    let mut group = c.benchmark_group("chart_build");

    group.bench_function("simple", |b| {
        let chart: ChartDefinition = serde_json::from_value(toggle_chart()).unwrap();
        b.iter(|| black_box(chart.build().unwrap()));
    });

    // Chain of 20 states
    let chain = json!({
        "name": "chain",
        "initial": "state_0",
        "states": (0..20).map(|i| json!({
            "name": format!("state_{}", i),
            "transitions": [{"event": format!("NEXT_{}", i), "target": format!("state_{}", (i + 1) % 20)}]
        })).collect::<Vec<_>>()
    });
    group.bench_function("complex", |b| {
        let chart: ChartDefinition = serde_json::from_value(chain.clone()).unwrap();
        b.iter(|| black_box(chart.build().unwrap()));
    });

    group.bench_function("parse_yaml", |b| {
        let yaml = serde_json::from_value::<ChartDefinition>(parallel_chart(4))
            .unwrap()
            .to_yaml()
            .unwrap();
        b.iter(|| black_box(ChartDefinition::from_yaml(&yaml).unwrap()));
    });

    group.finish();
}

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_step");
    group.throughput(Throughput::Elements(1));

    group.bench_function("toggle", |b| {
        let mut m = build(toggle_chart());
        m.start().unwrap();
        b.iter(|| {
            m.post_event(Event::new("GO")).unwrap();
            black_box(m.step().unwrap())
        });
    });

    group.bench_function("decayed", |b| {
        let mut m = build(toggle_chart());
        m.start().unwrap();
        b.iter(|| {
            m.post_event(Event::new("NOTHING")).unwrap();
            black_box(m.step().unwrap())
        });
    });

    group.finish();
}

fn bench_drain_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_throughput");
    group.sample_size(20);

    for batch_size in [100, 1000] {
        let mut m = build(toggle_chart());
        m.start().unwrap();

        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("events", batch_size),
            &batch_size,
            |b, &size| {
                b.iter(|| {
                    for _ in 0..size {
                        m.post_event(Event::new("GO")).unwrap();
                    }
                    black_box(m.process_events().unwrap())
                });
            },
        );
    }

    group.finish();
}

fn bench_parallel_regions(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_parallel");

    for width in [2, 8, 32] {
        let mut m = build(parallel_chart(width));
        m.start().unwrap();

        group.bench_with_input(BenchmarkId::new("tick", width), &width, |b, _| {
            b.iter(|| {
                m.post_event(Event::new("TICK")).unwrap();
                black_box(m.step().unwrap())
            });
        });

        group.bench_with_input(BenchmarkId::new("leave_and_restore", width), &width, |b, _| {
            b.iter(|| {
                m.post_event(Event::new("LEAVE")).unwrap();
                m.post_event(Event::new("BACK")).unwrap();
                black_box(m.process_events().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_guard_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_guard");

    let mut m = build(json!({
        "name": "approval",
        "initial": "pending",
        "states": [
            {"name": "pending", "transitions": [
                {"event": "APPROVE", "target": "approved", "guard": "event.amount <= 1000"},
                {"event": "APPROVE", "target": "review"}
            ]},
            {"name": "approved", "transitions": [{"event": "RESET", "target": "pending"}]},
            {"name": "review", "transitions": [{"event": "RESET", "target": "pending"}]}
        ]
    }));
    m.start().unwrap();

    for amount in [500, 5000] {
        group.bench_with_input(BenchmarkId::new("amount", amount), &amount, |b, &amount| {
            b.iter(|| {
                m.post_event(Event::new("APPROVE").with_payload(json!({"amount": amount})))
                    .unwrap();
                m.post_event(Event::new("RESET")).unwrap();
                black_box(m.process_events().unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_build_chart,
    bench_step,
    bench_drain_throughput,
    bench_parallel_regions,
    bench_guard_evaluation,
);

criterion_main!(benches);
