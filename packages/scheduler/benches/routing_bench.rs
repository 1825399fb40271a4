// packages/scheduler/benches/routing_bench.rs
//! Routing benchmarks
//!
//! Measures `route_task` + terminal update over growing agent pools, and a
//! full `execute_task` round trip through the engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sentra_lab_scheduler::scheduler::{AgentDescriptor, Task, TaskRouter, TaskStatus};
use sentra_lab_scheduler::{job, Engine, EngineConfig};
use serde_json::json;
use tokio::runtime::Runtime;

fn router_with_agents(count: usize) -> TaskRouter {
    let router = TaskRouter::default();
    let capabilities = ["code_generation", "data_analysis", "text_generation"];
    for i in 0..count {
        router
            .register_agent(AgentDescriptor::new(format!("agent-{:05}", i), [capabilities[i % 3]]))
            .unwrap();
    }
    router
}

fn bench_route_task(c: &mut Criterion) {
    let mut group = c.benchmark_group("route_task");

    for agents in [8usize, 64, 512, 4096] {
        let router = router_with_agents(agents);
        let mut next = 0u64;

        group.throughput(Throughput::Elements(agents as u64));
        group.bench_with_input(BenchmarkId::from_parameter(agents), &agents, |b, _| {
            b.iter(|| {
                next += 1;
                let id = format!("t{}", next);
                let winner = router.route_task(Task::new(id.as_str(), "coding")).unwrap();
                router.update_task_status(&id, TaskStatus::Completed, Some(json!({ "work_units": 1 })));
                black_box(winner)
            })
        });
    }

    group.finish();
}

fn bench_score_agents(c: &mut Criterion) {
    let router = router_with_agents(512);
    let task = Task::new("probe", "analysis");

    c.bench_function("score_agents_512", |b| b.iter(|| black_box(router.score_agents(&task))));
}

fn bench_execute_task(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = Engine::new(EngineConfig::default()).unwrap();
    for i in 0..8 {
        engine
            .register_agent(AgentDescriptor::new(format!("w{}", i), ["code_generation"]))
            .unwrap();
    }
    let echo = job(|_, input, _| async move { Ok(input) });
    let mut next = 0u64;

    c.bench_function("execute_task_echo", |b| {
        b.iter(|| {
            next += 1;
            let task = Task::new(format!("t{}", next), "coding").with_input(json!(next));
            black_box(rt.block_on(engine.execute_task(task, echo.clone())).unwrap())
        })
    });
}

criterion_group!(routing, bench_route_task, bench_score_agents);
criterion_group!(pipeline, bench_execute_task);
criterion_main!(routing, pipeline);
