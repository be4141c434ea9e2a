//! Benchmarks for plan compilation and step generation.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};
use shipwright::core::args::extract_arguments;
use shipwright::core::codegen::stage_script;
use shipwright::core::compiler::compile;
use shipwright::core::resolver::MemoryResolver;
use shipwright::core::types::ExecutionPlan;

/// Template with `scripts` application scripts sharing `files` auxiliary files.
fn template(scripts: usize, files: usize) -> (Value, MemoryResolver) {
    let mut resolver = MemoryResolver::new();
    let shared: Vec<String> = (0..files).map(|i| format!("lib{i}.sh")).collect();
    for name in &shared {
        resolver.insert(format!("scripts/{name}"), "f() { :; }\n".repeat(32));
    }

    let mut table = Map::new();
    for i in 0..scripts {
        let entry = format!("deploy{i}.sh");
        resolver.insert(format!("scripts/{entry}"), format!("#!/bin/sh\necho {i}\n"));
        table.insert(
            format!("deploy{i}"),
            json!({"Type": "Application", "EntryPoint": entry, "Files": shared}),
        );
    }

    let template = json!({
        "FormatVersion": "2.0.0",
        "Body": "return deploy(args.host, args.port).stdout",
        "Parameters": {"host": "db.internal", "port": 5432},
        "Scripts": table,
    });
    (template, resolver)
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for scripts in [1, 10, 100] {
        let (template, resolver) = template(scripts, 8);
        group.bench_with_input(BenchmarkId::from_parameter(scripts), &template, |b, t| {
            b.iter(|| black_box(compile(black_box(t), &resolver).unwrap()));
        });
    }
    group.finish();
}

fn bench_extract_arguments(c: &mut Criterion) {
    let params = (0..32)
        .map(|i| (format!("p{i}"), json!(i)))
        .collect::<indexmap::IndexMap<String, Value>>();
    let body = (0..32)
        .map(|i| format!("args.p{i}"))
        .collect::<Vec<_>>()
        .join(", ");

    c.bench_function("extract_arguments_32", |b| {
        b.iter(|| black_box(extract_arguments(black_box(&body), &params).unwrap()));
    });
}

fn bench_stage_script(c: &mut Criterion) {
    let (template, resolver) = template(1, 32);
    let ExecutionPlan::Structured(plan) = compile(&template, &resolver).unwrap() else {
        unreachable!("structured template");
    };
    let script = plan.scripts.get("deploy0").unwrap();
    let args = vec!["db.internal".to_string(), "5432".to_string()];

    c.bench_function("stage_script_32_files", |b| {
        b.iter(|| black_box(stage_script(&plan, script, &args, "/tmp").unwrap()));
    });
}

criterion_group!(
    benches,
    bench_compile,
    bench_extract_arguments,
    bench_stage_script
);
criterion_main!(benches);
