#![allow(unused)]
extern crate stackgen;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use stackgen::prelude::*;
use std::hint::black_box;

/// `SUM(p0, .., pn) = p0 + p1 + .. + pn`, one block with a long expression tree.
fn expression_chain(params: usize) -> Module {
    let names: Vec<String> = (0..params).map(|i| format!("p{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let mut mb = ModuleBuilder::new();
    mb.function("SUM", &refs, |f| {
        let args: Vec<ValueId> = (0..params).map(|i| f.arg(i)).collect();
        f.block(0, |b| {
            let mut acc = args[0];
            for &arg in &args[1..] {
                acc = b.binary(BinaryOp::Add, acc, arg);
            }
            b.ret_val(acc);
        });
    })
    .expect("Failed to build SUM");
    mb.finish()
}

/// A sequence of diamonds, each joining two versions of `x` through a phi.
fn diamonds(count: usize) -> Module {
    let mut mb = ModuleBuilder::new();
    mb.function("DIAMONDS", &["c"], |f| {
        let c = f.arg(0);
        let xs: Vec<ValueId> = (0..=count).map(|_| f.var("x")).collect();
        let arms: Vec<(ValueId, ValueId)> = (0..count).map(|_| (f.temp(), f.temp())).collect();

        for k in 0..count {
            let head = 3 * k;
            f.block(head, |b| {
                b.at(k as u32 + 1, 1);
                if k == 0 {
                    b.constant_to(xs[0], Constant::Integer(1));
                } else {
                    let (a, m) = arms[k - 1];
                    b.phi(xs[k], &[(head - 2, a), (head - 1, m)]);
                }
                b.branch(c, head + 1, head + 2);
            });
            f.block(head + 1, |b| {
                let one = b.constant(Constant::Integer(1));
                b.binary_to(arms[k].0, BinaryOp::Add, xs[k], one);
                b.jump(head + 3);
            });
            f.block(head + 2, |b| {
                let two = b.constant(Constant::Integer(2));
                b.binary_to(arms[k].1, BinaryOp::Mul, xs[k], two);
                b.jump(head + 3);
            });
        }
        f.block(3 * count, |b| {
            let (a, m) = arms[count - 1];
            b.phi(xs[count], &[(3 * count - 2, a), (3 * count - 1, m)]);
            b.ret_val(xs[count]);
        });
    })
    .expect("Failed to build DIAMONDS");
    mb.finish()
}

fn bench_expression_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression_chain");
    for params in [8, 64, 256] {
        group.throughput(Throughput::Elements(params as u64));
        group.bench_with_input(BenchmarkId::from_parameter(params), &params, |b, &n| {
            let mut compiler = ModuleCompiler::new();
            b.iter_batched(
                || expression_chain(n),
                |mut module| black_box(compiler.compile(&mut module).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_diamonds(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamonds");
    for count in [4, 32, 128] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            let mut compiler = ModuleCompiler::new();
            b.iter_batched(
                || diamonds(n),
                |mut module| black_box(compiler.compile(&mut module).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_liveness(c: &mut Criterion) {
    let module = diamonds(128);
    c.bench_function("liveness_diamonds_128", |b| {
        let mut analyzer = LivenessAnalyzer::new();
        b.iter(|| black_box(analyzer.execute(black_box(&module))));
    });
}

criterion_group!(
    benches,
    bench_expression_chain,
    bench_diamonds,
    bench_liveness
);
criterion_main!(benches);
