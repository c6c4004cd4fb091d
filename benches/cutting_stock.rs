use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use decomp::integer_linear::{
    BranchAndPrice, BranchAndPriceConfig, ColumnGenerationConfig, ColumnGenerationEngine,
    CuttingStockInstance, KnapsackPricer, PatternMatrix, RunContext, SimplexOracle,
};

fn instances() -> Vec<(&'static str, CuttingStockInstance)> {
    vec![
        (
            "w115",
            CuttingStockInstance::new(115, vec![25, 40, 50, 55, 70], vec![50, 136, 114, 80, 89])
                .unwrap(),
        ),
        (
            "w100",
            CuttingStockInstance::new(100, vec![45, 36, 31, 14], vec![97, 610, 395, 211]).unwrap(),
        ),
    ]
}

fn bench_column_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("column_generation");
    for (name, instance) in instances() {
        for pool_size in [1, 4] {
            group.bench_with_input(
                BenchmarkId::new(name, pool_size),
                &instance,
                |b, instance| {
                    b.iter(|| {
                        let mut engine = ColumnGenerationEngine::new(
                            SimplexOracle::default(),
                            KnapsackPricer::default(),
                            ColumnGenerationConfig {
                                pool_size,
                                ..ColumnGenerationConfig::default()
                            },
                        );
                        let mut patterns = PatternMatrix::initial(instance).unwrap();
                        let outcome = engine
                            .solve(
                                instance,
                                &instance.demands,
                                &mut patterns,
                                &[],
                                &mut RunContext::new(),
                            )
                            .unwrap();
                        black_box(outcome.objective)
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_branch_and_price(c: &mut Criterion) {
    let mut group = c.benchmark_group("branch_and_price");
    group.sample_size(10);
    for (name, instance) in instances() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &instance, |b, instance| {
            b.iter(|| {
                let mut bp = BranchAndPrice::new(
                    instance.clone(),
                    SimplexOracle::default(),
                    KnapsackPricer::default(),
                    BranchAndPriceConfig {
                        node_limit: Some(50),
                        ..BranchAndPriceConfig::default()
                    },
                )
                .unwrap();
                let report = bp.solve(&mut RunContext::new()).unwrap();
                black_box(report.incumbent.map(|p| p.rolls))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_column_generation, bench_branch_and_price);
criterion_main!(benches);
