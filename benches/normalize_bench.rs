use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use kernel_filter_exchange::algs::normalization::{
    MatrixNormalizationAgent, NormalizationConfig, NormalizationStrategy, ReproductionLevel,
};
use kernel_filter_exchange::data::point_cloud::PointCloud;
use kernel_filter_exchange::data::sparse::{KernelBlocks, RowBlockMatrix};

// Jittered n×n×n lattice with a hat kernel of the given radius.
fn jittered_kernel(n: usize, radius: f64, seed: u64) -> (PointCloud, KernelBlocks) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut coords = Vec::with_capacity(n * n * n);
    for k in 0..n {
        for j in 0..n {
            for i in 0..n {
                coords.push([
                    i as f64 + rng.gen_range(-0.2..0.2),
                    j as f64 + rng.gen_range(-0.2..0.2),
                    k as f64 + rng.gen_range(-0.2..0.2),
                ]);
            }
        }
    }
    let mut triplets = Vec::new();
    for (a, p) in coords.iter().enumerate() {
        for (b, q) in coords.iter().enumerate() {
            let d = ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2)).sqrt();
            if d < radius {
                triplets.push((a, b, radius - d));
            }
        }
    }
    let m = coords.len();
    let local = RowBlockMatrix::from_triplets(m, m, triplets).unwrap();
    (PointCloud::new(coords), KernelBlocks::new(local))
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    let (points, kernel) = jittered_kernel(10, 2.1, 42);
    let nonlocal = std::collections::BTreeMap::new();

    for strategy in [
        NormalizationStrategy::ClassicalRowSum,
        NormalizationStrategy::CorrectionFunction,
        NormalizationStrategy::MinimalChange,
    ] {
        for reproduction in [ReproductionLevel::Linear, ReproductionLevel::Quadratic] {
            let agent = MatrixNormalizationAgent::new(NormalizationConfig {
                strategy,
                reproduction,
                ..NormalizationConfig::default()
            });
            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), format!("{reproduction:?}")),
                &agent,
                |b, agent| {
                    b.iter(|| {
                        let mut k = kernel.clone();
                        let _ = agent.normalize_local(&points, &nonlocal, &mut k).unwrap();
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_normalize);
criterion_main!(benches);
