use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mdo::multi_objective::{crowding_distance, non_dominated_sort};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

fn random_objectives(n: usize, m: usize) -> Array2<f64> {
    let mut rng = ChaCha20Rng::seed_from_u64(42);
    Array2::from_shape_fn((n, m), |_| rng.gen::<f64>())
}

fn bench_non_dominated_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("non_dominated_sort");
    for &n in &[100, 500, 1000] {
        let objectives = random_objectives(n, 2);
        group.bench_with_input(BenchmarkId::new("two_objectives", n), &objectives, |b, obj| {
            b.iter(|| non_dominated_sort(black_box(obj.view())))
        });
        let objectives = random_objectives(n, 3);
        group.bench_with_input(BenchmarkId::new("three_objectives", n), &objectives, |b, obj| {
            b.iter(|| non_dominated_sort(black_box(obj.view())))
        });
    }
    group.finish();
}

fn bench_crowding_distance(c: &mut Criterion) {
    let objectives = random_objectives(1000, 3);
    let fronts = non_dominated_sort(objectives.view());
    c.bench_function("crowding_distance_all_fronts", |b| {
        b.iter(|| {
            for front in &fronts {
                black_box(crowding_distance(objectives.view(), front));
            }
        })
    });
}

criterion_group!(benches, bench_non_dominated_sort, bench_crowding_distance);
criterion_main!(benches);
