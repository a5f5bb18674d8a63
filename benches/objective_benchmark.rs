use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zoib::data::ZoibData;
use zoib::gradient::value_and_gradient;
use zoib::matrix::DesignMatrix;
use zoib::objective::ZoibObjective;
use zoib::priors::PriorConfig;

const NUM_COVARIATES: usize = 4;
const NUM_GROUPS: usize = 20;

fn random_data(n: usize) -> ZoibData {
    let mut rng = StdRng::seed_from_u64(0x5EED_0000 + n as u64);
    let y: Array1<f64> = (0..n)
        .map(|_| match rng.gen_range(0..20) {
            0 => 0.0,
            1 => 1.0,
            _ => rng.gen_range(0.01..0.99),
        })
        .collect();
    let x = Array2::from_shape_fn((n, NUM_COVARIATES), |(_, j)| {
        if j == 0 { 1.0 } else { rng.gen_range(-1.0..1.0) }
    });
    let groups: Vec<usize> = (0..n).map(|i| i % NUM_GROUPS).collect();
    let iid = DesignMatrix::incidence(&groups, NUM_GROUPS).expect("incidence matrix");
    ZoibData::new(y, x, iid, false).expect("valid data")
}

fn benchmark_objective(c: &mut Criterion) {
    let sizes = [1_000_usize, 10_000, 100_000];
    let priors = PriorConfig::default();
    let datasets: Vec<_> = sizes.iter().map(|&n| (n, random_data(n))).collect();

    let mut group = c.benchmark_group("zoib_objective");
    for (n, data) in &datasets {
        group.throughput(Throughput::Elements(*n as u64));
        let objective = ZoibObjective::new(data, &priors);
        let theta = Array1::from_elem(objective.layout().len(), 0.1);

        group.bench_with_input(BenchmarkId::new("cost", n), &theta, |b, theta| {
            b.iter(|| black_box(objective.cost(black_box(theta)).expect("cost")));
        });

        group.bench_with_input(BenchmarkId::new("value_and_gradient", n), &theta, |b, theta| {
            b.iter(|| black_box(value_and_gradient(&objective, black_box(theta)).expect("gradient")));
        });
    }
    group.finish();
}

criterion_group!(objective, benchmark_objective);
criterion_main!(objective);
