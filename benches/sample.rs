use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tempered_mh::{
    replicate_rng, sample_replicate, AdaptOptions, Chain, Configuration, FnDensity,
    ParameterSpace, ParameterSpec, ProposalTuner, RungSpec, TransformType,
};

fn normal_loglike(theta: &[f64], _x: &[f64]) -> f64 {
    theta.iter().map(|val| -0.5 * (val - 3.) * (val - 3.)).sum()
}

fn flat_prior(_theta: &[f64]) -> f64 {
    0.
}

fn parameters(dim: usize) -> Vec<ParameterSpec> {
    vec![
        ParameterSpec {
            init: 0.,
            min: -100.,
            max: 100.,
            transform: TransformType::Identity,
        };
        dim
    ]
}

fn make_config(dim: usize, rungs: usize, samples: u64) -> Configuration {
    Configuration::new(
        vec![],
        parameters(dim),
        vec![200, 200],
        samples,
        vec![RungSpec::default(); rungs],
        3.,
        0,
    )
    .unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    let model = FnDensity::new(normal_loglike, flat_prior);

    for dim in [10, 100] {
        let space = ParameterSpace::new(&parameters(dim)).unwrap();
        let tuner = ProposalTuner::new(dim, &AdaptOptions::default(), true, false);
        let chain = Chain::new(0, 1., space.initial_state().unwrap(), tuner, &model, &[]).unwrap();

        c.bench_function(&format!("chain step {}", dim), |b| {
            b.iter_batched(
                || (chain.clone(), replicate_rng(42, 0)),
                |(mut chain, mut rng)| {
                    for _ in 0..100 {
                        chain
                            .step(&space, &model, black_box(&[]), &mut rng)
                            .unwrap();
                    }
                    chain
                },
                BatchSize::SmallInput,
            )
        });
    }

    for rungs in [1, 8] {
        let config = make_config(10, rungs, 1000);
        c.bench_function(&format!("replicate 10 dim {} rungs", rungs), |b| {
            b.iter(|| sample_replicate(black_box(&config), &model, 42).unwrap())
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
