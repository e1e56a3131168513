use approx::assert_abs_diff_eq;
use arrow::array::Array;
use pretty_assertions::assert_eq;
use tempered_mh::{
    replicate_rng, sample_replicate, ConfigArgs, Configuration, ConfigurationError, FnDensity,
    ParameterSpec, Phase, ReplicateRun, RungSpec, TransformType,
};

fn standard_normal(theta: &[f64], _x: &[f64]) -> f64 {
    theta.iter().map(|val| -0.5 * val * val).sum()
}

fn flat(_theta: &[f64]) -> f64 {
    0.
}

fn identity(init: f64, min: f64, max: f64) -> ParameterSpec {
    ParameterSpec {
        init,
        min,
        max,
        transform: TransformType::Identity,
    }
}

fn normal_config(rungs: usize, gti_pow: f64, burnin: Vec<u64>, samples: u64) -> Configuration {
    Configuration::new(
        vec![],
        vec![identity(0., -10., 10.)],
        burnin,
        samples,
        vec![RungSpec::default(); rungs],
        gti_pow,
        0,
    )
    .unwrap()
}

#[test]
fn gaussian_posterior_moments() -> anyhow::Result<()> {
    let model = FnDensity::new(standard_normal, flat);
    let config = normal_config(1, 1., vec![1000], 5000);
    let output = sample_replicate(&config, &model, 7)?;

    assert_eq!(output.samples.len(), 5000);
    let draws = output
        .samples
        .iter()
        .map(|sample| sample.theta[0])
        .collect::<Vec<_>>();
    let n = draws.len() as f64;
    let mean = draws.iter().sum::<f64>() / n;
    let var = draws.iter().map(|val| (val - mean).powi(2)).sum::<f64>() / (n - 1.);
    assert_abs_diff_eq!(mean, 0., epsilon = 0.05);
    assert_abs_diff_eq!(var, 1., epsilon = 0.1);
    Ok(())
}

#[test]
fn bandwidths_follow_the_scale_of_each_dimension() -> anyhow::Result<()> {
    let scales = [0.01, 100.];
    let model = FnDensity::new(
        move |theta: &[f64], _x: &[f64]| {
            theta
                .iter()
                .zip(scales.iter())
                .map(|(val, sd)| -0.5 * (val / sd).powi(2))
                .sum()
        },
        flat,
    );
    let config = Configuration::new(
        vec![],
        vec![identity(0., -1e4, 1e4); 2],
        vec![500; 10],
        100,
        vec![RungSpec::default()],
        1.,
        0,
    )?;
    let output = sample_replicate(&config, &model, 13)?;

    let last = output.adaptation.last().unwrap();
    assert_eq!(last.phase, 9);
    assert!(!last.covariance_active);
    let (narrow, wide) = (last.bandwidth[0], last.bandwidth[1]);
    assert!(narrow < 0.1, "bandwidth {}", narrow);
    assert!(wide > 10., "bandwidth {}", wide);
    assert!(wide / narrow > 1000., "bandwidths {} {}", narrow, wide);
    Ok(())
}

#[test]
fn ladder_swaps_mix() -> anyhow::Result<()> {
    let model = FnDensity::new(standard_normal, flat);
    let config = normal_config(5, 2., vec![500, 500], 2000);
    let output = sample_replicate(&config, &model, 99)?;

    assert_eq!(output.betas[0], 0.);
    assert_eq!(output.betas[4], 1.);
    assert!(output.betas.windows(2).all(|pair| pair[0] < pair[1]));

    assert_eq!(output.swap_rates.len(), 4);
    for rate in output.swap_rates.iter() {
        let rate = rate.unwrap();
        assert!(rate > 0. && rate < 1., "swap rate {}", rate);
    }
    assert!(output.log_marginal_likelihood.unwrap().is_finite());
    Ok(())
}

#[test]
fn log_transform_stays_positive() -> anyhow::Result<()> {
    let model = FnDensity::new(
        |theta: &[f64], _x: &[f64]| -0.5 * (theta[0] - 1.).powi(2),
        |theta: &[f64]| -theta[0],
    );
    let config = Configuration::new(
        vec![],
        vec![ParameterSpec {
            init: 1.,
            min: 0.,
            max: f64::INFINITY,
            transform: TransformType::Log,
        }],
        vec![300, 300],
        2000,
        vec![RungSpec::default(); 3],
        3.,
        0,
    )?;
    let output = sample_replicate(&config, &model, 5)?;
    assert!(output.samples.iter().all(|sample| sample.theta[0] > 0.));
    Ok(())
}

#[test]
fn every_rung_respects_bounds() -> anyhow::Result<()> {
    let model = FnDensity::new(
        |theta: &[f64], _x: &[f64]| -theta.iter().map(|val| val * val).sum::<f64>(),
        |theta: &[f64]| -theta.iter().map(|val| val.abs()).sum::<f64>(),
    );
    let parameters = vec![
        identity(0.5, 0., 1.),
        ParameterSpec {
            init: 2.,
            min: 1.,
            max: f64::INFINITY,
            transform: TransformType::Log,
        },
        ParameterSpec {
            init: -1.,
            min: f64::NEG_INFINITY,
            max: 0.,
            transform: TransformType::LogUpper,
        },
        ParameterSpec {
            init: 0.,
            min: -2.,
            max: 3.,
            transform: TransformType::Logit,
        },
    ];
    let config = Configuration::new(
        vec![],
        parameters.clone(),
        vec![100, 100],
        500,
        vec![RungSpec::default(); 4],
        2.,
        0,
    )?;

    let mut run = ReplicateRun::new(config, &model, replicate_rng(3, 0))?;
    while !run.advance()? {
        for chain in run.ladder().chains() {
            for (val, spec) in chain.theta().iter().zip(parameters.iter()) {
                match spec.transform {
                    TransformType::Identity => assert!(*val >= spec.min && *val <= spec.max),
                    _ => assert!(*val > spec.min && *val < spec.max),
                }
            }
        }
    }
    Ok(())
}

#[test]
fn reproducible_with_seed() -> anyhow::Result<()> {
    let model = FnDensity::new(standard_normal, flat);
    let config = normal_config(4, 3., vec![200, 200], 500);
    let first = sample_replicate(&config, &model, 17)?;
    let second = sample_replicate(&config, &model, 17)?;
    assert_eq!(first.samples, second.samples);
    assert_eq!(first.swaps, second.swaps);
    assert_eq!(first.adaptation, second.adaptation);
    assert_eq!(
        first.log_marginal_likelihood.map(f64::to_bits),
        second.log_marginal_likelihood.map(f64::to_bits)
    );
    Ok(())
}

#[test]
fn adaptation_is_frozen_while_sampling() -> anyhow::Result<()> {
    let model = FnDensity::new(standard_normal, flat);
    let config = normal_config(3, 2., vec![100, 100, 100], 400);
    let mut run = ReplicateRun::new(config, &model, replicate_rng(8, 0))?;

    let mut frozen = None;
    while !run.advance()? {
        if run.phase() != Phase::Sampling {
            continue;
        }
        let states = run
            .ladder()
            .chains()
            .iter()
            .map(|chain| chain.tuner().state().clone())
            .collect::<Vec<_>>();
        assert!(run.ladder().chains().iter().all(|chain| chain.tuner().is_frozen()));
        match &frozen {
            None => frozen = Some(states),
            Some(first) => assert_eq!(first, &states),
        }
    }

    let output = run.finish(false);
    assert_eq!(output.adaptation.len(), 3 * 3);
    assert!(output.adaptation.iter().all(|record| record.phase < 3));
    Ok(())
}

#[test]
fn single_rung_has_no_coupling() -> anyhow::Result<()> {
    let model = FnDensity::new(standard_normal, flat);
    let config = normal_config(1, 3., vec![100], 300);
    let output = sample_replicate(&config, &model, 2)?;
    assert_eq!(output.betas, vec![1.]);
    assert!(output.swaps.is_empty());
    assert!(output.swap_rates.is_empty());
    assert!(output.log_marginal_likelihood.is_none());
    assert_eq!(output.path.rungs(), 1);
    Ok(())
}

#[test]
fn covariance_adaptation_on_correlated_target() -> anyhow::Result<()> {
    // Bivariate normal with correlation 0.9
    let rho: f64 = 0.9;
    let model = FnDensity::new(
        move |theta: &[f64], _x: &[f64]| {
            let (a, b) = (theta[0], theta[1]);
            -(a * a - 2. * rho * a * b + b * b) / (2. * (1. - rho * rho))
        },
        flat,
    );
    let rung = RungSpec {
        bw_update: true,
        cov_update: true,
        coupling_on: true,
    };
    let config = Configuration::new(
        vec![],
        vec![identity(0., -20., 20.), identity(0., -20., 20.)],
        vec![500, 500, 500, 500],
        2000,
        vec![rung],
        1.,
        0,
    )?;
    let output = sample_replicate(&config, &model, 21)?;
    let last = output.adaptation.last().unwrap();
    assert!(last.covariance_active);
    let rate = output.acceptance[0].unwrap();
    assert!(rate > 0.05 && rate < 0.8, "acceptance {}", rate);
    Ok(())
}

#[test]
fn arrow_export_of_samples() -> anyhow::Result<()> {
    let model = FnDensity::new(standard_normal, flat);
    let config = normal_config(2, 3., vec![50], 100);
    let output = sample_replicate(&config, &model, 4)?;
    let samples = output.samples_array()?;
    assert_eq!(samples.len(), 100);
    let path = output.path_array()?;
    assert_eq!(path.num_columns(), 2);
    assert_eq!(path.len(), 100);
    Ok(())
}

fn host_args() -> ConfigArgs {
    ConfigArgs {
        x: vec![1., 2.],
        theta_init: vec![0., 0.5],
        theta_min: vec![-5., 0.],
        theta_max: vec![5., 1.],
        trans_type: vec![0, 3],
        burnin: vec![10, 10],
        samples: 20,
        rungs: 3,
        burnin_phases: 2,
        bw_update: vec![true; 3],
        cov_update: vec![false; 3],
        coupling_on: vec![true; 3],
        gti_pow: 3.,
        chain: 4,
        pb_markdown: false,
        silent: true,
    }
}

#[test]
fn host_arguments() {
    let config = Configuration::try_from(host_args()).unwrap();
    assert_eq!(config.dim(), 2);
    assert_eq!(config.num_rungs(), 3);
    assert_eq!(config.chain(), 4);
    assert_eq!(config.parameters()[1].transform, TransformType::Logit);

    let mut args = host_args();
    args.theta_max.pop();
    assert!(matches!(
        Configuration::try_from(args),
        Err(ConfigurationError::LengthMismatch {
            field: "theta_max",
            ..
        })
    ));

    let mut args = host_args();
    args.trans_type[0] = 7;
    assert!(matches!(
        Configuration::try_from(args),
        Err(ConfigurationError::InvalidTransform { code: 7, .. })
    ));

    let mut args = host_args();
    args.theta_init[1] = 1.;
    assert!(matches!(
        Configuration::try_from(args),
        Err(ConfigurationError::Domain { dim: 1, .. })
    ));
}
