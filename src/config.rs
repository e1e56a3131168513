//! Sampler configuration.
//!
//! A [`Configuration`] is built once, validated once and never mutated
//! afterwards. Hosts that hand over a flat bundle of parallel sequences can
//! fill a [`ConfigArgs`] and convert it with `Configuration::try_from`.

use thiserror::Error;

use crate::transform::TransformType;

/// Errors detected while validating a configuration.
///
/// Every variant names the offending field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("`{field}` has length {found}, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("`{field}` is out of range: {reason}")]
    OutOfRange {
        field: &'static str,
        reason: String,
    },
    #[error("`{field}` violates its bounds in dimension {dim}: {reason}")]
    Domain {
        field: &'static str,
        dim: usize,
        reason: String,
    },
    #[error("`{field}` contains unknown transform code {code} in dimension {dim}")]
    InvalidTransform {
        field: &'static str,
        dim: usize,
        code: i64,
    },
}

/// Initial value, bounds and reparameterization of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterSpec {
    pub init: f64,
    pub min: f64,
    pub max: f64,
    pub transform: TransformType,
}

/// Adaptation and coupling switches of a single rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RungSpec {
    /// Tune the per-dimension bandwidths at burn-in phase boundaries.
    pub bw_update: bool,
    /// Learn a full proposal covariance from the burn-in history.
    pub cov_update: bool,
    /// Allow the rung to take part in state swaps with its neighbours.
    pub coupling_on: bool,
}

impl Default for RungSpec {
    fn default() -> Self {
        Self {
            bw_update: true,
            cov_update: false,
            coupling_on: true,
        }
    }
}

/// Settings for proposal adaptation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptOptions {
    /// Acceptance rate the per-dimension bandwidths are tuned towards.
    pub target_accept_diag: f64,
    /// Acceptance rate the joint covariance scale is tuned towards.
    pub target_accept_cov: f64,
    pub initial_bandwidth: f64,
    /// Robbins-Monro gain of the first phase.
    pub gain: f64,
    /// The gain of phase `k` is `gain / (k + 1)^decay`.
    pub decay: f64,
    /// Minimum number of history points before a covariance is estimated.
    /// The effective minimum is never below `2 * dim`.
    pub min_cov_samples: u64,
    /// Largest accepted ratio between the extreme covariance eigenvalues.
    pub max_condition: f64,
    pub bandwidth_limits: (f64, f64),
}

impl Default for AdaptOptions {
    fn default() -> Self {
        Self {
            target_accept_diag: 0.44,
            target_accept_cov: 0.234,
            initial_bandwidth: 1.0,
            gain: 3.0,
            decay: 0.5,
            min_cov_samples: 10,
            max_condition: 1e12,
            bandwidth_limits: (1e-10, 1e10),
        }
    }
}

/// Validated, immutable sampler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    x: Vec<f64>,
    parameters: Vec<ParameterSpec>,
    burnin: Vec<u64>,
    samples: u64,
    rungs: Vec<RungSpec>,
    gti_pow: f64,
    chain: u64,
    adapt: AdaptOptions,
}

impl Configuration {
    /// Validate and assemble a configuration.
    ///
    /// The number of rungs is the length of `rungs`, the number of burn-in
    /// phases the length of `burnin`.
    pub fn new(
        x: Vec<f64>,
        parameters: Vec<ParameterSpec>,
        burnin: Vec<u64>,
        samples: u64,
        rungs: Vec<RungSpec>,
        gti_pow: f64,
        chain: u64,
    ) -> Result<Self, ConfigurationError> {
        let config = Self {
            x,
            parameters,
            burnin,
            samples,
            rungs,
            gti_pow,
            chain,
            adapt: AdaptOptions::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Replace the adaptation constants.
    pub fn with_adapt_options(mut self, adapt: AdaptOptions) -> Result<Self, ConfigurationError> {
        self.adapt = adapt;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.parameters.is_empty() {
            return Err(ConfigurationError::OutOfRange {
                field: "theta_init",
                reason: "at least one parameter is required".into(),
            });
        }
        if self.rungs.is_empty() {
            return Err(ConfigurationError::OutOfRange {
                field: "rungs",
                reason: "at least one rung is required".into(),
            });
        }
        if !(self.gti_pow.is_finite() && self.gti_pow > 0.) {
            return Err(ConfigurationError::OutOfRange {
                field: "GTI_pow",
                reason: format!("must be a positive finite number, got {}", self.gti_pow),
            });
        }
        for (dim, param) in self.parameters.iter().enumerate() {
            param.transform.check_bounds(dim, param.min, param.max)?;
            if !param.transform.admits(param.init, param.min, param.max) {
                return Err(ConfigurationError::Domain {
                    field: "theta_init",
                    dim,
                    reason: format!(
                        "{} is not inside [{}, {}] for transform {:?}",
                        param.init, param.min, param.max, param.transform
                    ),
                });
            }
        }

        let adapt = &self.adapt;
        let rate_ok = |rate: f64| rate > 0. && rate < 1.;
        if !rate_ok(adapt.target_accept_diag) || !rate_ok(adapt.target_accept_cov) {
            return Err(ConfigurationError::OutOfRange {
                field: "adapt.target_accept",
                reason: "target acceptance rates must lie in (0, 1)".into(),
            });
        }
        let (lower, upper) = adapt.bandwidth_limits;
        if !(lower > 0. && lower < upper) {
            return Err(ConfigurationError::OutOfRange {
                field: "adapt.bandwidth_limits",
                reason: format!("invalid limits ({}, {})", lower, upper),
            });
        }
        if !(adapt.initial_bandwidth >= lower && adapt.initial_bandwidth <= upper) {
            return Err(ConfigurationError::OutOfRange {
                field: "adapt.initial_bandwidth",
                reason: format!("{} is outside the bandwidth limits", adapt.initial_bandwidth),
            });
        }
        if !(adapt.gain >= 0. && adapt.decay >= 0. && adapt.max_condition > 1.) {
            return Err(ConfigurationError::OutOfRange {
                field: "adapt",
                reason: "gain and decay must be non-negative, max_condition above 1".into(),
            });
        }
        Ok(())
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn dim(&self) -> usize {
        self.parameters.len()
    }

    pub fn theta_init(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.init).collect()
    }

    pub fn burnin(&self) -> &[u64] {
        &self.burnin
    }

    pub fn burnin_phases(&self) -> usize {
        self.burnin.len()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn rungs(&self) -> &[RungSpec] {
        &self.rungs
    }

    pub fn num_rungs(&self) -> usize {
        self.rungs.len()
    }

    pub fn gti_pow(&self) -> f64 {
        self.gti_pow
    }

    /// Replicate identifier. It labels the output and has no effect on the dynamics.
    pub fn chain(&self) -> u64 {
        self.chain
    }

    pub fn adapt_options(&self) -> &AdaptOptions {
        &self.adapt
    }

    /// Total number of iterations of a complete run.
    pub fn total_iterations(&self) -> u64 {
        self.burnin.iter().sum::<u64>() + self.samples
    }

    /// A copy of this configuration with a different replicate identifier.
    pub fn with_chain(&self, chain: u64) -> Self {
        Self {
            chain,
            ..self.clone()
        }
    }
}

/// Flat argument bundle as handed over by a host environment.
///
/// All sequences are parallel arrays; integers are signed so that invalid
/// host values can be reported instead of wrapping around.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigArgs {
    pub x: Vec<f64>,
    pub theta_init: Vec<f64>,
    pub theta_min: Vec<f64>,
    pub theta_max: Vec<f64>,
    /// Transform codes, see [`TransformType::from_code`].
    pub trans_type: Vec<i64>,
    pub burnin: Vec<i64>,
    pub samples: i64,
    pub rungs: i64,
    pub burnin_phases: i64,
    /// One flag per rung.
    pub bw_update: Vec<bool>,
    /// One flag per rung.
    pub cov_update: Vec<bool>,
    /// One flag per rung.
    pub coupling_on: Vec<bool>,
    pub gti_pow: f64,
    pub chain: i64,
    pub pb_markdown: bool,
    pub silent: bool,
}

fn check_len(field: &'static str, expected: usize, found: usize) -> Result<(), ConfigurationError> {
    if expected != found {
        return Err(ConfigurationError::LengthMismatch {
            field,
            expected,
            found,
        });
    }
    Ok(())
}

fn non_negative(field: &'static str, value: i64) -> Result<u64, ConfigurationError> {
    u64::try_from(value).map_err(|_| ConfigurationError::OutOfRange {
        field,
        reason: format!("must not be negative, got {}", value),
    })
}

impl TryFrom<ConfigArgs> for Configuration {
    type Error = ConfigurationError;

    fn try_from(args: ConfigArgs) -> Result<Self, Self::Error> {
        let dim = args.theta_init.len();
        check_len("theta_min", dim, args.theta_min.len())?;
        check_len("theta_max", dim, args.theta_max.len())?;
        check_len("trans_type", dim, args.trans_type.len())?;

        if args.rungs < 1 {
            return Err(ConfigurationError::OutOfRange {
                field: "rungs",
                reason: format!("must be at least 1, got {}", args.rungs),
            });
        }
        let samples = non_negative("samples", args.samples)?;
        let burnin_phases = non_negative("burnin_phases", args.burnin_phases)? as usize;
        check_len("burnin", burnin_phases, args.burnin.len())?;
        let burnin = args
            .burnin
            .iter()
            .map(|&len| non_negative("burnin", len))
            .collect::<Result<Vec<_>, _>>()?;
        let chain = non_negative("chain", args.chain)?;

        let num_rungs = args.rungs as usize;
        check_len("bw_update", num_rungs, args.bw_update.len())?;
        check_len("cov_update", num_rungs, args.cov_update.len())?;
        check_len("coupling_on", num_rungs, args.coupling_on.len())?;

        let parameters = (0..dim)
            .map(|dim_idx| {
                let code = args.trans_type[dim_idx];
                let transform =
                    TransformType::from_code(code).ok_or(ConfigurationError::InvalidTransform {
                        field: "trans_type",
                        dim: dim_idx,
                        code,
                    })?;
                Ok(ParameterSpec {
                    init: args.theta_init[dim_idx],
                    min: args.theta_min[dim_idx],
                    max: args.theta_max[dim_idx],
                    transform,
                })
            })
            .collect::<Result<Vec<_>, ConfigurationError>>()?;

        let rungs = (0..num_rungs)
            .map(|rung| RungSpec {
                bw_update: args.bw_update[rung],
                cov_update: args.cov_update[rung],
                coupling_on: args.coupling_on[rung],
            })
            .collect();

        Configuration::new(
            args.x,
            parameters,
            burnin,
            samples,
            rungs,
            args.gti_pow,
            chain,
        )
    }
}

#[cfg(test)]
pub(crate) mod test_configs {
    use super::*;

    pub(crate) fn args(rungs: usize) -> ConfigArgs {
        ConfigArgs {
            x: vec![0.5, -0.2, 1.3],
            theta_init: vec![0.0, 1.0],
            theta_min: vec![-10.0, 0.0],
            theta_max: vec![10.0, f64::INFINITY],
            trans_type: vec![0, 1],
            burnin: vec![100, 100],
            samples: 200,
            rungs: rungs as i64,
            burnin_phases: 2,
            bw_update: vec![true; rungs],
            cov_update: vec![false; rungs],
            coupling_on: vec![true; rungs],
            gti_pow: 3.0,
            chain: 1,
            pb_markdown: false,
            silent: true,
        }
    }
}
