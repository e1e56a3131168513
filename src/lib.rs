//! Metropolis-coupled adaptive random-walk MCMC with thermodynamic integration.
//!
//! A ladder of chains samples tempered posteriors `p(x | theta)^beta p(theta)`
//! for powers `beta` between 0 and 1. Adjacent rungs exchange states, the cold
//! rung (`beta = 1`) yields the posterior draws, and the mean log-likelihood
//! along the ladder gives an estimate of the log marginal likelihood.
//!
//! ```no_run
//! use tempered_mh::{sample_replicate, Configuration, FnDensity, ParameterSpec, RungSpec, TransformType};
//!
//! let model = FnDensity::new(
//!     |theta: &[f64], x: &[f64]| x.iter().map(|xi| -0.5 * (xi - theta[0]).powi(2)).sum(),
//!     |_theta: &[f64]| 0.,
//! );
//! let parameters = vec![ParameterSpec {
//!     init: 0.,
//!     min: -10.,
//!     max: 10.,
//!     transform: TransformType::Identity,
//! }];
//! let config = Configuration::new(
//!     vec![0.3, -0.1, 0.8],
//!     parameters,
//!     vec![500, 500],
//!     2000,
//!     vec![RungSpec::default(); 8],
//!     3.,
//!     1,
//! )?;
//! let output = sample_replicate(&config, &model, 42)?;
//! println!("log marginal likelihood: {:?}", output.log_marginal_likelihood);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub(crate) mod bandwidth_adapt;
pub(crate) mod chain;
pub(crate) mod config;
pub(crate) mod coupling;
pub(crate) mod ladder;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod output;
pub(crate) mod proposal;
pub(crate) mod sampler;
pub(crate) mod schedule;
pub(crate) mod transform;

pub use bandwidth_adapt::{RobbinsMonro, RobbinsMonroOptions};
pub use chain::{Chain, SamplerError};
pub use config::{
    AdaptOptions, ConfigArgs, Configuration, ConfigurationError, ParameterSpec, RungSpec,
};
pub use coupling::{swap_log_acceptance, CouplingEngine, SwapRecord};
pub use ladder::{ladder_powers, RungLadder};
pub use model::{FnDensity, LogDensity, LogpError, NoLogpError};
pub use output::{
    thermodynamic_integral, AdaptationRecord, DiagnosticPath, OutputCollector, RunOutput, Sample,
};
pub use proposal::{ProposalState, ProposalTuner, TunerStats};
pub use sampler::{
    replicate_rng, sample_replicate, sample_replicates, ProgressCallback, ReplicateCommand,
    ReplicateProgress, ReplicateRun, Sampler, SamplerWaitResult, StopCheck, Trace,
};
pub use schedule::{BurnInScheduler, Phase, Step};
pub use transform::{ParameterSpace, ParameterState, TransformType};
