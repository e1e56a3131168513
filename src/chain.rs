use rand::Rng;
use thiserror::Error;

use crate::{
    config::ConfigurationError,
    math::{finite_or_neg_inf, metropolis_accept},
    model::{LogDensity, LogpError},
    output::AdaptationRecord,
    proposal::ProposalTuner,
    transform::{ParameterSpace, ParameterState},
};

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("invalid configuration")]
    Configuration(#[from] ConfigurationError),
    #[error("log density returned unrecoverable error")]
    Logp(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("initial log-posterior of rung {rung} is not finite ({value})")]
    NonFiniteInitialPoint { rung: usize, value: f64 },
}

/// Log-likelihood raised to the power `beta`.
///
/// A zero power removes the likelihood entirely, even where it is `-inf`.
#[inline]
pub(crate) fn tempered(beta: f64, loglike: f64) -> f64 {
    if beta == 0. {
        0.
    } else {
        beta * loglike
    }
}

/// Evaluate prior and likelihood at `theta`.
///
/// Recoverable model errors and a `-inf` prior give `Ok(None)`.
fn evaluate<M: LogDensity>(
    model: &M,
    theta: &[f64],
    x: &[f64],
) -> Result<Option<(f64, f64)>, SamplerError> {
    let handle_error = |err: M::LogpError| {
        if err.is_recoverable() {
            Ok(None)
        } else {
            Err(SamplerError::Logp(Box::new(err)))
        }
    };
    let logprior = match model.logprior(theta) {
        Ok(val) => finite_or_neg_inf(val),
        Err(err) => return handle_error(err),
    };
    if logprior == f64::NEG_INFINITY {
        return Ok(None);
    }
    let loglike = match model.loglike(theta, x) {
        Ok(val) if val.is_nan() => f64::NEG_INFINITY,
        Ok(val) => val,
        Err(err) => return handle_error(err),
    };
    Ok(Some((loglike, logprior)))
}

/// One Markov chain at a fixed tempering power.
#[derive(Debug, Clone)]
pub struct Chain {
    rung: usize,
    beta: f64,
    state: ParameterState,
    loglike: f64,
    logprior: f64,
    log_posterior: f64,
    tuner: ProposalTuner,
    accepted: u64,
    total: u64,
}

impl Chain {
    /// Start a chain at `state`.
    ///
    /// This fails if the tempered log-posterior of the start is not finite,
    /// or if the model returns an unrecoverable error.
    pub fn new<M: LogDensity>(
        rung: usize,
        beta: f64,
        state: ParameterState,
        tuner: ProposalTuner,
        model: &M,
        x: &[f64],
    ) -> Result<Self, SamplerError> {
        let (loglike, logprior) = evaluate(model, &state.theta, x)?
            .unwrap_or((f64::NEG_INFINITY, f64::NEG_INFINITY));
        let log_posterior =
            finite_or_neg_inf(tempered(beta, loglike) + logprior + state.log_jacobian);
        if log_posterior == f64::NEG_INFINITY {
            return Err(SamplerError::NonFiniteInitialPoint {
                rung,
                value: tempered(beta, loglike) + logprior,
            });
        }
        Ok(Self {
            rung,
            beta,
            state,
            loglike,
            logprior,
            log_posterior,
            tuner,
            accepted: 0,
            total: 0,
        })
    }

    /// Perform one Metropolis-Hastings iteration.
    ///
    /// Without a covariance proposal every coordinate gets its own move in
    /// turn. With one, a single joint move is made. Returns the number of
    /// accepted moves.
    pub fn step<M: LogDensity, R: Rng + ?Sized>(
        &mut self,
        space: &ParameterSpace,
        model: &M,
        x: &[f64],
        rng: &mut R,
    ) -> Result<u64, SamplerError> {
        let mut accepted = 0;
        if self.tuner.is_componentwise() {
            for dim in 0..space.dim() {
                let candidate = self.tuner.propose_component(&self.state.y, dim, rng);
                let accept = self.try_move(candidate, space, model, x, rng)?;
                self.tuner.record_component(dim, accept);
                accepted += accept as u64;
            }
            self.total += space.dim() as u64;
        } else {
            let candidate = self.tuner.propose(&self.state.y, rng);
            let accept = self.try_move(candidate, space, model, x, rng)?;
            self.tuner.record_joint(accept);
            accepted += accept as u64;
            self.total += 1;
        }
        self.accepted += accepted;
        self.tuner.record_position(&self.state.y);
        Ok(accepted)
    }

    fn try_move<M: LogDensity, R: Rng + ?Sized>(
        &mut self,
        candidate: Box<[f64]>,
        space: &ParameterSpace,
        model: &M,
        x: &[f64],
        rng: &mut R,
    ) -> Result<bool, SamplerError> {
        // Leaves the bounds, no need to ask the model
        let Some(proposed) = space.state(candidate) else {
            return Ok(false);
        };
        let Some((loglike, logprior)) = evaluate(model, &proposed.theta, x)? else {
            return Ok(false);
        };
        let log_posterior =
            finite_or_neg_inf(tempered(self.beta, loglike) + logprior + proposed.log_jacobian);
        let log_ratio = log_posterior - self.log_posterior;
        let accept = metropolis_accept(log_ratio, || rng.random::<f64>().ln());
        if accept {
            self.state = proposed;
            self.loglike = loglike;
            self.logprior = logprior;
            self.log_posterior = log_posterior;
        }
        Ok(accept)
    }

    /// Exchange the positions of two chains. Each keeps its power and proposal.
    pub(crate) fn exchange(first: &mut Chain, second: &mut Chain) {
        std::mem::swap(&mut first.state, &mut second.state);
        std::mem::swap(&mut first.loglike, &mut second.loglike);
        std::mem::swap(&mut first.logprior, &mut second.logprior);
        first.refresh_posterior();
        second.refresh_posterior();
    }

    fn refresh_posterior(&mut self) {
        self.log_posterior = finite_or_neg_inf(
            tempered(self.beta, self.loglike) + self.logprior + self.state.log_jacobian,
        );
    }

    pub(crate) fn adapt(&mut self, phase: usize) -> Option<AdaptationRecord> {
        let stats = self.tuner.adapt()?;
        tracing::debug!(
            rung = self.rung,
            phase,
            acceptance_rate = ?stats.acceptance_rate,
            "end of burn-in phase"
        );
        Some(AdaptationRecord {
            phase,
            rung: self.rung,
            acceptance_rate: stats.acceptance_rate,
            bandwidth: stats.bandwidth,
            scale: stats.scale,
            covariance_active: stats.covariance_active,
        })
    }

    /// Freeze the proposal and restart the move counters for the sampling phase.
    pub(crate) fn freeze(&mut self) {
        self.tuner.freeze();
        self.accepted = 0;
        self.total = 0;
    }

    pub fn rung(&self) -> usize {
        self.rung
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn state(&self) -> &ParameterState {
        &self.state
    }

    pub fn theta(&self) -> &[f64] {
        &self.state.theta
    }

    pub fn loglike(&self) -> f64 {
        self.loglike
    }

    pub fn logprior(&self) -> f64 {
        self.logprior
    }

    /// Tempered log-posterior in working coordinates, including the Jacobian.
    pub fn log_posterior(&self) -> f64 {
        self.log_posterior
    }

    pub fn tuner(&self) -> &ProposalTuner {
        &self.tuner
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn acceptance_rate(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(self.accepted as f64 / self.total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AdaptOptions, ParameterSpec},
        model::test_logps::{FailingLogp, NormalLogp},
        transform::TransformType,
    };
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn space(transform: TransformType, min: f64, max: f64, init: f64) -> ParameterSpace {
        ParameterSpace::new(&[ParameterSpec {
            init,
            min,
            max,
            transform,
        }])
        .unwrap()
    }

    fn chain<M: LogDensity>(space: &ParameterSpace, beta: f64, model: &M) -> Chain {
        let tuner = ProposalTuner::new(1, &AdaptOptions::default(), true, false);
        Chain::new(0, beta, space.initial_state().unwrap(), tuner, model, &[]).unwrap()
    }

    #[test]
    fn counts_moves() {
        let space = space(TransformType::Identity, -10., 10., 0.);
        let model = NormalLogp { mu: 0., sigma: 1. };
        let mut chain = chain(&space, 1., &model);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut accepted = 0;
        for _ in 0..500 {
            accepted += chain.step(&space, &model, &[], &mut rng).unwrap();
        }
        assert_eq!(chain.total(), 500);
        assert_eq!(chain.accepted(), accepted);
        let rate = chain.acceptance_rate().unwrap();
        assert!(rate > 0.3 && rate < 0.95);
    }

    #[test]
    fn diagonal_steps_move_each_coordinate() {
        let parameter = ParameterSpec {
            init: 0.,
            min: -10.,
            max: 10.,
            transform: TransformType::Identity,
        };
        let space = ParameterSpace::new(&[parameter; 3]).unwrap();
        let model = NormalLogp { mu: 0., sigma: 1. };
        let tuner = ProposalTuner::new(3, &AdaptOptions::default(), true, false);
        let mut chain =
            Chain::new(0, 1., space.initial_state().unwrap(), tuner, &model, &[]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut accepted = 0;
        for _ in 0..100 {
            let moved = chain.step(&space, &model, &[], &mut rng).unwrap();
            assert!(moved <= 3);
            accepted += moved;
        }
        assert_eq!(chain.total(), 300);
        assert_eq!(chain.accepted(), accepted);
        assert!(chain.theta().iter().all(|&val| val != 0.));
    }

    #[test]
    fn cached_values_are_consistent() {
        let space = space(TransformType::Logit, 0., 1., 0.5);
        let model = NormalLogp {
            mu: 0.3,
            sigma: 0.2,
        };
        let mut chain = chain(&space, 0.5, &model);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..200 {
            chain.step(&space, &model, &[], &mut rng).unwrap();
            let theta = chain.theta().to_vec();
            let loglike = model.loglike(&theta, &[]).unwrap();
            assert_abs_diff_eq!(chain.loglike(), loglike, epsilon = 1e-12);
            let expected = 0.5 * loglike + space.log_jacobian(&chain.state().y);
            assert_abs_diff_eq!(chain.log_posterior(), expected, epsilon = 1e-12);
            assert!(theta[0] > 0. && theta[0] < 1.);
        }
    }

    #[test]
    fn zero_power_ignores_likelihood() {
        assert_eq!(tempered(0., f64::NEG_INFINITY), 0.);
        assert_eq!(tempered(0.5, -4.), -2.);
    }

    #[test]
    fn recoverable_errors_reject() {
        let space = space(TransformType::Identity, -10., 10., 0.);
        let model = FailingLogp {
            threshold: 0.5,
            fatal: false,
        };
        let mut chain = chain(&space, 1., &model);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..300 {
            chain.step(&space, &model, &[], &mut rng).unwrap();
            assert!(chain.theta()[0] <= 0.5);
        }
    }

    #[test]
    fn unrecoverable_errors_abort() {
        let space = space(TransformType::Identity, -10., 10., 0.);
        let model = FailingLogp {
            threshold: 0.5,
            fatal: true,
        };
        let mut chain = chain(&space, 1., &model);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let result =
            (0..1000).try_for_each(|_| chain.step(&space, &model, &[], &mut rng).map(|_| ()));
        assert!(matches!(result, Err(SamplerError::Logp(_))));
    }

    #[test]
    fn non_finite_start_fails() {
        let space = space(TransformType::Identity, -10., 10., 2.);
        let model = FailingLogp {
            threshold: 1.,
            fatal: false,
        };
        let tuner = ProposalTuner::new(1, &AdaptOptions::default(), true, false);
        let err = Chain::new(3, 1., space.initial_state().unwrap(), tuner, &model, &[]);
        assert!(matches!(
            err,
            Err(SamplerError::NonFiniteInitialPoint { rung: 3, .. })
        ));
    }

    #[test]
    fn exchange_keeps_powers() {
        let space = space(TransformType::Identity, -10., 10., 0.);
        let model = NormalLogp { mu: 0., sigma: 1. };
        let mut hot = chain(&space, 0.25, &model);
        let mut cold = chain(&space, 1., &model);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        for _ in 0..20 {
            hot.step(&space, &model, &[], &mut rng).unwrap();
        }
        let hot_theta = hot.theta().to_vec();
        let hot_loglike = hot.loglike();
        Chain::exchange(&mut hot, &mut cold);
        assert_eq!(cold.theta(), &hot_theta[..]);
        assert_eq!(cold.beta(), 1.);
        assert_eq!(hot.beta(), 0.25);
        assert_abs_diff_eq!(cold.log_posterior(), hot_loglike, epsilon = 1e-12);
    }
}
