//! Adaptive random-walk proposals.
//!
//! Each rung owns one [`ProposalTuner`]. Without a covariance the chain
//! updates one coordinate at a time, and each coordinate keeps its own
//! bandwidth and acceptance count. With a covariance the chain makes joint
//! moves. During burn-in the tuner collects acceptance rates and (if
//! enabled) the history of the chain, and at every phase boundary it adjusts
//! the proposal. After [`ProposalTuner::freeze`] the proposal never changes
//! again.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::{
    bandwidth_adapt::{AcceptanceWindow, RobbinsMonro, RobbinsMonroOptions, RunningCovariance},
    config::AdaptOptions,
};

/// The tunable part of a proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalState {
    /// Standard deviations of the diagonal proposal, one per dimension.
    pub bandwidth: Box<[f64]>,
    /// Global scale of the covariance proposal.
    pub scale: f64,
    /// Row major covariance of the working coordinates, when one is in use.
    pub covariance: Option<Box<[f64]>>,
    factor: Option<Box<[f64]>>,
}

impl ProposalState {
    /// Whether proposals are currently drawn from the covariance.
    pub fn covariance_active(&self) -> bool {
        self.factor.is_some()
    }
}

/// Snapshot of the outcome of one adaptation.
#[derive(Debug, Clone, PartialEq)]
pub struct TunerStats {
    /// Acceptance rate over all moves of the phase that just ended, if any
    /// were made.
    pub acceptance_rate: Option<f64>,
    pub bandwidth: Box<[f64]>,
    pub scale: f64,
    pub covariance_active: bool,
}

#[derive(Debug, Clone)]
pub struct ProposalTuner {
    state: ProposalState,
    bandwidth_adapt: Vec<RobbinsMonro>,
    scale_adapt: RobbinsMonro,
    component_windows: Vec<AcceptanceWindow>,
    joint_window: AcceptanceWindow,
    history: RunningCovariance,
    bw_update: bool,
    cov_update: bool,
    frozen: bool,
    min_cov_samples: u64,
    max_condition: f64,
}

impl ProposalTuner {
    pub fn new(dim: usize, options: &AdaptOptions, bw_update: bool, cov_update: bool) -> Self {
        let diag_settings = RobbinsMonroOptions {
            target: options.target_accept_diag,
            gain: options.gain,
            decay: options.decay,
            limits: options.bandwidth_limits,
        };
        let cov_settings = RobbinsMonroOptions {
            target: options.target_accept_cov,
            ..diag_settings
        };
        // Optimal scaling of a random walk on a Gaussian target
        let (lower, upper) = options.bandwidth_limits;
        let scale = (2.38 / (dim as f64).sqrt()).clamp(lower, upper);

        Self {
            state: ProposalState {
                bandwidth: vec![options.initial_bandwidth; dim].into(),
                scale,
                covariance: None,
                factor: None,
            },
            bandwidth_adapt: (0..dim)
                .map(|_| RobbinsMonro::new(diag_settings, options.initial_bandwidth))
                .collect(),
            scale_adapt: RobbinsMonro::new(cov_settings, scale),
            component_windows: vec![AcceptanceWindow::default(); dim],
            joint_window: AcceptanceWindow::default(),
            history: RunningCovariance::new(dim),
            bw_update,
            cov_update,
            frozen: false,
            min_cov_samples: options.min_cov_samples.max(2 * dim as u64),
            max_condition: options.max_condition,
        }
    }

    pub fn state(&self) -> &ProposalState {
        &self.state
    }

    pub fn dim(&self) -> usize {
        self.state.bandwidth.len()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Whether `adapt` can change anything.
    pub fn is_adaptive(&self) -> bool {
        !self.frozen & (self.bw_update | self.cov_update)
    }

    /// Whether the chain should update one coordinate at a time.
    pub fn is_componentwise(&self) -> bool {
        !self.state.covariance_active()
    }

    /// Draw a candidate that differs from `y` in coordinate `dim` only.
    pub fn propose_component<R: Rng + ?Sized>(
        &self,
        y: &[f64],
        dim: usize,
        rng: &mut R,
    ) -> Box<[f64]> {
        assert!(y.len() == self.dim());
        let mut candidate: Box<[f64]> = y.into();
        let z: f64 = rng.sample(StandardNormal);
        candidate[dim] += self.state.bandwidth[dim] * z;
        candidate
    }

    /// Draw a joint random-walk candidate around `y`.
    ///
    /// Uses the scaled covariance when one is active, independent normal
    /// steps with the per-coordinate bandwidths otherwise.
    pub fn propose<R: Rng + ?Sized>(&self, y: &[f64], rng: &mut R) -> Box<[f64]> {
        let dim = self.dim();
        assert!(y.len() == dim);
        match &self.state.factor {
            Some(factor) => {
                let z: Vec<f64> = (0..dim).map(|_| rng.sample(StandardNormal)).collect();
                y.iter()
                    .enumerate()
                    .map(|(i, &val)| {
                        let row = &factor[i * dim..(i + 1) * dim];
                        let step: f64 = row.iter().zip(z.iter()).map(|(a, z)| a * z).sum();
                        val + self.state.scale * step
                    })
                    .collect()
            }
            None => y
                .iter()
                .zip(self.state.bandwidth.iter())
                .map(|(&val, &bw)| {
                    let z: f64 = rng.sample(StandardNormal);
                    val + bw * z
                })
                .collect(),
        }
    }

    /// Register the outcome of a single-coordinate move.
    pub fn record_component(&mut self, dim: usize, accepted: bool) {
        if self.frozen {
            return;
        }
        self.component_windows[dim].add(accepted);
    }

    /// Register the outcome of a joint move.
    pub fn record_joint(&mut self, accepted: bool) {
        if self.frozen {
            return;
        }
        self.joint_window.add(accepted);
    }

    /// Register the chain position at the end of an iteration.
    pub fn record_position(&mut self, y: &[f64]) {
        if self.frozen || !self.cov_update {
            return;
        }
        self.history.add_sample(y);
    }

    /// Adjust the proposal at the end of a burn-in phase.
    ///
    /// Every bandwidth follows the acceptance rate of its own coordinate.
    /// The covariance scale follows the rate of the joint moves. Returns
    /// `None` without touching anything if the tuner is frozen or has no
    /// update enabled.
    pub fn adapt(&mut self) -> Option<TunerStats> {
        if !self.is_adaptive() {
            return None;
        }

        let mut overall = self.joint_window.clone();
        self.component_windows
            .iter()
            .for_each(|window| overall.merge(window));
        let acceptance_rate = overall.rate();

        if self.bw_update {
            self.bandwidth_adapt
                .iter_mut()
                .zip(self.component_windows.iter())
                .zip(self.state.bandwidth.iter_mut())
                .for_each(|((adapt, window), bw)| {
                    if let Some(rate) = window.rate() {
                        adapt.advance(rate);
                        *bw = adapt.current();
                    }
                });
        }
        if let Some(rate) = self.joint_window.rate() {
            self.scale_adapt.advance(rate);
            self.state.scale = self.scale_adapt.current();
        }
        self.reset_windows();

        if self.cov_update && self.history.count() >= self.min_cov_samples {
            self.update_covariance();
        }

        tracing::debug!(
            acceptance_rate = ?acceptance_rate,
            scale = self.state.scale,
            covariance_active = self.state.covariance_active(),
            "adapted proposal"
        );

        Some(TunerStats {
            acceptance_rate,
            bandwidth: self.state.bandwidth.clone(),
            scale: self.state.scale,
            covariance_active: self.state.covariance_active(),
        })
    }

    fn reset_windows(&mut self) {
        self.joint_window.reset();
        self.component_windows
            .iter_mut()
            .for_each(|window| window.reset());
    }

    fn update_covariance(&mut self) {
        let dim = self.dim();
        let Some(cov) = self.history.covariance() else {
            return;
        };
        match spd_factor(&cov, dim, self.max_condition) {
            Some(factor) => {
                self.state.covariance = Some(cov.into());
                self.state.factor = Some(factor.into());
            }
            None => {
                tracing::warn!(
                    samples = self.history.count(),
                    "proposal covariance is not well conditioned, using diagonal proposal"
                );
                self.state.covariance = None;
                self.state.factor = None;
            }
        }
    }

    /// Stop all adaptation for the rest of the run.
    pub fn freeze(&mut self) {
        self.frozen = true;
        self.reset_windows();
    }
}

/// A square root `A` with `A A^T = cov` for a well conditioned symmetric
/// positive definite `cov`, row major.
fn spd_factor(cov: &[f64], dim: usize, max_condition: f64) -> Option<Vec<f64>> {
    if cov.iter().any(|val| !val.is_finite()) {
        return None;
    }
    let mat = faer::Mat::from_fn(dim, dim, |i, j| cov[i * dim + j]);
    let eig = mat.self_adjoint_eigen(faer::Side::Lower).ok()?;

    let vals: Vec<f64> = eig.S().column_vector().iter().copied().collect();
    let (min, max) = vals
        .iter()
        .fold((f64::INFINITY, 0f64), |(lo, hi), &val| (lo.min(val), hi.max(val)));
    if !(min > 0.) || !(max / min <= max_condition) {
        return None;
    }

    let mut factor = vec![0f64; dim * dim];
    for (k, col) in eig.U().col_iter().enumerate() {
        let root = vals[k].sqrt();
        for (i, &val) in col.iter().enumerate() {
            factor[i * dim + k] = val * root;
        }
    }
    if factor.iter().any(|val| !val.is_finite()) {
        return None;
    }
    Some(factor)
}
