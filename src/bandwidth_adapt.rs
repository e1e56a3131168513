//! Stochastic approximation and running moments used by the proposal tuner.

/// Settings for a Robbins-Monro scale update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobbinsMonroOptions {
    pub target: f64,
    pub gain: f64,
    pub decay: f64,
    pub limits: (f64, f64),
}

/// Robbins-Monro recursion on the log of a positive scale.
///
/// After observing an acceptance rate in step `k` the log scale moves by
/// `gain / (k + 1)^decay * (rate - target)`, so the scale grows while moves
/// are accepted too often and shrinks otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct RobbinsMonro {
    log_scale: f64,
    count: u64,
    settings: RobbinsMonroOptions,
}

impl RobbinsMonro {
    pub fn new(settings: RobbinsMonroOptions, initial_scale: f64) -> RobbinsMonro {
        RobbinsMonro {
            log_scale: initial_scale.ln(),
            count: 0,
            settings,
        }
    }

    pub fn step_gain(&self) -> f64 {
        self.settings.gain / ((self.count + 1) as f64).powf(self.settings.decay)
    }

    pub fn advance(&mut self, accept_rate: f64) {
        let delta = self.step_gain() * (accept_rate - self.settings.target);
        let (lower, upper) = self.settings.limits;
        self.log_scale = (self.log_scale + delta).clamp(lower.ln(), upper.ln());
        self.count += 1;
    }

    pub fn current(&self) -> f64 {
        self.log_scale.exp()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Acceptance counter for the moves since the last adaptation.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct AcceptanceWindow {
    accepted: u64,
    count: u64,
}

impl AcceptanceWindow {
    pub(crate) fn add(&mut self, accepted: bool) {
        self.accepted += accepted as u64;
        self.count += 1;
    }

    pub(crate) fn rate(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.accepted as f64 / self.count as f64)
    }

    pub(crate) fn reset(&mut self) {
        self.accepted = 0;
        self.count = 0;
    }

    pub(crate) fn merge(&mut self, other: &Self) {
        self.accepted += other.accepted;
        self.count += other.count;
    }
}

/// Welford accumulator for the mean and covariance of vectors.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RunningCovariance {
    mean: Box<[f64]>,
    // Row major, full matrix of centered cross products
    comoment: Box<[f64]>,
    count: u64,
}

impl RunningCovariance {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            mean: vec![0f64; dim].into(),
            comoment: vec![0f64; dim * dim].into(),
            count: 0,
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.mean.len()
    }

    pub(crate) fn add_sample(&mut self, value: &[f64]) {
        let dim = self.dim();
        assert!(value.len() == dim);
        self.count += 1;
        let scale = (self.count as f64).recip();

        let delta_old: Vec<f64> = value
            .iter()
            .zip(self.mean.iter())
            .map(|(&val, &mean)| val - mean)
            .collect();
        self.mean
            .iter_mut()
            .zip(delta_old.iter())
            .for_each(|(mean, &diff)| *mean += diff * scale);

        for i in 0..dim {
            let delta_new = value[i] - self.mean[i];
            for j in 0..dim {
                self.comoment[i * dim + j] += delta_new * delta_old[j];
            }
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    #[cfg(test)]
    pub(crate) fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Unbiased sample covariance, symmetrized, row major.
    pub(crate) fn covariance(&self) -> Option<Vec<f64>> {
        if self.count < 2 {
            return None;
        }
        let dim = self.dim();
        let scale = ((self.count - 1) as f64).recip();
        let mut cov = vec![0f64; dim * dim];
        for i in 0..dim {
            for j in 0..dim {
                let sym = 0.5 * (self.comoment[i * dim + j] + self.comoment[j * dim + i]);
                cov[i * dim + j] = sym * scale;
            }
        }
        Some(cov)
    }
}
