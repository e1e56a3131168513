//! Collection of samples and diagnostics, and the finalized run output.

use std::sync::Arc;

use arrow::{
    array::{ArrayRef, FixedSizeListBuilder, Float64Array, Float64Builder, StructArray, UInt64Array},
    error::ArrowError,
};
use itertools::Itertools;

use crate::{
    coupling::SwapRecord,
    math::{mean, trapezoid},
};

/// A draw of the cold chain during the sampling phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub theta: Box<[f64]>,
    pub loglike: f64,
    /// Index of the iteration within the sampling phase.
    pub iteration: u64,
}

/// Proposal state of one rung at the end of a burn-in phase.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationRecord {
    pub phase: usize,
    pub rung: usize,
    pub acceptance_rate: Option<f64>,
    pub bandwidth: Box<[f64]>,
    pub scale: f64,
    pub covariance_active: bool,
}

/// Log-likelihood of every rung at every sampling iteration.
///
/// Values are the raw, untempered `log p(x | theta)` of each rung's state,
/// the integrand of the thermodynamic integral over the powers.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticPath {
    loglike: Vec<Vec<f64>>,
}

impl DiagnosticPath {
    pub fn new(rungs: usize) -> Self {
        Self {
            loglike: vec![Vec::new(); rungs],
        }
    }

    pub fn push(&mut self, values: impl ExactSizeIterator<Item = f64>) {
        assert!(values.len() == self.loglike.len());
        self.loglike
            .iter_mut()
            .zip(values)
            .for_each(|(path, val)| path.push(val));
    }

    pub fn rungs(&self) -> usize {
        self.loglike.len()
    }

    /// Number of recorded iterations.
    pub fn len(&self) -> usize {
        self.loglike.first().map(|path| path.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rung(&self, rung: usize) -> &[f64] {
        &self.loglike[rung]
    }

    pub fn mean_loglike(&self) -> Option<Vec<f64>> {
        self.loglike.iter().map(|path| mean(path)).collect()
    }
}

/// Thermodynamic integration of the mean log-likelihood over the ladder.
///
/// Estimates the log marginal likelihood with the trapezoidal rule. Needs at
/// least two rungs and one recorded iteration.
pub fn thermodynamic_integral(betas: &[f64], path: &DiagnosticPath) -> Option<f64> {
    if betas.len() < 2 || betas.len() != path.rungs() {
        return None;
    }
    let means = path.mean_loglike()?;
    Some(trapezoid(betas, &means))
}

pub struct OutputCollector {
    chain: u64,
    betas: Vec<f64>,
    dim: usize,
    samples: Vec<Sample>,
    swaps: Vec<SwapRecord>,
    path: DiagnosticPath,
    adaptation: Vec<AdaptationRecord>,
}

impl OutputCollector {
    pub fn new(chain: u64, betas: Vec<f64>, dim: usize, capacity: usize) -> Self {
        let rungs = betas.len();
        Self {
            chain,
            betas,
            dim,
            samples: Vec::with_capacity(capacity),
            swaps: Vec::with_capacity(capacity * rungs.saturating_sub(1)),
            path: DiagnosticPath::new(rungs),
            adaptation: Vec::new(),
        }
    }

    pub fn push_sample(&mut self, sample: Sample) {
        assert!(sample.theta.len() == self.dim);
        self.samples.push(sample);
    }

    pub fn push_swaps(&mut self, records: impl IntoIterator<Item = SwapRecord>) {
        self.swaps.extend(records);
    }

    pub fn push_path(&mut self, loglike: impl ExactSizeIterator<Item = f64>) {
        self.path.push(loglike);
    }

    pub fn push_adaptation(&mut self, record: AdaptationRecord) {
        self.adaptation.push(record);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Assemble the run output and its summary statistics.
    ///
    /// `acceptance` holds the acceptance rate of each rung over the sampling phase.
    pub fn finalize(self, acceptance: Vec<Option<f64>>, iterations: u64, cancelled: bool) -> RunOutput {
        let num_pairs = self.betas.len().saturating_sub(1);
        let mut counts = vec![(0u64, 0u64); num_pairs];
        for record in self.swaps.iter().filter(|record| record.attempted) {
            let (attempted, accepted) = &mut counts[record.lower];
            *attempted += 1;
            *accepted += record.accepted as u64;
        }
        let swap_rates = counts
            .into_iter()
            .map(|(attempted, accepted)| {
                (attempted > 0).then(|| accepted as f64 / attempted as f64)
            })
            .collect_vec();
        let log_marginal_likelihood = thermodynamic_integral(&self.betas, &self.path);

        RunOutput {
            chain: self.chain,
            betas: self.betas,
            samples: self.samples,
            swaps: self.swaps,
            path: self.path,
            adaptation: self.adaptation,
            acceptance,
            swap_rates,
            log_marginal_likelihood,
            iterations,
            cancelled,
        }
    }
}

/// Result of one replicate run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub chain: u64,
    /// Tempering powers of the rungs, hottest first.
    pub betas: Vec<f64>,
    pub samples: Vec<Sample>,
    /// Swap records of the sampling phase.
    pub swaps: Vec<SwapRecord>,
    pub path: DiagnosticPath,
    pub adaptation: Vec<AdaptationRecord>,
    /// Acceptance rate of each rung during sampling.
    pub acceptance: Vec<Option<f64>>,
    /// Acceptance rate of each adjacent pair, `None` if no swap was attempted.
    pub swap_rates: Vec<Option<f64>>,
    pub log_marginal_likelihood: Option<f64>,
    /// Iterations completed over burn-in and sampling.
    pub iterations: u64,
    /// The run was stopped before the sampling phase completed.
    pub cancelled: bool,
}

impl RunOutput {
    pub fn dim(&self) -> Option<usize> {
        self.samples.first().map(|sample| sample.theta.len())
    }

    pub fn posterior_mean(&self) -> Option<Vec<f64>> {
        let dim = self.dim()?;
        let n = self.samples.len() as f64;
        Some(
            (0..dim)
                .map(|i| self.samples.iter().map(|s| s.theta[i]).sum::<f64>() / n)
                .collect(),
        )
    }

    /// Unbiased per-dimension posterior variance.
    pub fn posterior_variance(&self) -> Option<Vec<f64>> {
        if self.samples.len() < 2 {
            return None;
        }
        let means = self.posterior_mean()?;
        let n = self.samples.len() as f64;
        Some(
            means
                .iter()
                .enumerate()
                .map(|(i, &mean)| {
                    self.samples
                        .iter()
                        .map(|s| (s.theta[i] - mean).powi(2))
                        .sum::<f64>()
                        / (n - 1.)
                })
                .collect(),
        )
    }

    /// The samples as an arrow struct with fields `theta`, `loglike` and `iteration`.
    pub fn samples_array(&self) -> Result<StructArray, ArrowError> {
        let dim = self.dim().unwrap_or(0);
        let mut theta = FixedSizeListBuilder::new(Float64Builder::new(), dim as i32);
        for sample in self.samples.iter() {
            theta.values().append_slice(&sample.theta);
            theta.append(true);
        }
        let theta: ArrayRef = Arc::new(theta.finish());
        let loglike: ArrayRef = Arc::new(Float64Array::from_iter_values(
            self.samples.iter().map(|s| s.loglike),
        ));
        let iteration: ArrayRef = Arc::new(UInt64Array::from_iter_values(
            self.samples.iter().map(|s| s.iteration),
        ));
        StructArray::try_from(vec![
            ("theta", theta),
            ("loglike", loglike),
            ("iteration", iteration),
        ])
    }

    /// The diagnostic path as an arrow struct with one field `rung_k` per rung.
    pub fn path_array(&self) -> Result<StructArray, ArrowError> {
        let names = (0..self.path.rungs())
            .map(|rung| format!("rung_{}", rung))
            .collect_vec();
        let columns = names
            .iter()
            .enumerate()
            .map(|(rung, name)| {
                let values: ArrayRef =
                    Arc::new(Float64Array::from(self.path.rung(rung).to_vec()));
                (name.as_str(), values)
            })
            .collect_vec();
        StructArray::try_from(columns)
    }
}
