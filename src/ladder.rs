//! The tempering ladder.

use crate::{
    chain::{Chain, SamplerError},
    config::Configuration,
    model::LogDensity,
    proposal::ProposalTuner,
    transform::ParameterSpace,
};

/// Tempering powers `(k / (rungs - 1))^gti_pow`, ordered from the hottest
/// rung (`beta = 0`) to the cold target rung (`beta = 1`).
///
/// A single rung is untempered.
pub fn ladder_powers(rungs: usize, gti_pow: f64) -> Vec<f64> {
    assert!(rungs >= 1);
    if rungs == 1 {
        return vec![1.];
    }
    let last = (rungs - 1) as f64;
    (0..rungs)
        .map(|k| {
            if k == rungs - 1 {
                // Exact, independent of rounding in powf
                1.
            } else {
                (k as f64 / last).powf(gti_pow)
            }
        })
        .collect()
}

/// All chains of one replicate, owned by value in ladder order.
#[derive(Debug, Clone)]
pub struct RungLadder {
    chains: Vec<Chain>,
    coupling_on: Vec<bool>,
}

impl RungLadder {
    /// Start every rung at the configured initial values.
    pub fn new<M: LogDensity>(
        config: &Configuration,
        space: &ParameterSpace,
        model: &M,
    ) -> Result<Self, SamplerError> {
        let powers = ladder_powers(config.num_rungs(), config.gti_pow());
        let init = space.initial_state()?;
        let chains = config
            .rungs()
            .iter()
            .zip(powers)
            .enumerate()
            .map(|(rung, (spec, beta))| {
                let tuner = ProposalTuner::new(
                    space.dim(),
                    config.adapt_options(),
                    spec.bw_update,
                    spec.cov_update,
                );
                Chain::new(rung, beta, init.clone(), tuner, model, config.x())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let coupling_on = config.rungs().iter().map(|spec| spec.coupling_on).collect();
        Ok(Self {
            chains,
            coupling_on,
        })
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub(crate) fn chains_mut(&mut self) -> &mut [Chain] {
        &mut self.chains
    }

    pub fn betas(&self) -> Vec<f64> {
        self.chains.iter().map(|chain| chain.beta()).collect()
    }

    /// The untempered target chain.
    pub fn cold(&self) -> &Chain {
        self.chains
            .last()
            .expect("A ladder always contains at least one rung")
    }

    pub fn coupling_on(&self, rung: usize) -> bool {
        self.coupling_on[rung]
    }

    /// Mutable access to the adjacent rungs `rung` and `rung + 1`.
    pub(crate) fn pair_mut(&mut self, rung: usize) -> (&mut Chain, &mut Chain) {
        let (lower, upper) = self.chains.split_at_mut(rung + 1);
        (&mut lower[rung], &mut upper[0])
    }
}
