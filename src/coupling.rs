//! State exchange between adjacent rungs (Metropolis coupling).

use rand::Rng;

use crate::{chain::Chain, ladder::RungLadder, math::metropolis_accept};

/// Outcome of one swap proposal between rungs `lower` and `lower + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRecord {
    pub iteration: u64,
    pub lower: usize,
    pub upper: usize,
    /// Both rungs have coupling enabled, so the swap rule was evaluated.
    pub attempted: bool,
    pub accepted: bool,
}

/// Log acceptance probability of exchanging the states of two rungs.
///
/// `(beta_upper - beta_lower) * (loglike_lower - loglike_upper)`, which keeps
/// the product of the tempered targets invariant. Equal powers or equal
/// log-likelihoods always accept.
pub fn swap_log_acceptance(
    beta_lower: f64,
    beta_upper: f64,
    loglike_lower: f64,
    loglike_upper: f64,
) -> f64 {
    if beta_lower == beta_upper || loglike_lower == loglike_upper {
        return 0.;
    }
    (beta_upper - beta_lower) * (loglike_lower - loglike_upper)
}

#[derive(Debug, Clone, Default)]
pub struct CouplingEngine {}

impl CouplingEngine {
    pub fn new() -> Self {
        Self {}
    }

    /// One pass over all adjacent pairs, from the hottest to the coldest.
    ///
    /// Swaps are applied immediately, so a state can move more than one
    /// rung in a single pass. Returns a record for every pair.
    pub fn attempt_swap<R: Rng + ?Sized>(
        &self,
        ladder: &mut RungLadder,
        iteration: u64,
        rng: &mut R,
    ) -> Vec<SwapRecord> {
        (0..ladder.len().saturating_sub(1))
            .map(|lower| {
                let attempted = ladder.coupling_on(lower) & ladder.coupling_on(lower + 1);
                let accepted = attempted && {
                    let (first, second) = ladder.pair_mut(lower);
                    let log_ratio = swap_log_acceptance(
                        first.beta(),
                        second.beta(),
                        first.loglike(),
                        second.loglike(),
                    );
                    let accept = metropolis_accept(log_ratio, || rng.random::<f64>().ln());
                    if accept {
                        Chain::exchange(first, second);
                    }
                    accept
                };
                SwapRecord {
                    iteration,
                    lower,
                    upper: lower + 1,
                    attempted,
                    accepted,
                }
            })
            .collect()
    }
}
