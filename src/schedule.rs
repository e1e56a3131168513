//! Burn-in phasing as an explicit state machine.
//!
//! `BurnIn(0) -> ... -> BurnIn(n - 1) -> Sampling -> Done`. The scheduler
//! only decides what happens next; the sampler carries it out.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    BurnIn(usize),
    Sampling,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run one iteration. `index` counts iterations within the phase.
    Iterate { phase: Phase, index: u64 },
    /// Burn-in phase `k` is complete; adapt the proposals.
    EndPhase(usize),
    /// Burn-in is over; freeze adaptation before the first sampling iteration.
    Freeze,
    /// Sampling is complete.
    Finish,
}

#[derive(Debug, Clone)]
pub struct BurnInScheduler {
    burnin: Vec<u64>,
    samples: u64,
    phase: Phase,
    done_in_phase: u64,
    iterations: u64,
    frozen: bool,
}

impl BurnInScheduler {
    pub fn new(burnin: &[u64], samples: u64) -> Self {
        let phase = if burnin.is_empty() {
            Phase::Sampling
        } else {
            Phase::BurnIn(0)
        };
        Self {
            burnin: burnin.to_vec(),
            samples,
            phase,
            done_in_phase: 0,
            iterations: 0,
            frozen: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of iterations handed out so far, over all phases.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn next_step(&mut self) -> Step {
        match self.phase {
            Phase::BurnIn(k) => {
                if self.done_in_phase < self.burnin[k] {
                    return self.iterate();
                }
                self.done_in_phase = 0;
                self.phase = if k + 1 < self.burnin.len() {
                    Phase::BurnIn(k + 1)
                } else {
                    Phase::Sampling
                };
                Step::EndPhase(k)
            }
            Phase::Sampling => {
                if !self.frozen {
                    self.frozen = true;
                    return Step::Freeze;
                }
                if self.done_in_phase < self.samples {
                    return self.iterate();
                }
                self.phase = Phase::Done;
                Step::Finish
            }
            Phase::Done => Step::Finish,
        }
    }

    fn iterate(&mut self) -> Step {
        let index = self.done_in_phase;
        self.done_in_phase += 1;
        self.iterations += 1;
        Step::Iterate {
            phase: self.phase,
            index,
        }
    }
}
