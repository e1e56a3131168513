use anyhow::{bail, Context, Result};
use itertools::Itertools;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::{prelude::*, ScopeFifo, ThreadPoolBuilder};
use std::{
    sync::{
        mpsc::{
            channel, sync_channel, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError,
        },
        Arc, Mutex,
    },
    thread::{spawn, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    chain::SamplerError,
    config::Configuration,
    coupling::CouplingEngine,
    ladder::RungLadder,
    model::LogDensity,
    output::{OutputCollector, RunOutput, Sample},
    schedule::{BurnInScheduler, Phase, Step},
    transform::ParameterSpace,
};

/// Polled at every iteration boundary to decide whether a run goes on.
pub trait StopCheck {
    /// Return `true` to stop the run. Implementations may block while paused.
    fn should_stop(&mut self) -> bool;
}

/// Never stops.
impl StopCheck for () {
    fn should_stop(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicateCommand {
    Pause,
    Resume,
}

/// Stops when the sending side is gone, and blocks between `Pause` and `Resume`.
impl StopCheck for Receiver<ReplicateCommand> {
    fn should_stop(&mut self) -> bool {
        let mut msg = self.try_recv();
        loop {
            match msg {
                Err(TryRecvError::Disconnected) => return true,
                Err(TryRecvError::Empty) => return false,
                Ok(ReplicateCommand::Pause) => {
                    msg = self.recv().map_err(|_| TryRecvError::Disconnected);
                }
                Ok(ReplicateCommand::Resume) => return false,
            }
        }
    }
}

/// Random number generator of a replicate: one ChaCha8 stream per replicate.
pub fn replicate_rng(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// A single replicate: the ladder of chains, driven through burn-in and sampling.
pub struct ReplicateRun<'model, M: LogDensity> {
    config: Configuration,
    model: &'model M,
    space: ParameterSpace,
    ladder: RungLadder,
    coupling: CouplingEngine,
    scheduler: BurnInScheduler,
    collector: OutputCollector,
    rng: ChaCha8Rng,
}

impl<'model, M: LogDensity> ReplicateRun<'model, M> {
    pub fn new(
        config: Configuration,
        model: &'model M,
        rng: ChaCha8Rng,
    ) -> Result<Self, SamplerError> {
        let space = ParameterSpace::new(config.parameters())?;
        let ladder = RungLadder::new(&config, &space, model)?;
        let scheduler = BurnInScheduler::new(config.burnin(), config.samples());
        let collector = OutputCollector::new(
            config.chain(),
            ladder.betas(),
            space.dim(),
            config.samples().min(1 << 16) as usize,
        );
        Ok(Self {
            config,
            model,
            space,
            ladder,
            coupling: CouplingEngine::new(),
            scheduler,
            collector,
            rng,
        })
    }

    pub fn phase(&self) -> Phase {
        self.scheduler.phase()
    }

    /// Iterations completed so far, over all phases.
    pub fn iterations(&self) -> u64 {
        self.scheduler.iterations()
    }

    pub fn ladder(&self) -> &RungLadder {
        &self.ladder
    }

    /// Run until the next iteration is complete. Returns `true` once the run is over.
    pub fn advance(&mut self) -> Result<bool, SamplerError> {
        loop {
            match self.scheduler.next_step() {
                Step::Iterate { phase, index } => {
                    self.iterate(phase, index)?;
                    return Ok(false);
                }
                Step::EndPhase(phase) => {
                    for chain in self.ladder.chains_mut() {
                        if let Some(record) = chain.adapt(phase) {
                            self.collector.push_adaptation(record);
                        }
                    }
                }
                Step::Freeze => {
                    self.ladder.chains_mut().iter_mut().for_each(|chain| chain.freeze());
                }
                Step::Finish => return Ok(true),
            }
        }
    }

    fn iterate(&mut self, phase: Phase, index: u64) -> Result<(), SamplerError> {
        for chain in self.ladder.chains_mut() {
            chain.step(&self.space, self.model, self.config.x(), &mut self.rng)?;
        }
        let iteration = self.scheduler.iterations() - 1;
        let swaps = self
            .coupling
            .attempt_swap(&mut self.ladder, iteration, &mut self.rng);

        if phase == Phase::Sampling {
            self.collector.push_swaps(swaps);
            let cold = self.ladder.cold();
            self.collector.push_sample(Sample {
                theta: cold.theta().into(),
                loglike: cold.loglike(),
                iteration: index,
            });
            self.collector
                .push_path(self.ladder.chains().iter().map(|chain| chain.loglike()));
        }
        Ok(())
    }

    /// Run to completion, or until `stop` asks to stop.
    pub fn run<S: StopCheck + ?Sized>(mut self, stop: &mut S) -> Result<RunOutput, SamplerError> {
        loop {
            if stop.should_stop() {
                return Ok(self.finish(true));
            }
            if self.advance()? {
                return Ok(self.finish(false));
            }
        }
    }

    /// Finalize the output collected so far.
    ///
    /// Acceptance rates only cover the sampling phase and are missing if it
    /// was never reached.
    pub fn finish(self, cancelled: bool) -> RunOutput {
        let sampling = self.scheduler.is_frozen();
        let acceptance = self
            .ladder
            .chains()
            .iter()
            .map(|chain| chain.acceptance_rate().filter(|_| sampling))
            .collect_vec();
        let iterations = self.scheduler.iterations();
        tracing::info!(
            chain = self.config.chain(),
            iterations,
            cold_acceptance = ?acceptance.last().copied().flatten(),
            cancelled,
            "replicate finished"
        );
        self.collector.finalize(acceptance, iterations, cancelled)
    }
}

/// Run one replicate to completion.
pub fn sample_replicate<M: LogDensity>(
    config: &Configuration,
    model: &M,
    seed: u64,
) -> Result<RunOutput, SamplerError> {
    ReplicateRun::new(config.clone(), model, replicate_rng(seed, 0))?.run(&mut ())
}

/// Run independent replicates in parallel.
///
/// Replicate `i` uses stream `i` of the generator seeded with `seed`.
pub fn sample_replicates<M: LogDensity>(
    configs: &[Configuration],
    model: &M,
    seed: u64,
) -> Result<Trace, SamplerError> {
    let outputs = configs
        .par_iter()
        .enumerate()
        .map(|(stream, config)| {
            ReplicateRun::new(config.clone(), model, replicate_rng(seed, stream as u64))?
                .run(&mut ())
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(outputs.into_iter().into())
}

#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct ReplicateProgress {
    pub chain: u64,
    pub finished_iterations: u64,
    pub total_iterations: u64,
    pub phase: Phase,
    pub started: bool,
    pub cold_acceptance_rate: Option<f64>,
    pub runtime: Duration,
}

impl ReplicateProgress {
    fn new(config: &Configuration) -> Self {
        Self {
            chain: config.chain(),
            finished_iterations: 0,
            total_iterations: config.total_iterations(),
            phase: BurnInScheduler::new(config.burnin(), config.samples()).phase(),
            started: false,
            cold_acceptance_rate: None,
            runtime: Duration::ZERO,
        }
    }

    fn update<M: LogDensity>(&mut self, run: &ReplicateRun<M>, duration: Duration) {
        self.finished_iterations = run.iterations();
        self.phase = run.phase();
        self.cold_acceptance_rate = run.ladder().cold().acceptance_rate();
        self.runtime += duration;
    }
}

/// Outputs of all replicates, ordered by `chain`.
#[derive(Debug, Clone)]
pub struct Trace {
    pub replicates: Vec<RunOutput>,
}

impl<I: Iterator<Item = RunOutput>> From<I> for Trace {
    fn from(value: I) -> Self {
        let mut replicates = value.into_iter().collect_vec();
        replicates.sort_by_key(|output| output.chain);
        Trace { replicates }
    }
}

type OutputSlot = Arc<Mutex<Option<RunOutput>>>;

struct ReplicateProcess {
    stop_marker: Sender<ReplicateCommand>,
    output: OutputSlot,
    progress: Arc<Mutex<ReplicateProgress>>,
}

impl ReplicateProcess {
    fn start<'scope, 'model: 'scope, M: LogDensity>(
        model: &'model M,
        config: Configuration,
        seed: u64,
        stream: u64,
        scope: &ScopeFifo<'scope>,
        results: Sender<Result<()>>,
    ) -> Self {
        let (stop_marker_tx, stop_marker_rx) = channel();

        let output = Arc::new(Mutex::new(None));
        let progress = Arc::new(Mutex::new(ReplicateProgress::new(&config)));

        let output_inner = output.clone();
        let progress_inner = progress.clone();

        scope.spawn_fifo(move |_| {
            let output = output_inner;
            let progress = progress_inner;
            let mut stop = stop_marker_rx;

            let sample = move || -> Result<()> {
                let chain = config.chain();
                let mut run = ReplicateRun::new(config, model, replicate_rng(seed, stream))
                    .with_context(|| format!("Failed to initialize replicate {}", chain))?;
                progress.lock().expect("Poisoned mutex").started = true;

                let completed = loop {
                    if stop.should_stop() {
                        break false;
                    }
                    let now = Instant::now();
                    let done = run
                        .advance()
                        .with_context(|| format!("Sampling failed in replicate {}", chain))?;
                    progress
                        .lock()
                        .expect("Poisoned mutex")
                        .update(&run, now.elapsed());
                    if done {
                        break true;
                    }
                };
                *output.lock().expect("Poisoned mutex") = Some(run.finish(!completed));
                Ok(())
            };

            let result = sample();

            results
                .send(result)
                .expect("Could not send sampling results to main thread.");
            drop(results);
        });

        Self {
            stop_marker: stop_marker_tx,
            output,
            progress,
        }
    }

    fn progress(&self) -> ReplicateProgress {
        self.progress.lock().expect("Poisoned lock").clone()
    }

    fn resume(&self) -> Result<()> {
        self.stop_marker.send(ReplicateCommand::Resume)?;
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.stop_marker.send(ReplicateCommand::Pause)?;
        Ok(())
    }

    /// Signal the worker to stop. Its output is available once the scope has ended.
    fn finalize(self) -> OutputSlot {
        drop(self.stop_marker);
        self.output
    }
}

#[derive(Debug)]
enum SamplerCommand {
    Pause,
    Continue,
    Progress,
}

enum SamplerResponse {
    Ok(),
    Progress(Box<[ReplicateProgress]>),
}

pub enum SamplerWaitResult {
    Trace(Trace),
    Timeout(Sampler),
    Err(anyhow::Error, Option<Trace>),
}

pub struct ProgressCallback {
    pub callback: Box<dyn FnMut(Duration, Box<[ReplicateProgress]>) + Send>,
    pub rate: Duration,
}

/// Runs replicates in the background on a rayon thread pool.
pub struct Sampler {
    main_thread: JoinHandle<Result<Vec<RunOutput>>>,
    commands: SyncSender<SamplerCommand>,
    responses: Receiver<SamplerResponse>,
    results: Receiver<Result<()>>,
}

fn report(callback: &mut Option<ProgressCallback>, replicates: &[ReplicateProcess], elapsed: Duration) {
    if let Some(ProgressCallback { callback, .. }) = callback {
        let progress = replicates.iter().map(|rep| rep.progress()).collect_vec();
        callback(elapsed, progress.into());
    }
}

impl Sampler {
    /// Start one replicate per configuration. Replicate `i` uses stream `i`
    /// of the generator seeded with `seed`.
    pub fn new<M: LogDensity + 'static>(
        model: M,
        configs: Vec<Configuration>,
        seed: u64,
        num_cores: usize,
        callback: Option<ProgressCallback>,
    ) -> Result<Self> {
        if configs.is_empty() {
            bail!("No replicates to run");
        }
        let (commands_tx, commands_rx) = sync_channel(0);
        let (responses_tx, responses_rx) = sync_channel(0);
        let (results_tx, results_rx) = channel();

        let main_thread = spawn(move || -> Result<Vec<RunOutput>> {
            let pool = ThreadPoolBuilder::new()
                .num_threads(num_cores.max(1) + 1) // The controller occupies one thread
                .thread_name(|i| format!("tempered-mh-worker-{}", i))
                .build()
                .context("Could not start thread pool")?;

            let model_ref = &model;
            let mut callback = callback;

            let slots = pool.scope_fifo(move |scope| {
                let results = results_tx;
                let replicates = configs
                    .into_iter()
                    .enumerate()
                    .map(|(stream, config)| {
                        ReplicateProcess::start(
                            model_ref,
                            config,
                            seed,
                            stream as u64,
                            scope,
                            results.clone(),
                        )
                    })
                    .collect_vec();
                drop(results);

                let mut main_loop = || {
                    let start_time = Instant::now();
                    let mut pause_start = Instant::now();
                    let mut pause_time = Duration::ZERO;
                    let mut is_paused = false;

                    let elapsed = |pause_time: Duration, is_paused: bool, pause_start: Instant| {
                        let mut elapsed = start_time.elapsed().saturating_sub(pause_time);
                        if is_paused {
                            elapsed = elapsed.saturating_sub(pause_start.elapsed());
                        }
                        elapsed
                    };

                    let progress_rate = callback
                        .as_ref()
                        .map(|callback| callback.rate)
                        .unwrap_or(Duration::MAX);
                    report(&mut callback, &replicates, Duration::ZERO);
                    let mut last_progress = Instant::now();

                    loop {
                        let timeout = progress_rate.checked_sub(last_progress.elapsed());
                        let timeout = timeout.unwrap_or_else(|| {
                            report(
                                &mut callback,
                                &replicates,
                                elapsed(pause_time, is_paused, pause_start),
                            );
                            last_progress = Instant::now();
                            progress_rate
                        });

                        match commands_rx.recv_timeout(timeout) {
                            Ok(SamplerCommand::Pause) => {
                                for replicate in replicates.iter() {
                                    // Fails for replicates that are already done
                                    let _ = replicate.pause();
                                }
                                if !is_paused {
                                    pause_start = Instant::now();
                                }
                                is_paused = true;
                                responses_tx.send(SamplerResponse::Ok())?;
                            }
                            Ok(SamplerCommand::Continue) => {
                                for replicate in replicates.iter() {
                                    let _ = replicate.resume();
                                }
                                if is_paused {
                                    pause_time += pause_start.elapsed();
                                }
                                is_paused = false;
                                responses_tx.send(SamplerResponse::Ok())?;
                            }
                            Ok(SamplerCommand::Progress) => {
                                let progress = replicates
                                    .iter()
                                    .map(|replicate| replicate.progress())
                                    .collect_vec();
                                responses_tx.send(SamplerResponse::Progress(progress.into()))?;
                            }
                            Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => {
                                report(
                                    &mut callback,
                                    &replicates,
                                    elapsed(pause_time, is_paused, pause_start),
                                );
                                return Ok(());
                            }
                        };
                    }
                };
                let result: Result<()> = main_loop();
                // Stop the workers even if the controller failed
                let slots = replicates
                    .into_iter()
                    .map(ReplicateProcess::finalize)
                    .collect_vec();
                result.map(|()| slots)
            })?;

            // The scope has joined all workers, so every slot is final
            Ok(slots
                .into_iter()
                .filter_map(|slot| slot.lock().expect("Poisoned mutex").take())
                .collect_vec())
        });

        Ok(Self {
            main_thread,
            commands: commands_tx,
            responses: responses_rx,
            results: results_rx,
        })
    }

    pub fn pause(&mut self) -> Result<()> {
        self.commands
            .send(SamplerCommand::Pause)
            .context("Could not send pause command to controller thread")?;
        let response = self
            .responses
            .recv()
            .context("Could not receive pause response from controller thread")?;
        let SamplerResponse::Ok() = response else {
            bail!("Got invalid response from sample controller thread");
        };
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.commands.send(SamplerCommand::Continue)?;
        let response = self.responses.recv()?;
        let SamplerResponse::Ok() = response else {
            bail!("Got invalid response from sample controller thread");
        };
        Ok(())
    }

    /// Stop all replicates and collect their outputs, partial ones included.
    pub fn abort(self) -> (Result<()>, Option<Trace>) {
        drop(self.commands);
        let result = self.main_thread.join();
        let error = self.results.try_iter().find_map(|result| result.err());
        match result {
            Err(payload) => std::panic::resume_unwind(payload),
            Ok(Ok(outputs)) => {
                let trace: Trace = outputs.into_iter().into();
                match error {
                    Some(err) => (Err(err), Some(trace)),
                    None => (Ok(()), Some(trace)),
                }
            }
            Ok(Err(err)) => (Err(err), None),
        }
    }

    pub fn wait_timeout(self, timeout: Duration) -> SamplerWaitResult {
        let start = Instant::now();
        let mut remaining = Some(timeout);
        while let Some(left) = remaining {
            match self.results.recv_timeout(left) {
                Ok(Ok(())) => remaining = timeout.checked_sub(start.elapsed()),
                Ok(Err(err)) => {
                    let (_, trace) = self.abort();
                    return SamplerWaitResult::Err(err, trace);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let (res, trace) = self.abort();
                    if let Err(err) = res {
                        return SamplerWaitResult::Err(err, trace);
                    }
                    let Some(trace) = trace else {
                        return SamplerWaitResult::Err(
                            anyhow::anyhow!("Sampler finished without output"),
                            None,
                        );
                    };
                    return SamplerWaitResult::Trace(trace);
                }
                Err(RecvTimeoutError::Timeout) => break,
            }
        }
        SamplerWaitResult::Timeout(self)
    }

    pub fn progress(&mut self) -> Result<Box<[ReplicateProgress]>> {
        self.commands.send(SamplerCommand::Progress)?;
        let response = self.responses.recv()?;
        let SamplerResponse::Progress(progress) = response else {
            bail!("Got invalid response from sample controller thread");
        };
        Ok(progress)
    }
}
