//! Chain sequencer: runs multi-step sound sequences through the dispatcher
//!
//! **Lifecycle per chain id:** Idle -> Running -> {Completed, Aborted}
//!
//! At most one run per chain id is Running at a time. The registry lock is
//! only held to register, signal or unregister a run; every wait (step delay,
//! post-duration, playback) happens outside it and is cancellable by
//! [`ChainSequencer::stop`].

use chrono::NaiveTime;
use klaxon_common::config::{ChainDef, StepCondition};
use klaxon_common::events::{AlertEvent, ChainState};
use klaxon_common::time::{local_time_of_day, millis_to_duration};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::{PlayOutcome, PlayRequest, PlaybackDispatcher, Priority};
use crate::error::{ChainError, PlaybackError};
use crate::sounds::SoundResolver;
use crate::state::SharedState;
use crate::sync::lock;

/// A non-required step that failed during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepFailure {
    pub pass: u32,
    pub step_index: usize,
    pub error: String,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainReport {
    pub chain_id: String,
    /// Identifies this run in logs
    pub run_id: Uuid,
    pub state: ChainState,
    /// Passes fully completed
    pub passes: u32,
    /// Steps played successfully
    pub played: usize,
    /// Steps whose condition did not hold
    pub skipped: usize,
    pub failures: Vec<StepFailure>,
}

impl ChainReport {
    fn new(chain_id: &str, run_id: Uuid) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            run_id,
            state: ChainState::Running,
            passes: 0,
            played: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }
}

/// Shortest time a looping pass may take; idle passes sleep out the rest
const MIN_LOOP_PASS: Duration = Duration::from_millis(50);

type Registry = Arc<Mutex<HashMap<String, watch::Sender<bool>>>>;

/// Unregisters a run when its task finishes or is dropped
struct RunGuard {
    registry: Registry,
    active: Arc<watch::Sender<usize>>,
    chain_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let remaining = {
            let mut running = lock(&self.registry);
            running.remove(&self.chain_id);
            running.len()
        };
        self.active.send_replace(remaining);
    }
}

/// A registered run, ready to execute
struct RunTicket {
    run_id: Uuid,
    chain: Arc<ChainDef>,
    cancel: watch::Receiver<bool>,
    guard: RunGuard,
}

/// Executes chains, one run per chain id at a time
pub struct ChainSequencer {
    resolver: Arc<SoundResolver>,
    dispatcher: Arc<PlaybackDispatcher>,
    state: Arc<SharedState>,
    /// Cancellation senders of running chains
    running: Registry,
    /// Number of registered runs
    active: Arc<watch::Sender<usize>>,
    last_state: Mutex<HashMap<String, ChainState>>,
    rng: Mutex<StdRng>,
    clock: fn() -> NaiveTime,
}

impl ChainSequencer {
    pub fn new(
        resolver: Arc<SoundResolver>,
        dispatcher: Arc<PlaybackDispatcher>,
        state: Arc<SharedState>,
    ) -> Self {
        Self::with_rng(resolver, dispatcher, state, StdRng::from_entropy())
    }

    /// Sequencer with a deterministic source for `chance` conditions
    pub fn with_seed(
        resolver: Arc<SoundResolver>,
        dispatcher: Arc<PlaybackDispatcher>,
        state: Arc<SharedState>,
        seed: u64,
    ) -> Self {
        Self::with_rng(resolver, dispatcher, state, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        resolver: Arc<SoundResolver>,
        dispatcher: Arc<PlaybackDispatcher>,
        state: Arc<SharedState>,
        rng: StdRng,
    ) -> Self {
        Self {
            resolver,
            dispatcher,
            state,
            running: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(watch::channel(0).0),
            last_state: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
            clock: local_time_of_day,
        }
    }

    /// Replace the local time-of-day source used by `within` conditions
    pub fn with_clock(mut self, clock: fn() -> NaiveTime) -> Self {
        self.clock = clock;
        self
    }

    /// Run a chain to completion on the current task
    ///
    /// Returns `Ok` with state Completed, or Aborted if the run was stopped.
    /// A failed required step aborts the run and is returned as an error.
    pub async fn run(&self, chain_id: &str, priority: Priority) -> Result<ChainReport, ChainError> {
        let ticket = self.register(chain_id)?;
        self.execute(chain_id, priority, ticket).await
    }

    /// Register a run and execute it on a new task
    ///
    /// `AlreadyRunning` and `NotFound` are reported here, before spawning.
    pub fn start(
        self: &Arc<Self>,
        chain_id: &str,
        priority: Priority,
    ) -> Result<JoinHandle<Result<ChainReport, ChainError>>, ChainError> {
        let ticket = self.register(chain_id)?;
        let sequencer = Arc::clone(self);
        let chain_id = chain_id.to_string();
        Ok(tokio::spawn(async move {
            sequencer.execute(&chain_id, priority, ticket).await
        }))
    }

    /// Signal a running chain to stop
    ///
    /// The run observes the signal at its next wait or before its next
    /// submission and finishes Aborted.
    pub fn stop(&self, chain_id: &str) -> Result<(), ChainError> {
        let running = lock(&self.running);
        match running.get(chain_id) {
            Some(cancel) => {
                cancel.send_replace(true);
                info!(chain_id, "Stop requested");
                Ok(())
            }
            None => Err(ChainError::NotRunning(chain_id.to_string())),
        }
    }

    /// Signal every running chain to stop; returns how many were signalled
    pub fn stop_all(&self) -> usize {
        let running = lock(&self.running);
        for cancel in running.values() {
            cancel.send_replace(true);
        }
        running.len()
    }

    /// Ids of running chains, sorted
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.running).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Wait until no chain is running
    pub async fn idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|active| *active == 0).await;
    }

    /// Most recent lifecycle state of a chain (Idle if never run)
    pub fn state(&self, chain_id: &str) -> ChainState {
        lock(&self.last_state)
            .get(chain_id)
            .copied()
            .unwrap_or(ChainState::Idle)
    }

    fn register(&self, chain_id: &str) -> Result<RunTicket, ChainError> {
        let chain = self
            .resolver
            .chain(chain_id)
            .map_err(|_| ChainError::NotFound(chain_id.to_string()))?;

        let cancel = {
            let mut running = lock(&self.running);
            if running.contains_key(chain_id) {
                return Err(ChainError::AlreadyRunning(chain_id.to_string()));
            }
            let (tx, rx) = watch::channel(false);
            running.insert(chain_id.to_string(), tx);
            self.active.send_replace(running.len());
            rx
        };

        self.set_state(chain_id, ChainState::Running);
        Ok(RunTicket {
            run_id: Uuid::new_v4(),
            chain,
            cancel,
            guard: RunGuard {
                registry: Arc::clone(&self.running),
                active: Arc::clone(&self.active),
                chain_id: chain_id.to_string(),
            },
        })
    }

    async fn execute(
        &self,
        chain_id: &str,
        priority: Priority,
        ticket: RunTicket,
    ) -> Result<ChainReport, ChainError> {
        let RunTicket {
            run_id,
            chain,
            mut cancel,
            guard,
        } = ticket;

        info!(
            chain_id,
            %run_id,
            steps = chain.steps.len(),
            looping = chain.looping,
            repeat_count = chain.repeat_count,
            "Chain started"
        );

        let result = self
            .step_loop(chain_id, run_id, &chain, priority, &mut cancel)
            .await;
        let state = match &result {
            Ok(report) => report.state,
            Err(_) => ChainState::Aborted,
        };
        self.set_state(chain_id, state);
        drop(guard);

        match &result {
            Ok(report) => info!(
                chain_id,
                %run_id,
                state = ?report.state,
                passes = report.passes,
                played = report.played,
                "Chain finished"
            ),
            Err(e) => warn!(chain_id, %run_id, "{}", e),
        }
        result
    }

    async fn step_loop(
        &self,
        chain_id: &str,
        run_id: Uuid,
        chain: &ChainDef,
        priority: Priority,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<ChainReport, ChainError> {
        let mut report = ChainReport::new(chain_id, run_id);
        // repeat_count counts total passes; 0 and 1 both mean a single pass
        let mut remaining_repeats = chain.repeat_count.saturating_sub(1);

        loop {
            let pass_started = Instant::now();
            let played_before = report.played;

            for (step_index, step) in chain.steps.iter().enumerate() {
                if self.condition_holds(step.condition.as_ref(), report.passes) {
                    if !pause(millis_to_duration(step.delay_before_ms), cancel).await {
                        return Ok(aborted(report));
                    }

                    let resolved = match self.resolver.resolve_sound(&step.sound, step.volume) {
                        Ok(resolved) => resolved,
                        Err(e) => {
                            let error = PlaybackError::Unresolved(e.to_string());
                            self.step_failed(chain_id, step_index, step.required, &error);
                            if step.required {
                                return Err(required_failed(chain_id, step_index, error));
                            }
                            report.failures.push(StepFailure {
                                pass: report.passes,
                                step_index,
                                error: error.to_string(),
                            });
                            if !pause(millis_to_duration(step.post_duration_ms), cancel).await {
                                return Ok(aborted(report));
                            }
                            continue;
                        }
                    };

                    if *cancel.borrow() {
                        return Ok(aborted(report));
                    }

                    debug!(chain_id, step_index, sound = %resolved.sound, "Submitting chain step");
                    let handle = self.dispatcher.submit(PlayRequest {
                        sound: resolved.sound,
                        path: resolved.path,
                        volume: resolved.volume,
                        priority,
                    });
                    let request_id = handle.id();

                    let outcome = tokio::select! {
                        outcome = handle.outcome() => outcome,
                        _ = cancel.wait_for(|stop| *stop) => {
                            // Queued request is withdrawn; one already playing finishes
                            self.dispatcher.cancel(request_id);
                            return Ok(aborted(report));
                        }
                    };

                    match outcome {
                        PlayOutcome::Played => report.played += 1,
                        other => {
                            let error = match other.into_result() {
                                Err(e) => e,
                                Ok(()) => PlaybackError::Output("unexpected outcome".to_string()),
                            };
                            self.step_failed(chain_id, step_index, step.required, &error);
                            if step.required {
                                return Err(required_failed(chain_id, step_index, error));
                            }
                            report.failures.push(StepFailure {
                                pass: report.passes,
                                step_index,
                                error: error.to_string(),
                            });
                        }
                    }
                } else {
                    debug!(chain_id, step_index, "Step condition not met, skipping");
                    report.skipped += 1;
                }

                if !pause(millis_to_duration(step.post_duration_ms), cancel).await {
                    return Ok(aborted(report));
                }
            }

            report.passes += 1;

            if chain.looping {
                let elapsed = pass_started.elapsed();
                if elapsed < MIN_LOOP_PASS {
                    if report.played == played_before {
                        debug!(chain_id, pass = report.passes, "Looping pass played nothing");
                    }
                    if !pause(MIN_LOOP_PASS - elapsed, cancel).await {
                        return Ok(aborted(report));
                    }
                } else if *cancel.borrow() {
                    return Ok(aborted(report));
                }
                continue;
            }
            if remaining_repeats > 0 {
                remaining_repeats -= 1;
                continue;
            }
            break;
        }

        report.state = ChainState::Completed;
        Ok(report)
    }

    fn condition_holds(&self, condition: Option<&StepCondition>, pass: u32) -> bool {
        match condition {
            None => true,
            Some(StepCondition::Chance(probability)) => {
                let roll: f64 = lock(&self.rng).gen();
                roll < *probability
            }
            Some(StepCondition::Within(window)) => window.contains((self.clock)()),
            Some(StepCondition::FirstPass) => pass == 0,
        }
    }

    fn step_failed(&self, chain_id: &str, step_index: usize, required: bool, error: &PlaybackError) {
        warn!(chain_id, step_index, required, "Chain step failed: {}", error);
        self.state.broadcast_event(AlertEvent::ChainStepFailed {
            chain_id: chain_id.to_string(),
            step_index,
            required,
            error: error.to_string(),
            timestamp: klaxon_common::time::now(),
        });
    }

    fn set_state(&self, chain_id: &str, state: ChainState) {
        lock(&self.last_state).insert(chain_id.to_string(), state);
        self.state.broadcast_event(AlertEvent::ChainStateChanged {
            chain_id: chain_id.to_string(),
            state,
            timestamp: klaxon_common::time::now(),
        });
    }
}

/// Wait for `duration` unless cancelled first; false means cancelled
async fn pause(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.wait_for(|stop| *stop) => false,
    }
}

fn aborted(mut report: ChainReport) -> ChainReport {
    report.state = ChainState::Aborted;
    report
}

fn required_failed(chain_id: &str, step_index: usize, error: PlaybackError) -> ChainError {
    ChainError::RequiredStepFailed {
        chain_id: chain_id.to_string(),
        step_index,
        error,
    }
}
