//! Alert engine: composes detection, gating, cooldown, resolution and playback
//!
//! **Flow per snapshot:**
//! 1. TransitionDetector classifies the snapshot into zero or more transitions
//! 2. The upstream [`AlertGate`] may veto each transition
//! 3. The monitor's alert route for the tier picks an event reference
//! 4. CooldownGate enforces the tier's minimum re-alert interval per key
//! 5. SoundResolver maps the reference to a playback unit, which goes to the
//!    dispatcher (sound, pool) or the chain sequencer (chain)
//!
//! Nothing here fails the caller: each transition gets an [`AlertOutcome`],
//! and resolution problems are logged and skipped.

use klaxon_common::config::{CooldownConfig, EventRef, KlaxonConfig};
use klaxon_common::events::{AlertEvent, SuppressionReason};
use klaxon_common::{Snapshot, Tier, TransitionEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alerts::{cooldown_key, AlertGate, AllowAll, CooldownGate, TransitionDetector};
use crate::audio::AudioOutput;
use crate::error::{ChainError, ResolveError};
use crate::playback::{ChainSequencer, PlayHandle, PlayRequest, PlaybackDispatcher, Priority};
use crate::sounds::{PlaybackUnit, ResolvedSound, SoundResolver};
use crate::state::{Counters, SharedState};

/// What happened to one transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertOutcome {
    /// Sound submitted to the dispatcher
    Dispatched {
        key: String,
        tier: Tier,
        sound: String,
        request_id: u64,
    },
    /// Chain run started
    ChainStarted {
        key: String,
        tier: Tier,
        chain_id: String,
    },
    /// Upstream gate said no
    Vetoed { key: String, tier: Tier },
    /// Key alerted on this tier too recently
    CoolingDown {
        key: String,
        tier: Tier,
        remaining_ms: u64,
    },
    /// Monitor has no alert for this tier
    Unrouted { key: String, tier: Tier },
    /// Route could not be played (unknown id, chain already running)
    Failed {
        key: String,
        tier: Tier,
        error: String,
    },
}

/// Engine status for operators
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub counters: Counters,
    pub running_chains: Vec<String>,
    pub queued: usize,
    pub tracked_keys: usize,
    pub cooldowns: usize,
}

pub struct AlertEngine {
    detector: TransitionDetector,
    cooldowns: CooldownGate,
    cooldown_config: CooldownConfig,
    idle_eviction: Option<Duration>,
    gate: Arc<dyn AlertGate>,
    resolver: Arc<SoundResolver>,
    dispatcher: Arc<PlaybackDispatcher>,
    sequencer: Arc<ChainSequencer>,
    state: Arc<SharedState>,
}

impl AlertEngine {
    pub fn new(config: &KlaxonConfig, output: Arc<dyn AudioOutput>, state: Arc<SharedState>) -> Self {
        let resolver = Arc::new(SoundResolver::new(config));
        let dispatcher = Arc::new(PlaybackDispatcher::new(
            output,
            config.dispatcher.max_queue_len,
            Arc::clone(&state),
        ));
        let sequencer = Arc::new(ChainSequencer::new(
            Arc::clone(&resolver),
            Arc::clone(&dispatcher),
            Arc::clone(&state),
        ));
        Self::assemble(config, resolver, dispatcher, sequencer, state)
    }

    /// Engine whose pool picks and chain conditions are reproducible
    pub fn with_seed(
        config: &KlaxonConfig,
        output: Arc<dyn AudioOutput>,
        state: Arc<SharedState>,
        seed: u64,
    ) -> Self {
        let resolver = Arc::new(SoundResolver::with_seed(config, seed));
        let dispatcher = Arc::new(PlaybackDispatcher::new(
            output,
            config.dispatcher.max_queue_len,
            Arc::clone(&state),
        ));
        let sequencer = Arc::new(ChainSequencer::with_seed(
            Arc::clone(&resolver),
            Arc::clone(&dispatcher),
            Arc::clone(&state),
            seed,
        ));
        Self::assemble(config, resolver, dispatcher, sequencer, state)
    }

    fn assemble(
        config: &KlaxonConfig,
        resolver: Arc<SoundResolver>,
        dispatcher: Arc<PlaybackDispatcher>,
        sequencer: Arc<ChainSequencer>,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            detector: TransitionDetector::new(&config.monitors),
            cooldowns: CooldownGate::new(),
            cooldown_config: config.cooldowns.clone(),
            idle_eviction: config.detector.idle_eviction(),
            gate: Arc::new(AllowAll),
            resolver,
            dispatcher,
            sequencer,
            state,
        }
    }

    /// Install an upstream gate (quiet hours, profiles)
    pub fn with_gate(mut self, gate: Arc<dyn AlertGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Start the playback consumer
    pub fn start(&self) -> JoinHandle<()> {
        Arc::clone(&self.dispatcher).start()
    }

    /// Feed one snapshot through the pipeline
    pub fn ingest(&self, snapshot: &Snapshot) -> Vec<AlertOutcome> {
        self.state.record_snapshot();
        self.detector
            .evaluate(snapshot)
            .into_iter()
            .map(|transition| self.handle_transition(transition))
            .collect()
    }

    fn handle_transition(&self, transition: TransitionEvent) -> AlertOutcome {
        let key = transition.key.clone();
        let tier = transition.tier;
        info!(key = %key, tier = %tier, value = %transition.value, "Transition detected");
        self.state.broadcast_event(AlertEvent::TransitionDetected {
            key: key.clone(),
            tier,
            value: transition.value.to_string(),
            timestamp: transition.timestamp,
        });

        if !self.gate.permits(&transition) {
            debug!(key = %key, tier = %tier, "Alert vetoed by gate");
            self.suppressed(&key, tier, SuppressionReason::Vetoed);
            return AlertOutcome::Vetoed { key, tier };
        }

        let Some(reference) = self.route(&key, tier) else {
            debug!(key = %key, tier = %tier, "No alert routed for tier");
            self.suppressed(&key, tier, SuppressionReason::Unrouted);
            return AlertOutcome::Unrouted { key, tier };
        };

        let cooldown = cooldown_key(&key, tier);
        let interval = self.cooldown_config.interval(tier);
        if !self.cooldowns.allow(&cooldown, interval) {
            let remaining = self.cooldowns.remaining(&cooldown, interval);
            self.suppressed(&key, tier, SuppressionReason::CoolingDown);
            return AlertOutcome::CoolingDown {
                key,
                tier,
                remaining_ms: remaining.as_millis() as u64,
            };
        }

        let priority = match tier {
            Tier::Critical => Priority::Critical,
            _ => Priority::Normal,
        };

        match self.dispatch(&reference, priority) {
            Ok(Dispatch::Sound { sound, request_id }) => {
                self.state.broadcast_event(AlertEvent::AlertDispatched {
                    key: key.clone(),
                    tier,
                    sound: sound.clone(),
                    timestamp: klaxon_common::time::now(),
                });
                AlertOutcome::Dispatched {
                    key,
                    tier,
                    sound,
                    request_id,
                }
            }
            Ok(Dispatch::Chain(chain_id)) => {
                self.state.broadcast_event(AlertEvent::AlertDispatched {
                    key: key.clone(),
                    tier,
                    sound: reference.to_string(),
                    timestamp: klaxon_common::time::now(),
                });
                AlertOutcome::ChainStarted { key, tier, chain_id }
            }
            Err(error) => {
                warn!(key = %key, tier = %tier, reference = %reference, "Skipping alert: {}", error);
                AlertOutcome::Failed { key, tier, error }
            }
        }
    }

    fn dispatch(&self, reference: &EventRef, priority: Priority) -> Result<Dispatch, String> {
        match self.resolver.resolve(reference).map_err(|e| e.to_string())? {
            PlaybackUnit::Chain(chain_id) => {
                // The run reports its own result; only registration errors surface here
                self.sequencer
                    .start(&chain_id, priority)
                    .map_err(|e| e.to_string())?;
                Ok(Dispatch::Chain(chain_id))
            }
            PlaybackUnit::Direct { .. } | PlaybackUnit::Pool(_) => {
                let resolved = self
                    .resolver
                    .resolve_sound(reference, None)
                    .map_err(|e| e.to_string())?;
                let sound = resolved.sound.clone();
                let handle = self.play(resolved, priority);
                Ok(Dispatch::Sound {
                    sound,
                    request_id: handle.id(),
                })
            }
        }
    }

    /// Alert route for a key, from the monitor that supplied its thresholds
    fn route(&self, key: &str, tier: Tier) -> Option<EventRef> {
        self.detector
            .monitor_for(key)
            .and_then(|monitor| monitor.alerts.route(tier).cloned())
    }

    fn suppressed(&self, key: &str, tier: Tier, reason: SuppressionReason) {
        self.state.broadcast_event(AlertEvent::AlertSuppressed {
            key: key.to_string(),
            tier,
            reason,
            timestamp: klaxon_common::time::now(),
        });
    }

    /// Submit a resolved sound directly
    pub fn play(&self, sound: ResolvedSound, priority: Priority) -> PlayHandle {
        self.dispatcher.submit(PlayRequest {
            sound: sound.sound,
            path: sound.path,
            volume: sound.volume,
            priority,
        })
    }

    /// Start a chain by hand
    pub fn run_chain(&self, chain_id: &str) -> Result<(), ChainError> {
        self.sequencer.start(chain_id, Priority::Normal).map(|_| ())
    }

    pub fn stop_chain(&self, chain_id: &str) -> Result<(), ChainError> {
        self.sequencer.stop(chain_id)
    }

    /// One pool selection, bypassing detection and cooldown
    pub fn test_pool(&self, pool_id: &str) -> Result<ResolvedSound, ResolveError> {
        self.resolver
            .resolve_sound(&EventRef::Pool(pool_id.to_string()), None)
    }

    /// Drop detector and cooldown state idle longer than the configured window
    ///
    /// Returns the number of entries removed.
    pub fn evict_idle(&self) -> usize {
        let Some(max_idle) = self.idle_eviction else {
            return 0;
        };
        let detector = self.detector.evict_idle(klaxon_common::time::now(), max_idle);
        let cooldowns = self.cooldowns.evict_idle(max_idle);
        if detector + cooldowns > 0 {
            debug!(detector, cooldowns, "Evicted idle state");
        }
        detector + cooldowns
    }

    /// Configured idle eviction window, if enabled
    pub fn idle_eviction(&self) -> Option<Duration> {
        self.idle_eviction
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            counters: self.state.counters(),
            running_chains: self.sequencer.running(),
            queued: self.dispatcher.queued(),
            tracked_keys: self.detector.tracked_keys(),
            cooldowns: self.cooldowns.len(),
        }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn sequencer(&self) -> &Arc<ChainSequencer> {
        &self.sequencer
    }

    pub fn dispatcher(&self) -> &Arc<PlaybackDispatcher> {
        &self.dispatcher
    }

    /// Stop running chains and the dispatcher
    pub fn shutdown(&self) {
        let stopped = self.sequencer.stop_all();
        if stopped > 0 {
            info!("Stopping {} running chains", stopped);
        }
        self.dispatcher.shutdown();
    }
}

enum Dispatch {
    Sound { sound: String, request_id: u64 },
    Chain(String),
}
