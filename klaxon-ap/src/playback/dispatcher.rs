//! Playback dispatcher: serializes play requests onto the audio output
//!
//! **Architecture:**
//! - Bounded queue shared by all submitters (monitors and chains)
//! - One consumer task drains it, calling the output for one request at a time
//! - Critical requests go ahead of queued (never in-flight) normal requests
//! - When full, normal submissions are dropped; a critical submission evicts
//!   the oldest queued normal request instead
//!
//! The queue lock is never held across the output call.

use klaxon_common::events::AlertEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::AudioOutput;
use crate::error::PlaybackError;
use crate::state::SharedState;
use crate::sync::lock;

/// Dispatch priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Critical,
}

/// A sound to play
#[derive(Debug, Clone, PartialEq)]
pub struct PlayRequest {
    /// Catalog id, for logs and events
    pub sound: String,
    pub path: PathBuf,
    pub volume: f32,
    pub priority: Priority,
}

/// Final result of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayOutcome {
    Played,
    Failed(PlaybackError),
    /// Discarded because the queue was full (or evicted by a critical request)
    Dropped,
    /// Removed from the queue before playing, or interrupted by shutdown
    Cancelled,
}

impl PlayOutcome {
    pub fn into_result(self) -> Result<(), PlaybackError> {
        match self {
            PlayOutcome::Played => Ok(()),
            PlayOutcome::Failed(e) => Err(e),
            PlayOutcome::Dropped => Err(PlaybackError::Dropped),
            PlayOutcome::Cancelled => Err(PlaybackError::Cancelled),
        }
    }
}

/// Handle to a submitted request
#[derive(Debug)]
pub struct PlayHandle {
    id: u64,
    rx: oneshot::Receiver<PlayOutcome>,
}

impl PlayHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the request to finish
    pub async fn outcome(self) -> PlayOutcome {
        // Sender dropped without a verdict only if the consumer went away
        self.rx.await.unwrap_or(PlayOutcome::Cancelled)
    }
}

struct Queued {
    id: u64,
    request: PlayRequest,
    reply: oneshot::Sender<PlayOutcome>,
}

#[derive(Default)]
struct DispatchQueue {
    entries: VecDeque<Queued>,
    in_flight: Option<u64>,
    shutdown: bool,
}

impl DispatchQueue {
    fn pending(&self) -> usize {
        self.entries.len() + usize::from(self.in_flight.is_some())
    }
}

/// Single-consumer playback queue
pub struct PlaybackDispatcher {
    queue: Mutex<DispatchQueue>,
    /// Wakes the consumer when work arrives
    wake: Notify,
    /// Queued + in-flight count, for `idle()`
    pending: watch::Sender<usize>,
    shutdown: watch::Sender<bool>,
    next_id: AtomicU64,
    max_queue_len: usize,
    output: Arc<dyn AudioOutput>,
    state: Arc<SharedState>,
}

impl PlaybackDispatcher {
    pub fn new(output: Arc<dyn AudioOutput>, max_queue_len: usize, state: Arc<SharedState>) -> Self {
        Self {
            queue: Mutex::new(DispatchQueue::default()),
            wake: Notify::new(),
            pending: watch::channel(0).0,
            shutdown: watch::channel(false).0,
            next_id: AtomicU64::new(1),
            max_queue_len: max_queue_len.max(1),
            output,
            state,
        }
    }

    /// Submit a request
    ///
    /// Never blocks. A request that cannot be queued resolves immediately
    /// with [`PlayOutcome::Dropped`] (or `Failed(ShuttingDown)` after shutdown).
    pub fn submit(&self, request: PlayRequest) -> PlayHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        let handle = PlayHandle { id, rx };

        let mut queue = lock(&self.queue);

        if queue.shutdown {
            drop(queue);
            let _ = reply.send(PlayOutcome::Failed(PlaybackError::ShuttingDown));
            return handle;
        }

        let mut evicted = None;
        if queue.entries.len() >= self.max_queue_len {
            let victim = match request.priority {
                Priority::Critical => queue
                    .entries
                    .iter()
                    .position(|q| q.request.priority < Priority::Critical),
                Priority::Normal => None,
            };
            let removed = match victim {
                Some(pos) => queue.entries.remove(pos),
                None => None,
            };
            match removed {
                Some(victim) => evicted = Some(victim),
                None => {
                    drop(queue);
                    warn!(sound = %request.sound, "Playback queue full, dropping request");
                    self.report_dropped(id, &request.sound);
                    let _ = reply.send(PlayOutcome::Dropped);
                    return handle;
                }
            }
        }

        let sound = request.sound.clone();
        let priority = request.priority;
        let entry = Queued { id, request, reply };
        match priority {
            Priority::Critical => {
                let pos = queue
                    .entries
                    .iter()
                    .position(|q| q.request.priority < Priority::Critical)
                    .unwrap_or(queue.entries.len());
                queue.entries.insert(pos, entry);
            }
            Priority::Normal => queue.entries.push_back(entry),
        }
        self.pending.send_replace(queue.pending());
        debug!(id, sound = %sound, ?priority, queued = queue.entries.len(), "Queued play request");
        drop(queue);

        if let Some(victim) = evicted {
            warn!(sound = %victim.request.sound, "Evicted queued request for critical alert");
            self.report_dropped(victim.id, &victim.request.sound);
            let _ = victim.reply.send(PlayOutcome::Dropped);
        }

        self.wake.notify_one();
        handle
    }

    /// Remove a queued request; returns false if it is in flight or gone
    pub fn cancel(&self, id: u64) -> bool {
        let mut queue = lock(&self.queue);
        let Some(pos) = queue.entries.iter().position(|q| q.id == id) else {
            return false;
        };
        let removed = queue.entries.remove(pos);
        self.pending.send_replace(queue.pending());
        drop(queue);

        if let Some(removed) = removed {
            debug!(id, sound = %removed.request.sound, "Cancelled queued request");
            let _ = removed.reply.send(PlayOutcome::Cancelled);
        }
        true
    }

    /// Number of queued requests (excluding the one in flight)
    pub fn queued(&self) -> usize {
        lock(&self.queue).entries.len()
    }

    /// Wait until nothing is queued or playing
    pub async fn idle(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|pending| *pending == 0).await;
    }

    /// Stop accepting requests, cancel queued ones and stop the consumer
    ///
    /// A play call in flight is abandoned (the output future is dropped).
    pub fn shutdown(&self) {
        let drained: Vec<Queued> = {
            let mut queue = lock(&self.queue);
            queue.shutdown = true;
            let drained = queue.entries.drain(..).collect();
            self.pending.send_replace(queue.pending());
            drained
        };
        if !drained.is_empty() {
            info!("Cancelling {} queued play requests on shutdown", drained.len());
        }
        for entry in drained {
            let _ = entry.reply.send(PlayOutcome::Cancelled);
        }
        self.shutdown.send_replace(true);
        self.wake.notify_one();
    }

    /// Spawn the consumer task
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Playback dispatcher started");
            self.consume().await;
            info!("Playback dispatcher stopped");
        })
    }

    async fn consume(&self) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let next = {
                let mut queue = lock(&self.queue);
                if queue.shutdown {
                    break;
                }
                let next = queue.entries.pop_front();
                if let Some(entry) = &next {
                    queue.in_flight = Some(entry.id);
                }
                next
            };

            match next {
                Some(entry) => {
                    let outcome = tokio::select! {
                        outcome = self.play(&entry) => outcome,
                        _ = shutdown.wait_for(|stop| *stop) => PlayOutcome::Cancelled,
                    };
                    self.finish(entry, outcome);
                }
                None => {
                    tokio::select! {
                        _ = self.wake.notified() => {}
                        _ = shutdown.wait_for(|stop| *stop) => {}
                    }
                }
            }
        }
    }

    async fn play(&self, entry: &Queued) -> PlayOutcome {
        let request = &entry.request;
        let timeout = self.output.play_timeout();
        debug!(id = entry.id, sound = %request.sound, path = %request.path.display(), "Playing");

        match tokio::time::timeout(timeout, self.output.play(&request.path, request.volume)).await {
            Ok(Ok(())) => PlayOutcome::Played,
            Ok(Err(e)) => PlayOutcome::Failed(e),
            Err(_) => PlayOutcome::Failed(PlaybackError::Timeout(timeout.as_millis() as u64)),
        }
    }

    fn finish(&self, entry: Queued, outcome: PlayOutcome) {
        let timestamp = klaxon_common::time::now();
        match &outcome {
            PlayOutcome::Played => {
                self.state.broadcast_event(AlertEvent::PlaybackCompleted {
                    request_id: entry.id,
                    sound: entry.request.sound.clone(),
                    timestamp,
                });
            }
            PlayOutcome::Failed(e) => {
                warn!(id = entry.id, sound = %entry.request.sound, "Playback failed: {}", e);
                self.state.broadcast_event(AlertEvent::PlaybackFailed {
                    request_id: entry.id,
                    sound: entry.request.sound.clone(),
                    error: e.to_string(),
                    timestamp,
                });
            }
            PlayOutcome::Dropped | PlayOutcome::Cancelled => {}
        }

        // Counted before idle() can observe the drained queue
        {
            let mut queue = lock(&self.queue);
            queue.in_flight = None;
            self.pending.send_replace(queue.pending());
        }
        // Submitter may have stopped waiting
        let _ = entry.reply.send(outcome);
    }

    fn report_dropped(&self, id: u64, sound: &str) {
        self.state.broadcast_event(AlertEvent::PlaybackDropped {
            request_id: id,
            sound: sound.to_string(),
            timestamp: klaxon_common::time::now(),
        });
    }
}
