//! Shared test fixtures: a recording audio output and config builders

#![allow(dead_code)]

use futures::future::BoxFuture;
use klaxon_ap::audio::AudioOutput;
use klaxon_ap::error::PlaybackError;
use klaxon_common::config::KlaxonConfig;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Audio output that records each play call
///
/// Every call takes `delay`; paths registered with [`fail_on`] return an
/// error and paths registered with [`hang_on`] never finish on their own.
pub struct RecordingOutput {
    delay: Duration,
    timeout: Duration,
    played: Mutex<Vec<PathBuf>>,
    failing: Mutex<HashSet<PathBuf>>,
    hanging: Mutex<HashSet<PathBuf>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
}

impl RecordingOutput {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timeout: Duration::from_secs(30),
            played: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            hanging: Mutex::new(HashSet::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn fail_on(self, path: &str) -> Self {
        self.failing.lock().unwrap().insert(PathBuf::from(path));
        self
    }

    pub fn hang_on(self, path: &str) -> Self {
        self.hanging.lock().unwrap().insert(PathBuf::from(path));
        self
    }

    /// Paths that played successfully, in order
    pub fn played(&self) -> Vec<String> {
        self.played
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    }

    /// Number of play calls, including failures
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous play calls observed
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AudioOutput for RecordingOutput {
    fn play<'a>(&'a self, path: &'a Path, _volume: f32) -> BoxFuture<'a, Result<(), PlaybackError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = ActiveGuard(&self.active);
            self.max_active.fetch_max(now_active, Ordering::SeqCst);

            if self.hanging.lock().unwrap().contains(path) {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(self.delay).await;

            if self.failing.lock().unwrap().contains(path) {
                return Err(PlaybackError::ExitStatus("exit status: 1".to_string()));
            }
            self.played.lock().unwrap().push(path.to_path_buf());
            Ok(())
        })
    }

    fn play_timeout(&self) -> Duration {
        self.timeout
    }
}

/// Sound catalog shared by most tests: `<id>` plays `/sounds/<id>.wav`
pub const SOUNDS: &str = r#"
[sounds.a]
path = "/sounds/a.wav"

[sounds.b]
path = "/sounds/b.wav"

[sounds.c]
path = "/sounds/c.wav"

[sounds.warn]
path = "/sounds/warn.wav"

[sounds.crit]
path = "/sounds/crit.wav"
"#;

/// Parse `SOUNDS` followed by `extra` (not validated)
pub fn config(extra: &str) -> KlaxonConfig {
    KlaxonConfig::from_toml_str(&format!("{}\n{}", SOUNDS, extra)).unwrap()
}

pub fn path(id: &str) -> String {
    format!("/sounds/{}.wav", id)
}
