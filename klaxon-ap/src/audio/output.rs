//! Audio output boundary
//!
//! The dispatcher's single consumer is the only caller of [`AudioOutput::play`],
//! so implementations never see overlapping calls. A play call is expected to
//! return when the sound has finished (or failed).

use futures::future::BoxFuture;
use klaxon_common::config::PlayerConfig;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::PlaybackError;

/// Default bound on a single play call
pub const DEFAULT_PLAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Plays one sound file at a time
pub trait AudioOutput: Send + Sync {
    /// Play `path` at `volume` (0.0-1.0), completing when playback ends
    fn play<'a>(&'a self, path: &'a Path, volume: f32) -> BoxFuture<'a, Result<(), PlaybackError>>;

    /// Upper bound the dispatcher enforces on each play call
    fn play_timeout(&self) -> Duration {
        DEFAULT_PLAY_TIMEOUT
    }
}

/// Plays sounds by spawning an external player process per request
///
/// The child is killed if the play future is dropped (timeout or shutdown).
pub struct CommandOutput {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandOutput {
    pub fn new(player: &PlayerConfig, timeout: Duration) -> Self {
        Self {
            command: player.command.clone(),
            args: player.args.clone(),
            timeout,
        }
    }

    /// Player arguments with placeholders substituted
    pub fn render_args(&self, path: &Path, volume: f32) -> Vec<String> {
        let volume = volume.clamp(0.0, 1.0);
        let path = path.to_string_lossy();
        let volume_str = format!("{:.2}", volume);
        let percent_str = format!("{}", (volume * 100.0).round() as u32);
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{path}", &path)
                    .replace("{volume_percent}", &percent_str)
                    .replace("{volume}", &volume_str)
            })
            .collect();
        if self.args.iter().any(|arg| arg.contains("{path}")) {
            args
        } else {
            let mut args = args;
            args.push(path.into_owned());
            args
        }
    }
}

impl AudioOutput for CommandOutput {
    fn play<'a>(&'a self, path: &'a Path, volume: f32) -> BoxFuture<'a, Result<(), PlaybackError>> {
        Box::pin(async move {
            let args = self.render_args(path, volume);
            debug!(command = %self.command, ?args, "Spawning player");

            let status = Command::new(&self.command)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|e| PlaybackError::Spawn(format!("{}: {}", self.command, e)))?;

            if status.success() {
                Ok(())
            } else {
                Err(PlaybackError::ExitStatus(status.to_string()))
            }
        })
    }

    fn play_timeout(&self) -> Duration {
        self.timeout
    }
}

/// Output that only logs what it would play (dry run)
#[derive(Debug, Default)]
pub struct LogOutput;

impl AudioOutput for LogOutput {
    fn play<'a>(&'a self, path: &'a Path, volume: f32) -> BoxFuture<'a, Result<(), PlaybackError>> {
        Box::pin(async move {
            info!(path = %path.display(), volume, "Dry run: would play sound");
            Ok(())
        })
    }
}
