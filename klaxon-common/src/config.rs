//! Configuration model and config file resolution
//!
//! Configuration is a single TOML file. Everything here is read-only to the
//! alerting core once loaded.
//!
//! # File resolution priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `KLAXON_CONFIG` environment variable
//! 3. User config directory (`~/.config/klaxon/config.toml` on Linux)
//! 4. System config (`/etc/klaxon/config.toml`, Unix only)

use crate::signal::Tier;
use crate::time::TimeWindow;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "KLAXON_CONFIG";

/// Root configuration loaded from TOML
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KlaxonConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub cooldowns: CooldownConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub player: PlayerConfig,

    /// Sound catalog (sound id -> file)
    #[serde(default)]
    pub sounds: HashMap<String, SoundDef>,

    /// Sound pools (pool id -> pool)
    #[serde(default)]
    pub pools: HashMap<String, PoolDef>,

    /// Sound chains (chain id -> chain)
    #[serde(default)]
    pub chains: HashMap<String, ChainDef>,

    /// Monitored keys with their thresholds and alert routes
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP control API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5750
}

/// Playback dispatcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of queued (not in-flight) requests
    #[serde(default = "default_max_queue_len")]
    pub max_queue_len: usize,

    /// Upper bound on a single play call
    #[serde(default = "default_play_timeout_ms")]
    pub play_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_queue_len: default_max_queue_len(),
            play_timeout_ms: default_play_timeout_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn play_timeout(&self) -> Duration {
        Duration::from_millis(self.play_timeout_ms)
    }
}

fn default_max_queue_len() -> usize {
    16
}

fn default_play_timeout_ms() -> u64 {
    30_000
}

/// Minimum re-alert intervals per severity tier, in seconds
#[derive(Debug, Clone, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_warning_secs")]
    pub warning_secs: u64,
    #[serde(default = "default_critical_secs")]
    pub critical_secs: u64,
    #[serde(default = "default_change_secs")]
    pub change_secs: u64,
    #[serde(default = "default_leak_secs")]
    pub leak_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            warning_secs: default_warning_secs(),
            critical_secs: default_critical_secs(),
            change_secs: default_change_secs(),
            leak_secs: default_leak_secs(),
        }
    }
}

impl CooldownConfig {
    /// Cooldown interval for a tier
    pub fn interval(&self, tier: Tier) -> Duration {
        let secs = match tier {
            Tier::Warning => self.warning_secs,
            Tier::Critical => self.critical_secs,
            Tier::Change => self.change_secs,
            Tier::Leak => self.leak_secs,
        };
        Duration::from_secs(secs)
    }
}

fn default_warning_secs() -> u64 {
    300
}

fn default_critical_secs() -> u64 {
    60
}

fn default_change_secs() -> u64 {
    30
}

fn default_leak_secs() -> u64 {
    900
}

/// Detector housekeeping
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Drop per-key state not observed for this long (0 disables eviction)
    #[serde(default = "default_idle_eviction_secs")]
    pub idle_eviction_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            idle_eviction_secs: default_idle_eviction_secs(),
        }
    }
}

impl DetectorConfig {
    pub fn idle_eviction(&self) -> Option<Duration> {
        (self.idle_eviction_secs > 0).then(|| Duration::from_secs(self.idle_eviction_secs))
    }
}

fn default_idle_eviction_secs() -> u64 {
    86_400
}

/// External player process
///
/// Arguments may contain `{path}`, `{volume}` (0.0-1.0) and
/// `{volume_percent}` (0-100) placeholders.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self {
                command: "afplay".to_string(),
                args: vec!["-v".into(), "{volume}".into(), "{path}".into()],
            }
        } else if cfg!(target_os = "linux") {
            Self {
                command: "paplay".to_string(),
                args: vec!["{path}".into()],
            }
        } else {
            Self {
                command: "ffplay".to_string(),
                args: vec![
                    "-nodisp".into(),
                    "-autoexit".into(),
                    "-loglevel".into(),
                    "quiet".into(),
                    "-volume".into(),
                    "{volume_percent}".into(),
                    "{path}".into(),
                ],
            }
        }
    }
}

/// A sound file in the catalog
#[derive(Debug, Clone, Deserialize)]
pub struct SoundDef {
    pub path: PathBuf,
    /// Default playback volume (0.0-1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_volume() -> f32 {
    1.0
}

/// Pool selection mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    Uniform,
    Weighted,
    Sequential,
    /// Time-window filtered, then weighted
    Adaptive,
}

/// A pool of interchangeable sounds
#[derive(Debug, Clone, Deserialize)]
pub struct PoolDef {
    #[serde(default)]
    pub mode: SelectionMode,

    /// Never pick the same sound twice in a row (pools of 2+)
    #[serde(default)]
    pub remember_last: bool,

    pub sounds: Vec<PoolEntry>,
}

/// One candidate in a pool
#[derive(Debug, Clone, Deserialize)]
pub struct PoolEntry {
    /// Sound id from the catalog
    pub sound: String,

    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Local time window in which the candidate is eligible (adaptive mode)
    #[serde(default)]
    pub window: Option<TimeWindow>,
}

fn default_weight() -> f64 {
    1.0
}

/// An ordered, optionally repeating sequence of timed sound steps
#[derive(Debug, Clone, Deserialize)]
pub struct ChainDef {
    pub steps: Vec<ChainStepDef>,

    /// Restart at the first step forever (until stopped)
    #[serde(default, rename = "loop")]
    pub looping: bool,

    /// Total number of passes through the steps when not looping (0 and 1 both mean once)
    #[serde(default)]
    pub repeat_count: u32,
}

/// One step of a chain
#[derive(Debug, Clone, Deserialize)]
pub struct ChainStepDef {
    /// `sound:<id>` or `pool:<id>` (bare ids are sounds)
    pub sound: EventRef,

    #[serde(default)]
    pub delay_before_ms: u64,

    #[serde(default)]
    pub post_duration_ms: u64,

    /// Overrides the sound's default volume
    #[serde(default)]
    pub volume: Option<f32>,

    /// A failed required step aborts the chain
    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub condition: Option<StepCondition>,
}

/// Condition gating a chain step
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    /// Play with the given probability (0.0-1.0)
    Chance(f64),
    /// Play only inside a local time window
    Within(TimeWindow),
    /// Play only on the first pass through the chain
    FirstPass,
}

/// Reference from an alert route or chain step to something playable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventRef {
    Sound(String),
    Pool(String),
    Chain(String),
}

impl EventRef {
    pub fn id(&self) -> &str {
        match self {
            EventRef::Sound(id) | EventRef::Pool(id) | EventRef::Chain(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EventRef::Sound(_) => "sound",
            EventRef::Pool(_) => "pool",
            EventRef::Chain(_) => "chain",
        }
    }
}

impl FromStr for EventRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = match s.split_once(':') {
            Some((kind, id)) => (kind, id),
            None => ("sound", s),
        };
        if id.is_empty() {
            return Err(Error::InvalidInput(format!("empty id in reference '{}'", s)));
        }
        match kind {
            "sound" => Ok(EventRef::Sound(id.to_string())),
            "pool" => Ok(EventRef::Pool(id.to_string())),
            "chain" => Ok(EventRef::Chain(id.to_string())),
            other => Err(Error::InvalidInput(format!(
                "unknown reference kind '{}' in '{}' (expected sound, pool or chain)",
                other, s
            ))),
        }
    }
}

impl TryFrom<String> for EventRef {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<EventRef> for String {
    fn from(value: EventRef) -> Self {
        value.to_string()
    }
}

impl fmt::Display for EventRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// Thresholds for one monitored key
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdSpec {
    Numeric {
        #[serde(default)]
        warning: Option<f64>,
        #[serde(default)]
        critical: Option<f64>,
        /// Distance below a threshold required to re-arm it
        #[serde(default)]
        hysteresis: f64,
        /// Leak detection window (number of samples), disabled when absent
        #[serde(default)]
        leak_window: Option<usize>,
    },
    Categorical {
        /// Values whose arrival fires; empty means any change fires
        #[serde(default)]
        watch: Vec<String>,
    },
}

impl ThresholdSpec {
    /// Check the spec is usable; malformed specs are never evaluated
    pub fn check(&self) -> std::result::Result<(), String> {
        match self {
            ThresholdSpec::Numeric {
                warning,
                critical,
                hysteresis,
                leak_window,
            } => {
                if warning.is_none() && critical.is_none() && leak_window.is_none() {
                    return Err("numeric spec needs warning, critical or leak_window".to_string());
                }
                if !hysteresis.is_finite() || *hysteresis < 0.0 {
                    return Err(format!("hysteresis must be a non-negative number, got {}", hysteresis));
                }
                for (name, value) in [("warning", warning), ("critical", critical)] {
                    if let Some(v) = value {
                        if !v.is_finite() {
                            return Err(format!("{} threshold must be finite", name));
                        }
                    }
                }
                if let (Some(w), Some(c)) = (warning, critical) {
                    if w > c {
                        return Err(format!("warning ({}) must not exceed critical ({})", w, c));
                    }
                }
                if let Some(n) = leak_window {
                    if *n < 2 {
                        return Err(format!("leak_window must be at least 2, got {}", n));
                    }
                }
                Ok(())
            }
            ThresholdSpec::Categorical { .. } => Ok(()),
        }
    }
}

/// Sounds played per transition tier
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertRoutes {
    #[serde(default)]
    pub warning: Option<EventRef>,
    #[serde(default)]
    pub critical: Option<EventRef>,
    #[serde(default)]
    pub change: Option<EventRef>,
    #[serde(default)]
    pub leak: Option<EventRef>,
}

impl AlertRoutes {
    pub fn route(&self, tier: Tier) -> Option<&EventRef> {
        match tier {
            Tier::Warning => self.warning.as_ref(),
            Tier::Critical => self.critical.as_ref(),
            Tier::Change => self.change.as_ref(),
            Tier::Leak => self.leak.as_ref(),
        }
    }

    fn iter(&self) -> impl Iterator<Item = (Tier, &EventRef)> {
        Tier::ALL
            .into_iter()
            .filter_map(move |tier| self.route(tier).map(|r| (tier, r)))
    }
}

/// One monitored key (or key pattern ending in `*`)
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub key: String,
    pub thresholds: ThresholdSpec,
    #[serde(default)]
    pub alerts: AlertRoutes,
}

impl MonitorConfig {
    /// Match a concrete key, returning the match specificity
    ///
    /// Exact keys score `usize::MAX`; patterns score their prefix length.
    pub fn match_key(&self, key: &str) -> Option<usize> {
        match self.key.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix).then_some(prefix.len()),
            None => (self.key == key).then_some(usize::MAX),
        }
    }
}

impl KlaxonConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load and validate configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        debug!(
            sounds = config.sounds.len(),
            pools = config.pools.len(),
            chains = config.chains.len(),
            monitors = config.monitors.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Check cross references and value ranges
    ///
    /// All problems are collected into a single `Error::Config`.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.dispatcher.max_queue_len == 0 {
            problems.push("dispatcher.max_queue_len must be at least 1".to_string());
        }

        for (id, sound) in &self.sounds {
            if !(0.0..=1.0).contains(&sound.volume) {
                problems.push(format!("sound '{}': volume {} outside 0.0-1.0", id, sound.volume));
            }
        }

        for (id, pool) in &self.pools {
            if pool.sounds.is_empty() {
                problems.push(format!("pool '{}' has no sounds", id));
            }
            for entry in &pool.sounds {
                if !self.sounds.contains_key(&entry.sound) {
                    problems.push(format!("pool '{}' references unknown sound '{}'", id, entry.sound));
                }
                if !entry.weight.is_finite() || entry.weight < 0.0 {
                    problems.push(format!("pool '{}': weight of '{}' must be non-negative", id, entry.sound));
                }
            }
            let total: f64 = pool.sounds.iter().map(|entry| entry.weight.max(0.0)).sum();
            if !total.is_finite() {
                problems.push(format!("pool '{}': total weight is not finite", id));
            }
        }

        for (id, chain) in &self.chains {
            if chain.steps.is_empty() {
                problems.push(format!("chain '{}' has no steps", id));
            }
            for (index, step) in chain.steps.iter().enumerate() {
                match &step.sound {
                    EventRef::Chain(_) => {
                        problems.push(format!("chain '{}' step {}: chains cannot nest", id, index))
                    }
                    other => {
                        if let Some(problem) = self.check_ref(other) {
                            problems.push(format!("chain '{}' step {}: {}", id, index, problem));
                        }
                    }
                }
                if let Some(StepCondition::Chance(p)) = step.condition {
                    if !(0.0..=1.0).contains(&p) {
                        problems.push(format!("chain '{}' step {}: chance {} outside 0.0-1.0", id, index, p));
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        for monitor in &self.monitors {
            if !seen.insert(monitor.key.as_str()) {
                problems.push(format!("monitor '{}' is defined more than once", monitor.key));
            }
            if let Err(problem) = monitor.thresholds.check() {
                problems.push(format!("monitor '{}': {}", monitor.key, problem));
            }
            for (tier, route) in monitor.alerts.iter() {
                if let Some(problem) = self.check_ref(route) {
                    problems.push(format!("monitor '{}' {} route: {}", monitor.key, tier, problem));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            problems.sort();
            Err(Error::Config(problems.join("; ")))
        }
    }

    fn check_ref(&self, reference: &EventRef) -> Option<String> {
        let known = match reference {
            EventRef::Sound(id) => self.sounds.contains_key(id),
            EventRef::Pool(id) => self.pools.contains_key(id),
            EventRef::Chain(id) => self.chains.contains_key(id),
        };
        (!known).then(|| format!("unknown {}", reference))
    }
}

/// Resolve the configuration file path
///
/// Returns the first candidate that exists, in priority order.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3/4: Per-user then system config file
    default_config_candidates()
        .into_iter()
        .find(|path| path.exists())
        .ok_or_else(|| {
            Error::Config(format!(
                "No config file found (pass --config or set {})",
                CONFIG_ENV_VAR
            ))
        })
}

/// Platform config file locations, highest priority first
pub fn default_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("klaxon").join("config.toml"));
    }
    if cfg!(unix) {
        candidates.push(PathBuf::from("/etc/klaxon/config.toml"));
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ref_parsing() {
        assert_eq!("pool:low".parse::<EventRef>().unwrap(), EventRef::Pool("low".into()));
        assert_eq!("chain:siren".parse::<EventRef>().unwrap(), EventRef::Chain("siren".into()));
        assert_eq!("beep".parse::<EventRef>().unwrap(), EventRef::Sound("beep".into()));
        assert_eq!("sound:beep".parse::<EventRef>().unwrap(), EventRef::Sound("beep".into()));
        assert!("pool:".parse::<EventRef>().is_err());
        assert!("track:x".parse::<EventRef>().is_err());
        assert_eq!(EventRef::Pool("low".into()).to_string(), "pool:low");
    }

    #[test]
    fn test_monitor_key_matching() {
        let exact = MonitorConfig {
            key: "disk:/:usage".into(),
            thresholds: ThresholdSpec::Categorical { watch: vec![] },
            alerts: AlertRoutes::default(),
        };
        let pattern = MonitorConfig {
            key: "disk:*".into(),
            ..exact.clone()
        };
        assert_eq!(exact.match_key("disk:/:usage"), Some(usize::MAX));
        assert_eq!(exact.match_key("disk:/home:usage"), None);
        assert_eq!(pattern.match_key("disk:/home:usage"), Some(5));
        assert_eq!(pattern.match_key("net:eth0"), None);
    }

    #[test]
    fn test_threshold_check() {
        let ok = ThresholdSpec::Numeric {
            warning: Some(80.0),
            critical: Some(95.0),
            hysteresis: 5.0,
            leak_window: None,
        };
        assert!(ok.check().is_ok());

        let inverted = ThresholdSpec::Numeric {
            warning: Some(95.0),
            critical: Some(80.0),
            hysteresis: 0.0,
            leak_window: None,
        };
        assert!(inverted.check().is_err());

        let empty = ThresholdSpec::Numeric {
            warning: None,
            critical: None,
            hysteresis: 0.0,
            leak_window: None,
        };
        assert!(empty.check().is_err());

        let negative_margin = ThresholdSpec::Numeric {
            warning: Some(1.0),
            critical: None,
            hysteresis: -1.0,
            leak_window: None,
        };
        assert!(negative_margin.check().is_err());
    }

    #[test]
    fn test_cooldown_intervals_per_tier() {
        let cooldowns = CooldownConfig::default();
        assert_eq!(cooldowns.interval(Tier::Critical), Duration::from_secs(60));
        assert_eq!(cooldowns.interval(Tier::Warning), Duration::from_secs(300));
    }
}
