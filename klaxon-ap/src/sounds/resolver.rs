//! Sound resolution: event references to playback units, pool selection
//!
//! Pool selection state (cursor, last pick) is kept per pool and updated in a
//! single critical section per selection, so concurrent callers never observe
//! a half-advanced cursor.

use chrono::NaiveTime;
use klaxon_common::config::{ChainDef, EventRef, KlaxonConfig, PoolDef, PoolEntry, SelectionMode, SoundDef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::ResolveError;
use crate::sync::lock;

/// Concrete thing to play for an event reference
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackUnit {
    /// A single catalog sound at a volume
    Direct { sound: String, volume: f32 },
    /// Pick from a pool at play time
    Pool(String),
    /// Run a chain
    Chain(String),
}

/// A sound ready to hand to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSound {
    pub sound: String,
    pub path: PathBuf,
    pub volume: f32,
}

#[derive(Debug, Default)]
struct PoolState {
    last: Option<String>,
    cursor: usize,
}

/// Maps event references to playback units and selects from pools
pub struct SoundResolver {
    sounds: HashMap<String, SoundDef>,
    pools: HashMap<String, PoolDef>,
    chains: HashMap<String, Arc<ChainDef>>,
    pool_state: Mutex<HashMap<String, PoolState>>,
    rng: Mutex<StdRng>,
}

impl SoundResolver {
    pub fn new(config: &KlaxonConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Resolver with a deterministic random source
    pub fn with_seed(config: &KlaxonConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &KlaxonConfig, rng: StdRng) -> Self {
        Self {
            sounds: config.sounds.clone(),
            pools: config.pools.clone(),
            chains: config
                .chains
                .iter()
                .map(|(id, chain)| (id.clone(), Arc::new(chain.clone())))
                .collect(),
            pool_state: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Resolve an event reference without making any random choice
    ///
    /// Pools and chains are returned by id; selection happens when they are
    /// played.
    pub fn resolve(&self, reference: &EventRef) -> Result<PlaybackUnit, ResolveError> {
        match reference {
            EventRef::Sound(id) => {
                let sound = self.sound(id)?;
                Ok(PlaybackUnit::Direct {
                    sound: id.clone(),
                    volume: sound.volume,
                })
            }
            EventRef::Pool(id) => {
                self.pool(id)?;
                Ok(PlaybackUnit::Pool(id.clone()))
            }
            EventRef::Chain(id) => {
                self.chain(id)?;
                Ok(PlaybackUnit::Chain(id.clone()))
            }
        }
    }

    pub fn sound(&self, id: &str) -> Result<&SoundDef, ResolveError> {
        self.sounds.get(id).ok_or_else(|| not_found("sound", id))
    }

    fn pool(&self, id: &str) -> Result<&PoolDef, ResolveError> {
        self.pools.get(id).ok_or_else(|| not_found("pool", id))
    }

    /// Stored chain definition, steps in order
    pub fn chain(&self, id: &str) -> Result<Arc<ChainDef>, ResolveError> {
        self.chains.get(id).cloned().ok_or_else(|| not_found("chain", id))
    }

    pub fn chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.chains.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve a sound or pool reference all the way to a file
    ///
    /// `volume` overrides the catalog volume of the chosen sound.
    pub fn resolve_sound(
        &self,
        reference: &EventRef,
        volume: Option<f32>,
    ) -> Result<ResolvedSound, ResolveError> {
        let sound_id = match reference {
            EventRef::Sound(id) => id.clone(),
            EventRef::Pool(id) => self.select_from_pool(id)?,
            EventRef::Chain(id) => return Err(ResolveError::NotASound(id.clone())),
        };
        let def = self.sound(&sound_id)?;
        Ok(ResolvedSound {
            path: def.path.clone(),
            volume: volume.unwrap_or(def.volume).clamp(0.0, 1.0),
            sound: sound_id,
        })
    }

    /// Select a sound id from a pool using the current local time
    pub fn select_from_pool(&self, pool_id: &str) -> Result<String, ResolveError> {
        self.select_from_pool_at(pool_id, klaxon_common::time::local_time_of_day())
    }

    /// Select a sound id from a pool as of a given local time
    pub fn select_from_pool_at(&self, pool_id: &str, now: NaiveTime) -> Result<String, ResolveError> {
        let pool = self.pool(pool_id)?;
        if pool.sounds.is_empty() {
            return Err(ResolveError::EmptyPool(pool_id.to_string()));
        }

        let mut states = lock(&self.pool_state);
        let state = states.entry(pool_id.to_string()).or_default();

        let mut candidates: Vec<&PoolEntry> = pool.sounds.iter().collect();

        if pool.mode == SelectionMode::Adaptive {
            let in_window: Vec<&PoolEntry> = candidates
                .iter()
                .copied()
                .filter(|entry| entry.window.map_or(true, |w| w.contains(now)))
                .collect();
            if !in_window.is_empty() {
                candidates = in_window;
            } else {
                debug!(pool = pool_id, "No candidate in time window, using whole pool");
            }
        }

        let avoid = if pool.remember_last {
            state.last.clone()
        } else {
            None
        };

        let index = if pool.mode == SelectionMode::Sequential {
            // The cursor walks the whole pool; remember_last only skips a
            // slot that would repeat the previous pick
            let len = candidates.len();
            let mut index = state.cursor % len;
            state.cursor = state.cursor.wrapping_add(1);
            if len > 1 && avoid.as_deref() == Some(candidates[index].sound.as_str()) {
                index = state.cursor % len;
                state.cursor = state.cursor.wrapping_add(1);
            }
            index
        } else {
            if let Some(last) = avoid.filter(|_| candidates.len() > 1) {
                let fresh: Vec<&PoolEntry> = candidates
                    .iter()
                    .copied()
                    .filter(|entry| entry.sound != last)
                    .collect();
                if !fresh.is_empty() {
                    candidates = fresh;
                }
            }
            match pool.mode {
                SelectionMode::Weighted | SelectionMode::Adaptive => {
                    weighted_index(&candidates, &mut *lock(&self.rng))
                }
                _ => lock(&self.rng).gen_range(0..candidates.len()),
            }
        };

        let chosen = candidates[index].sound.clone();
        state.last = Some(chosen.clone());
        debug!(pool = pool_id, sound = %chosen, "Selected from pool");
        Ok(chosen)
    }
}

fn not_found(kind: &'static str, id: &str) -> ResolveError {
    ResolveError::NotFound {
        kind,
        id: id.to_string(),
    }
}

/// Draw `r` in `[0, total)` and walk cumulative weights
///
/// Falls back to a uniform pick when no candidate has positive weight or the
/// weights overflow.
fn weighted_index<R: Rng>(candidates: &[&PoolEntry], rng: &mut R) -> usize {
    let total: f64 = candidates.iter().map(|entry| entry.weight.max(0.0)).sum();
    if !(total > 0.0 && total.is_finite()) {
        return rng.gen_range(0..candidates.len());
    }

    let r = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for (index, entry) in candidates.iter().enumerate() {
        cumulative += entry.weight.max(0.0);
        if cumulative > r {
            return index;
        }
    }
    candidates.len() - 1
}
