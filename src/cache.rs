// Pass-level caching. With `CacheOnePassInMemory` the first complete pass is
// captured as it is consumed and every later pass replays that capture without
// touching the generators.
//
// The buffers here are only mutated by the consumer, and only swapped at pass
// boundaries after the loader has been joined, so they live outside the pool lock.

use std::collections::VecDeque;
use std::mem;

use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::sample::PooledSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKind {
    #[default]
    NoCache,
    CacheOnePassInMemory,
}

impl TryFrom<i64> for CacheKind {
    type Error = ProviderError;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            0 => Ok(CacheKind::NoCache),
            1 => Ok(CacheKind::CacheOnePassInMemory),
            other => Err(ProviderError::configuration(format!(
                "unsupported cache kind {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Loading,
    Replaying,
}

/// Capture of one pass plus the buffer currently being replayed.
#[derive(Debug)]
pub struct PassCache {
    phase: Phase,
    replay: VecDeque<PooledSample>,
    collected: Vec<PooledSample>,
}

impl PassCache {
    fn new() -> Self {
        Self {
            phase: Phase::Fresh,
            replay: VecDeque::new(),
            collected: Vec::new(),
        }
    }

    fn should_reload(&mut self, previous_drained: bool) -> bool {
        match self.phase {
            Phase::Fresh => {
                self.phase = Phase::Loading;
                true
            }
            Phase::Loading if previous_drained && !self.collected.is_empty() => {
                self.replay = mem::take(&mut self.collected).into();
                self.phase = Phase::Replaying;
                debug!(samples = self.replay.len(), "Captured pass promoted to replay");
                false
            }
            Phase::Loading => {
                if !self.collected.is_empty() {
                    warn!(
                        discarded = self.collected.len(),
                        "Reset before the loading pass drained; reloading from generators"
                    );
                }
                self.collected.clear();
                true
            }
            Phase::Replaying => {
                // Whatever the last replay did not reach is still part of the pass.
                if !self.replay.is_empty() {
                    debug!(leftover = self.replay.len(), "Merging undrained replay samples");
                }
                self.collected.extend(self.replay.drain(..));
                self.replay = mem::take(&mut self.collected).into();
                false
            }
        }
    }
}

/// Decides at every reset whether the loader must run, and where the consumer
/// draws from.
#[derive(Debug)]
pub enum CacheStrategy {
    NoCache,
    OnePassInMemory(PassCache),
}

impl CacheStrategy {
    pub fn new(kind: CacheKind) -> Self {
        match kind {
            CacheKind::NoCache => CacheStrategy::NoCache,
            CacheKind::CacheOnePassInMemory => CacheStrategy::OnePassInMemory(PassCache::new()),
        }
    }

    pub fn kind(&self) -> CacheKind {
        match self {
            CacheStrategy::NoCache => CacheKind::NoCache,
            CacheStrategy::OnePassInMemory(_) => CacheKind::CacheOnePassInMemory,
        }
    }

    /// Called once per reset with the loader stopped. `previous_drained` tells
    /// whether the pass being replaced ran to its end-of-pass signal.
    pub fn should_reload(&mut self, previous_drained: bool) -> bool {
        match self {
            CacheStrategy::NoCache => true,
            CacheStrategy::OnePassInMemory(cache) => cache.should_reload(previous_drained),
        }
    }

    /// The buffer to draw from instead of the live pool, if this pass replays.
    pub fn load(&mut self) -> Option<&mut VecDeque<PooledSample>> {
        match self {
            CacheStrategy::OnePassInMemory(cache) if cache.phase == Phase::Replaying => {
                Some(&mut cache.replay)
            }
            _ => None,
        }
    }

    /// Hand back samples that were turned into a batch.
    pub fn drop_samples(&mut self, samples: Vec<PooledSample>) {
        if let CacheStrategy::OnePassInMemory(cache) = self {
            cache.collected.extend(samples);
        }
    }

    pub fn is_replaying(&self) -> bool {
        matches!(self, CacheStrategy::OnePassInMemory(cache) if cache.phase == Phase::Replaying)
    }

    /// Samples held in memory (replay + captured).
    pub fn cached_samples(&self) -> usize {
        match self {
            CacheStrategy::NoCache => 0,
            CacheStrategy::OnePassInMemory(cache) => cache.replay.len() + cache.collected.len(),
        }
    }
}
