//! Weight-bounded sample pool shared by the loader thread and the consumer.
//!
//! One mutex guards the buffered samples and their summed weight. Two condition
//! variables carry the two wait predicates:
//!
//! - `room`: the producer may push (`actual + weight <= capacity`, or
//!   `actual < capacity` when overrun is allowed). Signalled by the consumer
//!   after draining and by cancellation.
//! - `ready`: the consumer may draw (`actual >= requested`, no generator is
//!   live any more, or the producer is parked on a full pool). Signalled by
//!   the producer after every push, before parking, on every generator
//!   exhaustion and when it stops.
//!
//! External calls (generators, weighers) never run while the lock is held.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use rand::rngs::StdRng;

use crate::error::{ProviderError, Result};
use crate::sample::PooledSample;

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative stop flag for the loader thread. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Drawing
// ============================================================================

/// Move samples out of `pool` until `max_weight` is reached or the pool runs
/// dry. FIFO without an rng; with one, a random element is swapped with the
/// back and popped. A sample that would push the drawn weight past
/// `max_weight` is left in place, unless nothing has been drawn yet.
pub(crate) fn draw_samples(
    pool: &mut VecDeque<PooledSample>,
    max_weight: usize,
    mut rng: Option<&mut StdRng>,
) -> (Vec<PooledSample>, usize) {
    let mut drawn = Vec::new();
    let mut weight = 0usize;

    while weight < max_weight && !pool.is_empty() {
        let index = match rng.as_mut() {
            Some(rng) => rng.random_range(0..pool.len()),
            None => 0,
        };
        let next = pool[index].weight;
        if !drawn.is_empty() && weight.saturating_add(next) > max_weight {
            break;
        }
        let taken = if index == 0 && rng.is_none() {
            pool.pop_front()
        } else {
            pool.swap_remove_back(index)
        };
        if let Some(item) = taken {
            weight += item.weight;
            drawn.push(item);
        }
    }
    (drawn, weight)
}

// ============================================================================
// SamplePool
// ============================================================================

#[derive(Default)]
struct PoolState {
    samples: VecDeque<PooledSample>,
    actual_weight: usize,
    active_generators: usize,
    producer_blocked: bool,
    /// The loader has stopped for this pass.
    finished: bool,
    /// It stopped because every generator ran dry.
    exhausted: bool,
    failure: Option<ProviderError>,
}

pub struct SamplePool {
    state: Mutex<PoolState>,
    room: Condvar,
    ready: Condvar,
    capacity: usize,
    may_overrun: bool,
}

impl SamplePool {
    /// `capacity = None` means unbounded. Callers reject a zero capacity.
    pub fn new(capacity: Option<usize>, may_overrun: bool) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            room: Condvar::new(),
            ready: Condvar::new(),
            capacity: capacity.unwrap_or(usize::MAX),
            may_overrun,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn has_room(&self, state: &PoolState, weight: usize) -> bool {
        if self.may_overrun {
            state.actual_weight < self.capacity
        } else {
            state.actual_weight.saturating_add(weight) <= self.capacity
        }
    }

    /// Empty the pool and arm it for a pass fed by `active_generators` sources.
    pub fn begin_pass(&self, active_generators: usize) {
        let mut state = self.state.lock();
        state.samples.clear();
        state.actual_weight = 0;
        state.active_generators = active_generators;
        state.producer_blocked = false;
        state.finished = false;
        state.exhausted = false;
        state.failure = None;
    }

    /// Drop every buffered sample. Only called while no producer runs.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.samples.clear();
        state.actual_weight = 0;
        state.active_generators = 0;
        state.producer_blocked = false;
        state.finished = false;
        state.exhausted = false;
    }

    /// Block until the sample fits, then insert it. Returns `Ok(false)` if the
    /// token was cancelled while waiting; the sample is dropped in that case.
    pub fn push(&self, item: PooledSample, cancel: &CancellationToken) -> Result<bool> {
        if !self.may_overrun && item.weight > self.capacity {
            return Err(ProviderError::configuration(format!(
                "sample weight {} can never fit pool capacity {}",
                item.weight, self.capacity
            )));
        }

        let mut state = self.state.lock();
        while !cancel.is_cancelled() && !self.has_room(&state, item.weight) {
            // The pool cannot grow: let a consumer waiting for more take what is there.
            state.producer_blocked = true;
            self.ready.notify_all();
            self.room.wait(&mut state);
        }
        state.producer_blocked = false;
        if cancel.is_cancelled() {
            return Ok(false);
        }
        state.actual_weight += item.weight;
        state.samples.push_back(item);
        drop(state);
        self.ready.notify_all();
        Ok(true)
    }

    /// Record that one generator ran dry.
    pub fn generator_exhausted(&self) {
        let mut state = self.state.lock();
        state.active_generators = state.active_generators.saturating_sub(1);
        drop(state);
        self.ready.notify_all();
    }

    /// The producer has stopped: no generator will push again this pass.
    /// `exhausted` tells whether it ran every generator dry.
    pub fn finish(&self, failure: Option<ProviderError>, exhausted: bool) {
        let mut state = self.state.lock();
        state.active_generators = 0;
        state.finished = true;
        state.exhausted = exhausted && failure.is_none();
        if failure.is_some() {
            state.failure = failure;
        }
        drop(state);
        self.ready.notify_all();
        self.room.notify_all();
    }

    /// Wake a producer blocked on `room` so it can observe cancellation.
    pub fn wake_producer(&self) {
        let _state = self.state.lock();
        self.room.notify_all();
    }

    /// Wait until `requested` weight is buffered, the pass has ended or the
    /// pool is full, then draw up to `requested` weight. A producer failure is reported before
    /// any draw; the samples already buffered stay available.
    pub fn take(
        &self,
        requested: usize,
        rng: Option<&mut StdRng>,
    ) -> Result<(Vec<PooledSample>, usize)> {
        let mut state = self.state.lock();
        self.ready.wait_while(&mut state, |s| {
            s.failure.is_none()
                && s.actual_weight < requested
                && s.active_generators > 0
                && !s.producer_blocked
        });
        if let Some(failure) = state.failure.take() {
            return Err(failure);
        }

        let (drawn, weight) = draw_samples(&mut state.samples, requested, rng);
        state.actual_weight -= weight;
        // Room was freed; the producer re-flags itself if it still cannot push.
        state.producer_blocked = false;
        drop(state);
        self.room.notify_all();
        Ok((drawn, weight))
    }

    /// Wait until the producer pushes again or stops, then report whether the
    /// pass ran to exhaustion with nothing left to draw. Called before the
    /// producer is cancelled, so a consumer that took the last sample without
    /// asking for the end-of-pass batch still completes the pass.
    pub fn settle(&self) -> bool {
        let mut state = self.state.lock();
        self.ready.wait_while(&mut state, |s| {
            s.failure.is_none() && s.samples.is_empty() && !s.finished && !s.producer_blocked
        });
        state.finished && state.exhausted && state.failure.is_none() && state.samples.is_empty()
    }

    /// Failure recorded by the producer and not yet reported.
    pub fn take_failure(&self) -> Option<ProviderError> {
        self.state.lock().failure.take()
    }

    pub fn len(&self) -> usize {
        self.state.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn actual_weight(&self) -> usize {
        self.state.lock().actual_weight
    }

    pub fn active_generators(&self) -> usize {
        self.state.lock().active_generators
    }
}
