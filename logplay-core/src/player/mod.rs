//! Playback scheduling
//!
//! A [`Player`] owns one background worker that walks the global sample
//! sequence at the recorded pace scaled by a speed factor. All playback state
//! lives in a single [`PlaybackState`] behind one mutex. Control calls
//! (play, pause, seek, speed, span) mutate it under that lock and wake the
//! worker; the worker re-reads the state after every wait, so it never acts
//! on a half-applied change.
//!
//! Delivery happens with the state lock held. A pause therefore waits for an
//! in-flight delivery and no further sample is delivered after it returns.

mod pacing;

use crate::config::PlaybackConfig;
use crate::error::{ReplayError, Result};
use crate::log::{LogIndex, Timestamp};
use crate::router::{DeliveryOutcome, SampleDelivery};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Phase of the playback state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPhase {
    /// Paused or never started
    Idle,
    /// Delivering samples
    Playing,
    /// Worker halted; the player no longer accepts control calls
    Stopped,
}

/// Point-in-time view of the playback state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    /// State machine phase
    pub phase: PlayerPhase,
    /// Index of the next sample to deliver
    pub current_index: usize,
    /// First index of the replay window
    pub min_span: usize,
    /// Last index of the replay window
    pub max_span: usize,
    /// Number of samples in the sequence
    pub sample_count: usize,
    /// Requested speed factor
    pub speed_factor: f64,
    /// Achieved speed factor of the last tick
    pub actual_speed: f64,
    /// End of the span reached
    pub finished: bool,
    /// Outcome of the most recent delivery
    pub last_outcome: Option<DeliveryOutcome>,
}

#[derive(Debug)]
struct PlaybackState {
    phase: PlayerPhase,
    speed_factor: f64,
    actual_speed: f64,
    current_index: usize,
    min_span: usize,
    max_span: usize,
    sample_count: usize,
    finished: bool,
    loop_playback: bool,
    last_tick: Option<Instant>,
    generation: u64,
    last_outcome: Option<DeliveryOutcome>,
}

impl PlaybackState {
    fn new(sample_count: usize, config: &PlaybackConfig) -> Self {
        Self {
            phase: PlayerPhase::Idle,
            speed_factor: config.speed,
            actual_speed: config.speed,
            current_index: 0,
            min_span: 0,
            max_span: sample_count.saturating_sub(1),
            sample_count,
            finished: false,
            loop_playback: config.loop_playback,
            last_tick: None,
            generation: 0,
            last_outcome: None,
        }
    }

    fn is_playing(&self) -> bool {
        self.phase == PlayerPhase::Playing
    }

    fn has_finished(&self) -> bool {
        self.finished
            || (!self.is_playing() && self.sample_count > 0 && self.current_index == self.max_span)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.phase == PlayerPhase::Stopped {
            return Err(ReplayError::invalid_state("player has been stopped"));
        }
        Ok(())
    }

    /// Record an external change: invalidates any planned tick
    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.last_tick = None;
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if self.sample_count == 0 || index >= self.sample_count {
            return Err(ReplayError::invalid_argument(format!(
                "index {} out of range, {} samples",
                index, self.sample_count
            )));
        }
        Ok(())
    }

    fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            phase: self.phase,
            current_index: self.current_index,
            min_span: self.min_span,
            max_span: self.max_span,
            sample_count: self.sample_count,
            speed_factor: self.speed_factor,
            actual_speed: self.actual_speed,
            finished: self.has_finished(),
            last_outcome: self.last_outcome,
        }
    }
}

struct Shared {
    state: Mutex<PlaybackState>,
    wake: Notify,
    index: Arc<dyn LogIndex>,
    delivery: Arc<dyn SampleDelivery>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timestamp(&self, index: usize) -> Timestamp {
        self.index.timestamp_at(index).unwrap_or_default()
    }

    /// Plan the next tick. `None` while there is nothing to play.
    fn plan(&self) -> Option<(u64, std::time::Duration)> {
        let mut state = self.lock();
        if !state.is_playing() || state.finished || state.sample_count == 0 {
            return None;
        }

        let current = state.current_index;
        let previous = current.saturating_sub(1).max(state.min_span);
        let recorded_delta = self
            .timestamp(current)
            .micros_since(self.timestamp(previous));

        let elapsed = state
            .last_tick
            .map_or(0, |t| i64::try_from(t.elapsed().as_micros()).unwrap_or(i64::MAX));

        let plan = pacing::plan_tick(recorded_delta, state.speed_factor, elapsed);
        if plan.out_of_order {
            warn!(
                index = current,
                delta_us = recorded_delta,
                "Invalid sample order, replaying immediately"
            );
        }
        if let Some(speed) = plan.actual_speed {
            state.actual_speed = speed;
        }

        Some((state.generation, plan.wait))
    }

    /// Deliver the planned sample unless the plan went stale while waiting
    fn complete(&self, generation: u64) {
        let mut state = self.lock();
        if !state.is_playing() || state.generation != generation {
            return;
        }

        // delivery time counts against the next tick
        let tick = Instant::now();
        let current = state.current_index;
        let outcome = self.delivery.deliver(current);
        state.last_outcome = Some(outcome);
        if !outcome.is_replayed() {
            debug!(index = current, ?outcome, "Sample not replayed");
        }

        if current >= state.max_span {
            if state.loop_playback {
                debug!(min_span = state.min_span, "Looping replay span");
                state.current_index = state.min_span;
                state.last_tick = None;
                return;
            }
            state.finished = true;
            state.phase = PlayerPhase::Idle;
            info!(index = current, "Replay finished");
        } else {
            state.current_index = current + 1;
        }
        state.last_tick = Some(tick);
    }
}

/// Paced replay of the global sample sequence
pub struct Player {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    /// Start the background worker, paused at the first sample.
    ///
    /// # Errors
    ///
    /// Fails when called outside a Tokio runtime or with a non-positive
    /// speed factor.
    pub fn spawn(
        index: Arc<dyn LogIndex>,
        delivery: Arc<dyn SampleDelivery>,
        config: &PlaybackConfig,
    ) -> Result<Self> {
        check_speed(config.speed)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ReplayError::Setup(format!("no async runtime for playback: {}", e)))?;

        let shared = Arc::new(Shared {
            state: Mutex::new(PlaybackState::new(index.sample_count(), config)),
            wake: Notify::new(),
            index,
            delivery,
        });
        let cancel = CancellationToken::new();
        let worker = runtime.spawn(run(Arc::clone(&shared), cancel.clone()));

        Ok(Self {
            shared,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    fn update<T>(&self, f: impl FnOnce(&mut PlaybackState) -> Result<T>) -> Result<T> {
        let result = {
            let mut state = self.shared.lock();
            state.ensure_running()?;
            f(&mut state)?
        };
        self.shared.wake.notify_one();
        Ok(result)
    }

    /// Start or resume playback.
    ///
    /// A finished player restarts from the start of the span. Without
    /// samples this does nothing.
    pub fn play(&self) -> Result<()> {
        self.update(|state| {
            if state.sample_count == 0 || state.is_playing() {
                return Ok(());
            }
            if state.finished {
                state.current_index = state.min_span;
                state.finished = false;
            }
            state.phase = PlayerPhase::Playing;
            state.touch();
            debug!(index = state.current_index, "Playback started");
            Ok(())
        })
    }

    /// Pause playback after the current tick
    pub fn pause(&self) -> Result<()> {
        self.update(|state| {
            if state.is_playing() {
                state.phase = PlayerPhase::Idle;
                state.touch();
                debug!(index = state.current_index, "Playback paused");
            }
            Ok(())
        })
    }

    /// Toggle between playing and paused
    pub fn toggle(&self) -> Result<()> {
        if self.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Pause and return to the start of the span
    pub fn rewind(&self) -> Result<()> {
        self.update(|state| {
            state.phase = PlayerPhase::Idle;
            state.current_index = state.min_span;
            state.finished = false;
            state.touch();
            Ok(())
        })
    }

    /// Jump to `index`. The next tick is timed from the new position.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `index` lies outside the span; state is left
    /// unchanged.
    pub fn seek(&self, index: usize) -> Result<()> {
        self.update(|state| {
            state.check_index(index)?;
            if index < state.min_span || index > state.max_span {
                return Err(ReplayError::invalid_argument(format!(
                    "index {} outside span [{}, {}]",
                    index, state.min_span, state.max_span
                )));
            }
            state.current_index = index;
            state.finished = false;
            state.touch();
            Ok(())
        })
    }

    /// Set the speed factor, effective from the next wait
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless `factor` is finite and positive.
    pub fn set_speed_factor(&self, factor: f64) -> Result<()> {
        check_speed(factor)?;
        self.update(|state| {
            state.speed_factor = factor;
            state.generation = state.generation.wrapping_add(1);
            Ok(())
        })
    }

    /// Restrict replay to the inclusive window `[min, max]`, clamping the
    /// current index into it
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless `min <= max < sample_count`.
    pub fn set_span(&self, min: usize, max: usize) -> Result<()> {
        self.update(|state| {
            state.check_index(max)?;
            if min > max {
                return Err(ReplayError::invalid_argument(format!(
                    "span start {} after span end {}",
                    min, max
                )));
            }
            state.min_span = min;
            state.max_span = max;
            state.current_index = state.current_index.clamp(min, max);
            state.finished = false;
            state.touch();
            Ok(())
        })
    }

    /// Move the start of the span
    pub fn set_min_span(&self, min: usize) -> Result<()> {
        let (_, max) = self.span();
        self.set_span(min, max)
    }

    /// Move the end of the span
    pub fn set_max_span(&self, max: usize) -> Result<()> {
        let (min, _) = self.span();
        self.set_span(min, max)
    }

    /// Deliver the current sample and move one forward.
    ///
    /// Once the end of the span has been delivered this returns
    /// [`DeliveryOutcome::Unavailable`] without delivering again.
    ///
    /// # Errors
    ///
    /// `InvalidState` while playing, `InvalidArgument` without samples.
    pub fn step_forward(&self) -> Result<DeliveryOutcome> {
        self.step(|state| {
            if state.finished {
                return None;
            }
            let current = state.current_index;
            if current < state.max_span {
                state.current_index = current + 1;
            } else {
                state.finished = true;
            }
            Some(current)
        })
    }

    /// Move one back and deliver that sample
    ///
    /// # Errors
    ///
    /// `InvalidState` while playing, `InvalidArgument` without samples.
    pub fn step_backward(&self) -> Result<DeliveryOutcome> {
        self.step(|state| {
            if state.current_index > state.min_span {
                state.current_index -= 1;
            }
            state.finished = false;
            Some(state.current_index)
        })
    }

    fn step(
        &self,
        advance: impl FnOnce(&mut PlaybackState) -> Option<usize>,
    ) -> Result<DeliveryOutcome> {
        self.update(|state| {
            if state.is_playing() {
                return Err(ReplayError::invalid_state("cannot step while playing"));
            }
            state.check_index(state.current_index)?;

            let Some(target) = advance(state) else {
                return Ok(DeliveryOutcome::Unavailable);
            };
            let outcome = self.shared.delivery.deliver(target);
            state.last_outcome = Some(outcome);
            state.touch();
            Ok(outcome)
        })
    }

    /// Halt the worker and wait for it to exit. Safe to call repeatedly.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.lock();
            if state.phase != PlayerPhase::Stopped {
                state.phase = PlayerPhase::Stopped;
                state.touch();
            }
        }
        self.cancel.cancel();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Playback worker ended abnormally: {}", e);
            }
            debug!("Playback worker stopped");
        }
    }

    /// Snapshot of the whole playback state
    pub fn status(&self) -> PlaybackStatus {
        self.shared.lock().status()
    }

    /// Current phase
    pub fn phase(&self) -> PlayerPhase {
        self.shared.lock().phase
    }

    /// Whether samples are being delivered
    pub fn is_playing(&self) -> bool {
        self.shared.lock().is_playing()
    }

    /// Whether the end of the span has been reached
    pub fn has_finished(&self) -> bool {
        self.shared.lock().has_finished()
    }

    /// Index of the next sample to deliver
    pub fn current_index(&self) -> usize {
        self.shared.lock().current_index
    }

    /// Inclusive replay window
    pub fn span(&self) -> (usize, usize) {
        let state = self.shared.lock();
        (state.min_span, state.max_span)
    }

    /// Requested speed factor
    pub fn speed_factor(&self) -> f64 {
        self.shared.lock().speed_factor
    }

    /// Achieved speed factor of the last tick
    pub fn actual_speed(&self) -> f64 {
        self.shared.lock().actual_speed
    }

    /// Number of samples in the sequence
    pub fn sample_count(&self) -> usize {
        self.shared.lock().sample_count
    }

    /// Outcome of the most recent delivery
    pub fn last_outcome(&self) -> Option<DeliveryOutcome> {
        self.shared.lock().last_outcome
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn check_speed(factor: f64) -> Result<()> {
    if factor.is_finite() && factor > 0.0 {
        Ok(())
    } else {
        Err(ReplayError::invalid_argument(format!(
            "speed factor must be positive, got {}",
            factor
        )))
    }
}

async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    debug!("Playback worker started");

    loop {
        let Some((generation, wait)) = shared.plan() else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = shared.wake.notified() => {}
            }
            continue;
        };

        if !wait.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = shared.wake.notified() => continue,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        if cancel.is_cancelled() {
            break;
        }
        shared.complete(generation);
        tokio::task::yield_now().await;
    }
}
