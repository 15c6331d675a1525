//! Reconfiguration controller
//!
//! Control-thread half of a convolver. It owns the configuration (impulse
//! source, tone shaping, sample rate, block size), schedules builds on the
//! [`BuildWorker`](crate::engine::worker::BuildWorker) and reports their
//! outcome. The audio-thread half is [`LiveConvolution`].
//!
//! Every request bumps a generation counter. A finished build is published
//! only while its generation is still current and the controller is not
//! stopped; the check and the publish happen under the same mutex that
//! `stop` and `start` take, so a stopped controller never sees a late state.
//! The audio thread only ever `try_lock`s that mutex.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, ResamplerConfig};
use crate::dsp::partitioned::{validate_block_size, ConvolutionState};
use crate::dsp::tone::ImpulseShaping;
use crate::engine::impulse::{ImpulseResponseSource, IrStore};
use crate::engine::lifecycle::{AtomicLifecycle, LifecycleState};
use crate::engine::live::LiveConvolution;
use crate::engine::worker::{BuildJob, WorkerHandle};
use crate::error::{ConvolverError, ErrorKind, Result};

/// Everything a build needs, captured when it is scheduled
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source: ImpulseResponseSource,
    pub shaping: ImpulseShaping,
    pub sample_rate: u32,
    pub block_size: usize,
    pub resampler: ResamplerConfig,
    pub store: Arc<IrStore>,
}

impl BuildRequest {
    /// Prepare, shape and partition the impulse response
    pub fn build(&self) -> Result<ConvolutionState> {
        validate_block_size(self.block_size)?;
        let prepared = self
            .store
            .prepare(&self.source, self.sample_rate, &self.resampler)?;
        let mut samples = prepared.samples.to_vec();
        self.shaping.apply(&mut samples, self.sample_rate);
        ConvolutionState::build(&samples, self.sample_rate, self.block_size)
    }
}

/// Why a build did not produce a state
#[derive(Debug, Clone, PartialEq)]
pub struct BuildFailure {
    pub generation: u64,
    pub kind: ErrorKind,
    pub message: String,
    /// Configuration the build was attempted with
    pub source: ImpulseResponseSource,
    pub block_size: usize,
    pub sample_rate: u32,
}

impl BuildFailure {
    pub(crate) fn new(generation: u64, request: &BuildRequest, error: &ConvolverError) -> Self {
        Self {
            generation,
            kind: error.kind(),
            message: error.to_string(),
            source: request.source.clone(),
            block_size: request.block_size,
            sample_rate: request.sample_rate,
        }
    }
}

/// Outcome notifications sent to the configuration layer
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Published {
        generation: u64,
        block_size: usize,
        partitions: usize,
    },
    Failed(BuildFailure),
}

/// Notifications kept before the oldest is dropped
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Bounded queue of build notifications; a full queue drops its oldest event
#[derive(Debug, Clone)]
pub(crate) struct EventQueue {
    tx: Sender<BuildEvent>,
    rx: Receiver<BuildEvent>,
}

impl EventQueue {
    fn new(depth: usize) -> Self {
        let (tx, rx) = bounded(depth.max(1));
        Self { tx, rx }
    }

    pub(crate) fn push(&self, mut event: BuildEvent) {
        loop {
            match self.tx.try_send(event) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.rx.try_recv();
                    event = rejected;
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }
}

/// State shared between the controller, the worker and the audio thread
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) lifecycle: AtomicLifecycle,
    generation: AtomicU64,
    /// Published state not yet picked up by the audio thread
    pub(crate) pending: Mutex<Option<Box<ConvolutionState>>>,
    pub(crate) has_pending: AtomicBool,
    /// Bypass until the next publish
    pub(crate) suspended: AtomicBool,
    /// Last block length the audio thread was called with
    pub(crate) observed_block_size: AtomicUsize,
    last_failure: Mutex<Option<BuildFailure>>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: AtomicLifecycle::new(LifecycleState::Idle),
            generation: AtomicU64::new(0),
            pending: Mutex::new(None),
            has_pending: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            observed_block_size: AtomicUsize::new(0),
            last_failure: Mutex::new(None),
        }
    }

    /// Supersede every earlier request; returns the new generation
    pub(crate) fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Hand a finished state to the audio thread
    ///
    /// Gives the state back when it is stale or the controller was stopped.
    pub(crate) fn publish(
        &self,
        generation: u64,
        state: Box<ConvolutionState>,
    ) -> std::result::Result<(), Box<ConvolutionState>> {
        let replaced = {
            let mut slot = self.pending.lock();
            if !self.is_current(generation)
                || self.lifecycle.transition(LifecycleState::Swapped).is_err()
            {
                return Err(state);
            }
            let replaced = slot.replace(state);
            self.has_pending.store(true, Ordering::Release);
            self.suspended.store(false, Ordering::Release);
            *self.last_failure.lock() = None;
            replaced
        };
        drop(replaced);
        Ok(())
    }

    /// Record a failed build; false when it was already superseded
    pub(crate) fn fail(&self, failure: BuildFailure) -> bool {
        let _slot = self.pending.lock();
        if !self.is_current(failure.generation)
            || self.lifecycle.transition(LifecycleState::Failed).is_err()
        {
            return false;
        }
        *self.last_failure.lock() = Some(failure);
        true
    }
}

/// Control-thread half of a convolver
pub struct ReconfigController {
    name: String,
    shared: Arc<Shared>,
    worker: WorkerHandle,
    events: EventQueue,
    store: Arc<IrStore>,
    resampler: ResamplerConfig,
    source: Option<ImpulseResponseSource>,
    shaping: ImpulseShaping,
    sample_rate: u32,
    block_size: usize,
    /// Largest block the audio thread has scratch space for
    max_block_size: usize,
    /// Set by `start`, cleared by `stop`
    enabled: bool,
}

impl std::fmt::Debug for ReconfigController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconfigController")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("sample_rate", &self.sample_rate)
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl ReconfigController {
    /// Create a controller and the audio-thread half bound to it
    pub fn new(
        name: impl Into<String>,
        worker: &WorkerHandle,
        store: Arc<IrStore>,
        config: &EngineConfig,
    ) -> (Self, LiveConvolution) {
        let shared = Arc::new(Shared::new());
        let live = LiveConvolution::new(Arc::clone(&shared), worker.retire_sender(), config);
        let controller = Self {
            name: name.into(),
            shared,
            worker: worker.clone(),
            events: EventQueue::new(EVENT_QUEUE_DEPTH),
            store,
            resampler: config.resampler.clone(),
            source: None,
            shaping: ImpulseShaping::Flat,
            sample_rate: 0,
            block_size: 0,
            max_block_size: config.max_block_size,
            enabled: false,
        };
        (controller, live)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.lifecycle.load()
    }

    /// True only while the audio thread processes with a published state
    pub fn is_runnable(&self) -> bool {
        self.state().is_runnable()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn source(&self) -> Option<&ImpulseResponseSource> {
        self.source.as_ref()
    }

    pub fn shaping(&self) -> ImpulseShaping {
        self.shaping
    }

    pub fn store(&self) -> &Arc<IrStore> {
        &self.store
    }

    // ========================================================================
    // Configuration (takes effect on the next start/restart)
    // ========================================================================

    pub fn set_source(&mut self, source: ImpulseResponseSource) {
        self.source = Some(source);
    }

    pub fn set_shaping(&mut self, shaping: ImpulseShaping) {
        self.shaping = shaping;
    }

    /// Set the processing rate
    ///
    /// # Errors
    /// * `InvalidSampleRate` - if `rate` is zero
    pub fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        if rate == 0 {
            return Err(ConvolverError::InvalidSampleRate {
                rate,
                context: format!("{} processing rate", self.name),
            });
        }
        self.sample_rate = rate;
        Ok(())
    }

    // ========================================================================
    // Lifecycle operations
    // ========================================================================

    /// Schedule a build unless one is already pending or running
    ///
    /// Returns true when a build is scheduled or a state is in use. Without
    /// `force`, calling this again while building or running changes nothing.
    /// When the block size is still unknown the build is deferred until
    /// [`change_buffer_size`](Self::change_buffer_size).
    pub fn start(&mut self, force: bool) -> bool {
        self.enabled = true;
        let state = self.state();
        if !force && (state.is_pending() || state.is_runnable()) {
            return true;
        }
        if self.block_size == 0 {
            debug!(convolver = %self.name, "start deferred until the block size is known");
            return false;
        }
        self.schedule()
    }

    /// Stop processing; an in-flight build is discarded when it finishes
    pub fn stop(&mut self) {
        self.enabled = false;
        let stale = {
            let mut slot = self.shared.pending.lock();
            self.shared.bump_generation();
            let _ = self.shared.lifecycle.transition(LifecycleState::Stopped);
            self.shared.has_pending.store(false, Ordering::Release);
            slot.take()
        };
        if stale.is_some() {
            debug!(convolver = %self.name, "dropped unpicked state on stop");
        }
    }

    /// `stop()` followed by `start()`
    pub fn restart(&mut self) -> bool {
        self.stop();
        self.start(false)
    }

    /// Record a new host block size and rebuild for it
    ///
    /// Until the rebuild is picked up the audio thread keeps processing
    /// blocks of the old size and bypasses blocks of the new one.
    ///
    /// # Errors
    /// * `InvalidBlockSize` - if `block_size` is zero or above the
    ///   configured `max_block_size`
    pub fn change_buffer_size(&mut self, block_size: usize) -> Result<bool> {
        validate_block_size(block_size)?;
        if block_size > self.max_block_size {
            return Err(ConvolverError::InvalidBlockSize {
                size: block_size,
                max: self.max_block_size,
            });
        }
        if block_size == self.block_size {
            return Ok(false);
        }
        info!(
            convolver = %self.name,
            from = self.block_size,
            to = block_size,
            "block size changed"
        );
        self.block_size = block_size;
        if !self.enabled {
            return Ok(false);
        }
        Ok(self.schedule())
    }

    /// Bypass immediately and report `Failed`, keeping the configuration
    ///
    /// Processing resumes with the next published build.
    pub fn set_not_runnable(&mut self) {
        let stale = {
            let mut slot = self.shared.pending.lock();
            self.shared.suspended.store(true, Ordering::Release);
            let _ = self.shared.lifecycle.transition(LifecycleState::Failed);
            self.shared.has_pending.store(false, Ordering::Release);
            slot.take()
        };
        drop(stale);
        debug!(convolver = %self.name, "processing suspended");
    }

    /// Block length the audio thread was last called with, if any
    pub fn observed_block_size(&self) -> Option<usize> {
        match self.shared.observed_block_size.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    /// Most recent failure of a current build
    pub fn last_failure(&self) -> Option<BuildFailure> {
        self.shared.last_failure.lock().clone()
    }

    /// Next build notification, if one arrived
    pub fn try_recv_event(&self) -> Option<BuildEvent> {
        self.events.rx.try_recv().ok()
    }

    /// Notifications waiting to be read
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Wait up to `timeout` for the next build notification
    pub fn wait_event(&self, timeout: Duration) -> Option<BuildEvent> {
        match self.events.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Build request for the current configuration
    pub fn current_request(&self) -> Option<BuildRequest> {
        Some(BuildRequest {
            source: self.source.clone()?,
            shaping: self.shaping,
            sample_rate: self.sample_rate,
            block_size: self.block_size,
            resampler: self.resampler.clone(),
            store: Arc::clone(&self.store),
        })
    }

    fn schedule(&mut self) -> bool {
        let Some(request) = self.current_request() else {
            warn!(convolver = %self.name, "no impulse response configured");
            return false;
        };

        let (generation, stale) = {
            let mut slot = self.shared.pending.lock();
            let generation = self.shared.bump_generation();
            let _ = self.shared.lifecycle.transition(LifecycleState::Building);
            self.shared.has_pending.store(false, Ordering::Release);
            (generation, slot.take())
        };
        drop(stale);

        info!(
            convolver = %self.name,
            generation,
            source = %request.source,
            sample_rate = request.sample_rate,
            block_size = request.block_size,
            "scheduling convolution build"
        );

        let job = BuildJob::new(
            self.name.clone(),
            generation,
            request,
            Arc::clone(&self.shared),
            self.events.clone(),
        );
        if let Err(job) = self.worker.submit(job) {
            warn!(convolver = %self.name, generation, "build worker is not running");
            let error = ConvolverError::build_failed("build worker is not running");
            job.report_failure(&error);
            return false;
        }
        true
    }
}
