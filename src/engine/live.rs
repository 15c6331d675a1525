//! Audio-thread half of a convolver
//!
//! [`LiveConvolution`] owns the live state. Once per block it may pick up a
//! freshly published state, never waiting for the lock to do so. States it
//! lets go of are handed back to the worker for freeing; nothing in
//! [`LiveConvolution::process`] allocates, frees, blocks or logs.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};

use crate::config::{BypassMode, EngineConfig};
use crate::dsp::partitioned::ConvolutionState;
use crate::engine::controller::Shared;
use crate::engine::lifecycle::LifecycleState;

/// Outcome of one processed block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Convolved with the live state
    Convolved,
    /// Convolved while crossfading from the previous state
    Crossfading,
    /// Bypass output was written
    Bypassed,
}

pub struct LiveConvolution {
    shared: Arc<Shared>,
    retire: Sender<Box<ConvolutionState>>,
    /// States the retire queue had no room for, retried every block
    deferred: Vec<Box<ConvolutionState>>,
    /// Most states this side may own at once: deferred, live and fading
    owned_limit: usize,
    live: Option<Box<ConvolutionState>>,
    fading: Option<Box<ConvolutionState>>,
    fade_pos: usize,
    fade_len: usize,
    scratch: Vec<f32>,
    bypass: BypassMode,
}

impl std::fmt::Debug for LiveConvolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConvolution")
            .field("live", &self.live.as_ref().map(|s| s.block_size()))
            .field("fading", &self.fading.is_some())
            .field("bypass", &self.bypass)
            .finish()
    }
}

impl LiveConvolution {
    pub(crate) fn new(
        shared: Arc<Shared>,
        retire: Sender<Box<ConvolutionState>>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            shared,
            retire,
            deferred: Vec::with_capacity(config.retire_queue_depth.max(1) + 2),
            owned_limit: config.retire_queue_depth.max(1) + 2,
            live: None,
            fading: None,
            fade_pos: 0,
            fade_len: config.crossfade_samples,
            scratch: vec![0.0; config.max_block_size],
            bypass: config.bypass,
        }
    }

    pub fn bypass_mode(&self) -> BypassMode {
        self.bypass
    }

    /// Is a state installed
    pub fn has_live_state(&self) -> bool {
        self.live.is_some()
    }

    /// Block size of the installed state
    pub fn live_block_size(&self) -> Option<usize> {
        self.live.as_ref().map(|s| s.block_size())
    }

    pub fn is_crossfading(&self) -> bool {
        self.fading.is_some()
    }

    /// Process one block
    ///
    /// `input` and `output` must have the same length. Blocks whose length
    /// differs from the live state's block size are bypassed; the length is
    /// recorded for the control side to rebuild for.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> BlockOutcome {
        let n = input.len().min(output.len());
        let (input, output) = (&input[..n], &mut output[..n]);

        self.shared.observed_block_size.store(n, Ordering::Relaxed);
        self.flush_deferred();
        self.pick_up();

        let lifecycle = self.shared.lifecycle.load();
        if lifecycle.bypasses_audio() || self.shared.suspended.load(Ordering::Acquire) {
            self.release_all();
            self.bypass.apply(input, output);
            return BlockOutcome::Bypassed;
        }

        let Some(live) = self.live.as_mut() else {
            self.bypass.apply(input, output);
            return BlockOutcome::Bypassed;
        };
        if live.block_size() != n {
            self.bypass.apply(input, output);
            return BlockOutcome::Bypassed;
        }
        live.process(input, output);

        let Some(fading) = self.fading.as_mut() else {
            return BlockOutcome::Convolved;
        };
        if fading.block_size() != n || n > self.scratch.len() {
            self.end_fade();
            return BlockOutcome::Convolved;
        }

        let old = &mut self.scratch[..n];
        fading.process(input, old);
        let fade_len = self.fade_len as f32;
        for (i, (new, old)) in output.iter_mut().zip(old.iter()).enumerate() {
            let t = ((self.fade_pos + i) as f32 / fade_len).min(1.0);
            *new = *new * t + *old * (1.0 - t);
        }
        self.fade_pos += n;
        if self.fade_pos >= self.fade_len {
            self.end_fade();
        }
        BlockOutcome::Crossfading
    }

    fn owned(&self) -> usize {
        self.deferred.len() + self.live.is_some() as usize + self.fading.is_some() as usize
    }

    /// Install a published state if one is waiting and the lock is free
    ///
    /// Left pending while the overflow could not take every state this side
    /// would then own, so a retirement never has to free in place.
    fn pick_up(&mut self) {
        if !self.shared.has_pending.load(Ordering::Acquire) || self.owned() >= self.owned_limit {
            return;
        }
        let Some(mut slot) = self.shared.pending.try_lock() else {
            return;
        };
        let Some(state) = slot.take() else {
            return;
        };
        self.shared.has_pending.store(false, Ordering::Release);
        self.shared
            .lifecycle
            .compare_exchange(LifecycleState::Swapped, LifecycleState::Running);
        drop(slot);
        self.install(state);
    }

    fn install(&mut self, state: Box<ConvolutionState>) {
        match self.live.take() {
            Some(previous) if self.fade_len > 0 => {
                if let Some(older) = self.fading.replace(previous) {
                    self.retire(older);
                }
                self.fade_pos = 0;
            }
            Some(previous) => self.retire(previous),
            None => {}
        }
        self.live = Some(state);
    }

    fn end_fade(&mut self) {
        if let Some(fading) = self.fading.take() {
            self.retire(fading);
        }
        self.fade_pos = 0;
    }

    fn release_all(&mut self) {
        self.end_fade();
        if let Some(live) = self.live.take() {
            self.retire(live);
        }
    }

    fn retire(&mut self, state: Box<ConvolutionState>) {
        match self.retire.try_send(state) {
            Ok(()) => {}
            // Capacity is reserved by `pick_up`
            Err(TrySendError::Full(state)) => self.deferred.push(state),
            Err(TrySendError::Disconnected(state)) => drop(state),
        }
    }

    fn flush_deferred(&mut self) {
        while let Some(state) = self.deferred.pop() {
            match self.retire.try_send(state) {
                Ok(()) => {}
                Err(TrySendError::Full(state)) => {
                    self.deferred.push(state);
                    return;
                }
                Err(TrySendError::Disconnected(state)) => drop(state),
            }
        }
    }
}

impl Drop for LiveConvolution {
    fn drop(&mut self) {
        self.release_all();
        for state in self.deferred.drain(..) {
            let _ = self.retire.try_send(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::controller::ReconfigController;
    use crate::engine::impulse::{ImpulseResponseSource, IrStore};
    use crate::engine::worker::BuildWorker;
    use approx::assert_abs_diff_eq;
    use std::time::{Duration, Instant};

    fn pump_until_runnable(
        controller: &ReconfigController,
        live: &mut LiveConvolution,
        block: usize,
    ) {
        let input = vec![0.0; block];
        let mut output = vec![0.0; block];
        let deadline = Instant::now() + Duration::from_secs(10);
        while !controller.is_runnable() {
            assert!(Instant::now() < deadline, "build did not complete");
            live.process(&input, &mut output);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn setup(config: &EngineConfig) -> (BuildWorker, ReconfigController, LiveConvolution) {
        let worker = BuildWorker::spawn(config).unwrap();
        let (mut controller, live) = ReconfigController::new(
            "live-test",
            &worker.handle(),
            Arc::new(IrStore::default()),
            config,
        );
        controller.set_source(ImpulseResponseSource::from_samples(vec![0.5f32], 48000));
        controller.set_sample_rate(48000).unwrap();
        controller.change_buffer_size(64).unwrap();
        (worker, controller, live)
    }

    fn publish_gain(shared: &Shared, gain: f32, block: usize) {
        let generation = shared.bump_generation();
        shared.lifecycle.transition(LifecycleState::Building).unwrap();
        let state = Box::new(ConvolutionState::build(&[gain], 48000, block).unwrap());
        assert!(shared.publish(generation, state).is_ok());
    }

    fn first_sample(live: &mut LiveConvolution, block: usize) -> f32 {
        let input = vec![1.0; block];
        let mut output = vec![0.0; block];
        live.process(&input, &mut output);
        output[0]
    }

    #[test]
    fn test_bypass_before_start() {
        let config = EngineConfig::default();
        let (_worker, _controller, mut live) = setup(&config);
        let input = vec![0.25; 64];
        let mut output = vec![0.0; 64];
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Bypassed);
        assert_eq!(output, input);
    }

    #[test]
    fn test_picks_up_published_state() {
        let config = EngineConfig::default();
        let (_worker, mut controller, mut live) = setup(&config);
        assert!(controller.start(false));
        pump_until_runnable(&controller, &mut live, 64);

        let input = vec![1.0; 64];
        let mut output = vec![0.0; 64];
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Convolved);
        assert!(output.iter().all(|s| (s - 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_wrong_block_size_is_bypassed_and_recorded() {
        let config = EngineConfig::default();
        let (_worker, mut controller, mut live) = setup(&config);
        controller.start(false);
        pump_until_runnable(&controller, &mut live, 64);

        let input = vec![1.0; 32];
        let mut output = vec![0.0; 32];
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Bypassed);
        assert_eq!(output, input);
        assert_eq!(controller.observed_block_size(), Some(32));
    }

    #[test]
    fn test_stop_releases_state_to_worker() {
        let config = EngineConfig::default();
        let (worker, mut controller, mut live) = setup(&config);
        controller.start(false);
        pump_until_runnable(&controller, &mut live, 64);

        controller.stop();
        let input = vec![1.0; 64];
        let mut output = vec![0.0; 64];
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Bypassed);
        assert!(!live.has_live_state());

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.stats().retired() == 0 {
            assert!(Instant::now() < deadline, "state was not retired");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_swap_crossfades() {
        let config = EngineConfig {
            crossfade_samples: 128,
            ..Default::default()
        };
        let (_worker, mut controller, mut live) = setup(&config);
        controller.start(false);
        pump_until_runnable(&controller, &mut live, 64);

        controller.set_source(ImpulseResponseSource::from_samples(vec![1.0f32], 48000));
        assert!(controller.start(true));
        pump_until_runnable(&controller, &mut live, 64);

        // The pump block that installed the state ran the first half of the fade
        assert!(live.is_crossfading());
        let input = vec![1.0; 64];
        let mut output = vec![0.0; 64];
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Crossfading);
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Convolved);
        assert!(output.iter().all(|s| (s - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_suspend_bypasses_until_next_publish() {
        let config = EngineConfig::default();
        let (_worker, mut controller, mut live) = setup(&config);
        controller.start(false);
        pump_until_runnable(&controller, &mut live, 64);

        controller.set_not_runnable();
        assert_eq!(controller.state(), LifecycleState::Failed);
        let input = vec![1.0; 64];
        let mut output = vec![0.0; 64];
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Bypassed);

        assert!(controller.start(false));
        pump_until_runnable(&controller, &mut live, 64);
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Convolved);
    }

    #[test]
    fn test_full_retire_queue_holds_back_pickup() {
        let config = EngineConfig {
            crossfade_samples: 0,
            retire_queue_depth: 1,
            ..Default::default()
        };
        let shared = Arc::new(Shared::new());
        let (retire_tx, retire_rx) = crossbeam_channel::bounded(1);
        let mut live = LiveConvolution::new(Arc::clone(&shared), retire_tx, &config);

        // One state in the queue, two in the overflow, one live
        for gain in [1.0, 2.0, 3.0, 4.0] {
            publish_gain(&shared, gain, 16);
            assert_abs_diff_eq!(first_sample(&mut live, 16), gain, epsilon = 1e-5);
        }
        assert_eq!(live.deferred.len(), 2);

        // No room left to let go of the live state: the new one waits
        publish_gain(&shared, 5.0, 16);
        assert_abs_diff_eq!(first_sample(&mut live, 16), 4.0, epsilon = 1e-5);
        assert!(shared.pending.lock().is_some());

        // The worker frees one, the overflow drains and the pickup goes through
        assert!(retire_rx.try_recv().is_ok());
        assert_abs_diff_eq!(first_sample(&mut live, 16), 5.0, epsilon = 1e-5);
        assert!(shared.pending.lock().is_none());
    }

    #[test]
    fn test_block_larger_than_scratch_still_convolves() {
        let config = EngineConfig {
            max_block_size: 16,
            ..Default::default()
        };
        let shared = Arc::new(Shared::new());
        let (retire_tx, _retire_rx) = crossbeam_channel::bounded(4);
        let mut live = LiveConvolution::new(Arc::clone(&shared), retire_tx, &config);

        publish_gain(&shared, 0.5, 32);
        let input = vec![1.0; 32];
        let mut output = vec![0.0; 32];
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Convolved);
        assert!(output.iter().all(|s| (s - 0.5).abs() < 1e-5));

        // A swap cannot fade through the small scratch and switches hard
        publish_gain(&shared, 2.0, 32);
        assert_eq!(live.process(&input, &mut output), BlockOutcome::Convolved);
        assert!(output.iter().all(|s| (s - 2.0).abs() < 1e-5));
        assert!(!live.is_crossfading());
    }
}
