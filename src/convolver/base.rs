//! Shared core of all convolvers
//!
//! Controller, live convolution and post gain, wired together.

use std::sync::Arc;

use tracing::warn;

use crate::config::EngineConfig;
use crate::dsp::tone::{GainSmoother, ImpulseShaping};
use crate::engine::{
    BlockOutcome, ImpulseResponseSource, IrStore, LifecycleState, LiveConvolution,
    ReconfigController, WorkerHandle,
};
use crate::error::Result;

#[derive(Debug)]
pub struct BaseConvolver {
    controller: ReconfigController,
    live: LiveConvolution,
    gain: GainSmoother,
    active: bool,
    /// Host block size the controller refused, bypassed until it goes away
    unusable_block: Option<usize>,
}

impl BaseConvolver {
    pub fn new(name: &str, worker: &WorkerHandle, config: &EngineConfig) -> Self {
        Self::with_store(name, worker, Arc::new(IrStore::default()), config)
    }

    /// Use a specific impulse store, e.g. one with a custom loader
    pub fn with_store(
        name: &str,
        worker: &WorkerHandle,
        store: Arc<IrStore>,
        config: &EngineConfig,
    ) -> Self {
        let (controller, live) = ReconfigController::new(name, worker, store, config);
        Self {
            controller,
            live,
            gain: GainSmoother::new(1.0),
            active: false,
            unusable_block: None,
        }
    }

    pub fn controller(&self) -> &ReconfigController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ReconfigController {
        &mut self.controller
    }

    pub fn live(&self) -> &LiveConvolution {
        &self.live
    }

    pub fn state(&self) -> LifecycleState {
        self.controller.state()
    }

    pub fn is_runnable(&self) -> bool {
        self.controller.is_runnable()
    }

    /// Was `activate(true)` called without a later `activate(false)`
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn init(&mut self, sample_rate: u32) -> Result<()> {
        let changed = sample_rate != self.controller.sample_rate();
        self.controller.set_sample_rate(sample_rate)?;
        if changed && self.active {
            self.controller.restart();
        }
        Ok(())
    }

    pub fn activate(&mut self, start: bool) -> bool {
        self.active = start;
        if start {
            self.controller.start(false)
        } else {
            self.controller.stop();
            false
        }
    }

    pub fn configure(&mut self, source: ImpulseResponseSource, shaping: ImpulseShaping) {
        self.controller.set_source(source);
        self.controller.set_shaping(shaping);
    }

    pub fn start(&mut self, force: bool) -> bool {
        self.controller.start(force)
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    pub fn restart(&mut self) -> bool {
        self.controller.restart()
    }

    pub fn change_buffer_size(&mut self, block_size: usize) -> Result<bool> {
        self.controller.change_buffer_size(block_size)
    }

    pub fn set_not_runnable(&mut self) {
        self.controller.set_not_runnable();
    }

    /// Rebuild for the block size the audio thread is actually called with
    ///
    /// A block size the controller refuses marks the convolver not runnable;
    /// it is rebuilt once the host is back to a usable size.
    pub fn sync_block_size(&mut self) -> bool {
        let Some(observed) = self.controller.observed_block_size() else {
            return false;
        };
        if observed == self.controller.block_size() {
            if self.unusable_block.take().is_some() && self.active {
                return self.controller.start(true);
            }
            return false;
        }
        match self.controller.change_buffer_size(observed) {
            Ok(scheduled) => {
                self.unusable_block = None;
                scheduled
            }
            Err(e) => {
                if self.unusable_block != Some(observed) {
                    warn!(convolver = %self.controller.name(), error = %e, "unusable host block size");
                    self.unusable_block = Some(observed);
                    self.controller.set_not_runnable();
                }
                false
            }
        }
    }

    /// Post-convolution gain target in dB
    pub fn set_gain_db(&mut self, db: f32) {
        self.gain.set_target_db(db);
    }

    /// Jump to the gain target, e.g. before an offline render
    pub fn settle_gain(&mut self) {
        self.gain.settle();
    }

    pub fn gain(&self) -> &GainSmoother {
        &self.gain
    }

    /// Convolve, then apply the smoothed post gain to convolved output
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> BlockOutcome {
        let outcome = self.live.process(input, output);
        if outcome != BlockOutcome::Bypassed {
            let n = input.len().min(output.len());
            self.gain.process(&mut output[..n]);
        }
        outcome
    }
}
