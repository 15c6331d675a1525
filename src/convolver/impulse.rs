//! Generic impulse response convolver
//!
//! Convolves with any WAV file described by an [`IrSettings`] record, plus a
//! post gain in dB.

use tracing::info;

use crate::config::{EngineConfig, IrSettings};
use crate::convolver::{AudioPlugin, BaseConvolver, ControlPort};
use crate::dsp::tone::{ImpulseShaping, CHANGE_THRESHOLD};
use crate::engine::{LifecycleState, WorkerHandle};
use crate::error::Result;

#[derive(Debug)]
pub struct ImpulseConvolver {
    base: BaseConvolver,
    settings: IrSettings,
    gain: ControlPort,
    applied_gain: Option<f32>,
}

impl ImpulseConvolver {
    pub const ID: &'static str = "jconv";

    pub fn new(worker: &WorkerHandle, config: &EngineConfig) -> Self {
        Self::with_base(BaseConvolver::new(Self::ID, worker, config))
    }

    pub fn with_base(base: BaseConvolver) -> Self {
        Self {
            base,
            settings: IrSettings::default(),
            gain: ControlPort::new("gain", -20.0, 20.0, 0.0),
            applied_gain: None,
        }
    }

    pub fn settings(&self) -> &IrSettings {
        &self.settings
    }

    /// Replace the impulse response configuration and rebuild if active
    ///
    /// Returns whether a build was scheduled.
    ///
    /// # Errors
    /// * `InvalidParameter` - if the settings do not validate
    pub fn set_settings(&mut self, settings: IrSettings) -> Result<bool> {
        settings.validate()?;
        info!(file = %settings.full_ir_path().display(), "impulse response selected");
        self.settings = settings;
        if !self.settings.has_file() {
            self.base.stop();
            return Ok(false);
        }
        self.base.configure(self.settings.to_source(), ImpulseShaping::Flat);
        if self.base.is_active() {
            return Ok(self.base.restart());
        }
        Ok(false)
    }

    pub fn base(&self) -> &BaseConvolver {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseConvolver {
        &mut self.base
    }
}

impl AudioPlugin for ImpulseConvolver {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Convolver"
    }

    fn init(&mut self, sample_rate: u32) -> Result<()> {
        self.base.init(sample_rate)
    }

    fn activate(&mut self, start: bool) -> bool {
        if start {
            self.update();
        }
        self.base.activate(start)
    }

    fn process(&mut self, input: &[f32], output: &mut [f32]) {
        self.base.process(input, output);
    }

    fn update(&mut self) -> bool {
        let scheduled = self.base.sync_block_size();

        let gain = self.gain.get();
        let changed = self
            .applied_gain
            .map_or(true, |applied| (gain - applied).abs() > CHANGE_THRESHOLD);
        if changed {
            self.base.set_gain_db(gain);
            self.applied_gain = Some(gain);
        }
        scheduled
    }

    fn connect_port(&self, name: &str) -> Option<ControlPort> {
        match name {
            "gain" => Some(self.gain.clone()),
            _ => None,
        }
    }

    fn port_names(&self) -> Vec<&'static str> {
        vec!["gain"]
    }

    fn state(&self) -> LifecycleState {
        self.base.state()
    }
}
