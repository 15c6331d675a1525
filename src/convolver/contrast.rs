//! Presence ("contrast") filter
//!
//! A convolver whose kernel is shaped by a presence high shelf. The `level`
//! control sets the shelf gain, and half of it is taken back as post gain so
//! the overall loudness stays roughly constant.

use tracing::debug;

use crate::config::EngineConfig;
use crate::convolver::{AudioPlugin, BaseConvolver, ControlPort};
use crate::dsp::tone::{ImpulseShaping, ToneSettings, ToneTracker};
use crate::engine::{generate_impulse, ImpulseResponseSource, LifecycleState, WorkerHandle};
use crate::error::Result;

/// Length of the built-in kernel, long enough for the shelf response to decay
pub const PRESENCE_KERNEL_LEN: usize = 1024;

#[derive(Debug)]
pub struct ContrastConvolver {
    base: BaseConvolver,
    /// `None` uses a unit impulse at the processing rate
    source: Option<ImpulseResponseSource>,
    level: ControlPort,
    tracker: ToneTracker,
}

impl ContrastConvolver {
    pub const ID: &'static str = "pre";

    pub fn new(worker: &WorkerHandle, config: &EngineConfig) -> Self {
        Self::with_base(BaseConvolver::new(Self::ID, worker, config))
    }

    pub fn with_base(base: BaseConvolver) -> Self {
        Self {
            base,
            source: None,
            level: ControlPort::new("level", -10.0, 10.0, 0.0),
            tracker: ToneTracker::new(),
        }
    }

    /// Replace the built-in kernel
    pub fn with_source(mut self, source: ImpulseResponseSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn base(&self) -> &BaseConvolver {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseConvolver {
        &mut self.base
    }

    fn kernel(&self) -> ImpulseResponseSource {
        match &self.source {
            Some(source) => source.clone(),
            None => {
                let rate = self.base.controller().sample_rate().max(1);
                ImpulseResponseSource::from_samples(generate_impulse(PRESENCE_KERNEL_LEN), rate)
            }
        }
    }
}

impl AudioPlugin for ContrastConvolver {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Presence"
    }

    fn init(&mut self, sample_rate: u32) -> Result<()> {
        self.base.init(sample_rate)?;
        if self.source.is_none() {
            // The built-in kernel follows the processing rate
            self.tracker.invalidate();
        }
        Ok(())
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
        let mut scheduled = self.base.sync_block_size();

        let tone = ToneSettings::new(self.level.get(), 0.0, 0.0);
        if !self.tracker.sum_changed(&tone) {
            return scheduled;
        }
        self.tracker.update_sum(&tone);

        debug!(level = tone.level, "presence reconfigured");
        self.base.set_gain_db(-tone.level / 2.0);
        let shaping = ImpulseShaping::Presence { level: tone.level };
        self.base.configure(self.kernel(), shaping);
        if self.base.is_active() {
            scheduled |= self.base.start(true);
        }
        scheduled
    }

    fn connect_port(&self, name: &str) -> Option<ControlPort> {
        match name {
            "level" => Some(self.level.clone()),
            _ => None,
        }
    }

    fn port_names(&self) -> Vec<&'static str> {
        vec!["level"]
    }

    fn state(&self) -> LifecycleState {
        self.base.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::tone::db_to_gain;
    use crate::engine::{BlockOutcome, BuildWorker};
    use std::time::{Duration, Instant};

    fn pump(pre: &mut ContrastConvolver) {
        let input = vec![0.0; 128];
        let mut output = vec![0.0; 128];
        let deadline = Instant::now() + Duration::from_secs(10);
        while !pre.is_runnable() {
            assert!(Instant::now() < deadline, "presence did not become runnable");
            pre.process(&input, &mut output);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_default_kernel_follows_rate() {
        let config = EngineConfig::default();
        let worker = BuildWorker::spawn(&config).unwrap();
        let mut pre = ContrastConvolver::new(&worker.handle(), &config);
        pre.init(44100).unwrap();
        pre.update();

        let source = pre.base().controller().source().unwrap().clone();
        assert_eq!(
            source,
            ImpulseResponseSource::from_samples(generate_impulse(PRESENCE_KERNEL_LEN), 44100)
        );
    }

    #[test]
    fn test_flat_presence_passes_signal() {
        let config = EngineConfig::default();
        let worker = BuildWorker::spawn(&config).unwrap();
        let mut pre = ContrastConvolver::new(&worker.handle(), &config);
        pre.init(48000).unwrap();
        pre.base_mut().change_buffer_size(128).unwrap();
        assert!(pre.activate(true));
        pump(&mut pre);

        let input: Vec<f32> = (0..128).map(|i| (i as f32 * 0.05).sin()).collect();
        let mut output = vec![0.0; 128];
        assert_eq!(pre.base_mut().process(&input, &mut output), BlockOutcome::Convolved);
        for (a, b) in input.iter().zip(&output) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_level_reshapes_and_compensates() {
        let config = EngineConfig::default();
        let worker = BuildWorker::spawn(&config).unwrap();
        let mut pre = ContrastConvolver::new(&worker.handle(), &config);
        pre.init(48000).unwrap();
        pre.base_mut().change_buffer_size(128).unwrap();
        pre.activate(true);
        pump(&mut pre);

        pre.connect_port("level").unwrap().set(6.0);
        assert!(pre.update());
        assert_eq!(
            pre.base().controller().shaping(),
            ImpulseShaping::Presence { level: 6.0 }
        );
        assert!((pre.base().gain().target() - db_to_gain(-3.0)).abs() < 1e-6);

        // Unchanged level leaves the running build alone
        pump(&mut pre);
        assert!(!pre.update());
        assert_eq!(pre.state(), LifecycleState::Running);
    }

    #[test]
    fn test_ports() {
        let config = EngineConfig::default();
        let worker = BuildWorker::spawn(&config).unwrap();
        let pre = ContrastConvolver::new(&worker.handle(), &config);
        assert_eq!(pre.id(), "pre");
        assert_eq!(pre.port_names(), vec!["level"]);
        assert_eq!(pre.connect_port("level").unwrap().range(), (-10.0, 10.0));
        assert!(pre.connect_port("bass").is_none());
    }
}
