//! Speaker cabinet simulator
//!
//! Convolves with one impulse response out of a fixed cabinet table. Bass and
//! treble are shelves baked into the impulse response; level is a post gain.
//! Selecting another cabinet reloads the file, a tone change only re-shapes
//! the cached impulse, and a level change never rebuilds.

use tracing::debug;

use crate::config::EngineConfig;
use crate::convolver::{AudioPlugin, BaseConvolver, ControlPort};
use crate::dsp::tone::{ImpulseShaping, ToneSettings, ToneTracker};
use crate::engine::{ImpulseResponseSource, LifecycleState, WorkerHandle};
use crate::error::{ConvolverError, Result};

/// One selectable cabinet
#[derive(Debug, Clone, PartialEq)]
pub struct CabinetEntry {
    pub name: String,
    pub source: ImpulseResponseSource,
}

impl CabinetEntry {
    pub fn new(name: impl Into<String>, source: ImpulseResponseSource) -> Self {
        Self {
            name: name.into(),
            source,
        }
    }
}

#[derive(Debug)]
pub struct CabinetConvolver {
    base: BaseConvolver,
    cabinets: Vec<CabinetEntry>,
    level: ControlPort,
    bass: ControlPort,
    treble: ControlPort,
    cabinet: ControlPort,
    tracker: ToneTracker,
    applied: ToneSettings,
}

impl CabinetConvolver {
    pub const ID: &'static str = "cab";

    /// # Errors
    /// * `InvalidParameter` - if `cabinets` is empty
    pub fn new(
        cabinets: Vec<CabinetEntry>,
        worker: &WorkerHandle,
        config: &EngineConfig,
    ) -> Result<Self> {
        Self::with_base(cabinets, BaseConvolver::new(Self::ID, worker, config))
    }

    /// Build around an existing base, e.g. one with a custom impulse store
    pub fn with_base(cabinets: Vec<CabinetEntry>, base: BaseConvolver) -> Result<Self> {
        if cabinets.is_empty() {
            return Err(ConvolverError::InvalidParameter {
                param: "cabinets".to_string(),
                value: "[]".to_string(),
                expected: "at least one cabinet".to_string(),
            });
        }
        let last = (cabinets.len() - 1) as f32;
        Ok(Self {
            base,
            cabinets,
            level: ControlPort::new("level", -20.0, 20.0, 0.0),
            bass: ControlPort::new("bass", -10.0, 10.0, 0.0),
            treble: ControlPort::new("treble", -10.0, 10.0, 0.0),
            cabinet: ControlPort::new("cabinet", 0.0, last, 0.0),
            tracker: ToneTracker::new(),
            applied: ToneSettings::default(),
        })
    }

    pub fn cabinets(&self) -> &[CabinetEntry] {
        &self.cabinets
    }

    /// Index of the cabinet the port currently selects
    pub fn selected_cabinet(&self) -> usize {
        (self.cabinet.get().round().max(0.0) as usize).min(self.cabinets.len() - 1)
    }

    pub fn tone(&self) -> ToneSettings {
        ToneSettings::new(self.level.get(), self.bass.get(), self.treble.get())
    }

    pub fn base(&self) -> &BaseConvolver {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BaseConvolver {
        &mut self.base
    }

    fn shaping(tone: &ToneSettings) -> ImpulseShaping {
        ImpulseShaping::Cabinet {
            bass: tone.bass,
            treble: tone.treble,
        }
    }
}

impl AudioPlugin for CabinetConvolver {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Cabinet"
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
        let mut scheduled = self.base.sync_block_size();

        let index = self.selected_cabinet();
        let tone = self.tone();
        let cabinet_changed = self.tracker.cabinet_changed(index);
        let tone_changed = self.tracker.sum_changed(&tone);
        if !cabinet_changed && !tone_changed {
            return scheduled;
        }

        let reshape = tone
            .without_level()
            .differs_from(&self.applied.without_level());
        if tone_changed {
            self.base.set_gain_db(tone.level);
            self.tracker.update_sum(&tone);
            self.applied = tone;
        }
        if !cabinet_changed && !reshape {
            return scheduled;
        }

        let entry = &self.cabinets[index];
        debug!(cabinet = %entry.name, bass = tone.bass, treble = tone.treble, "cabinet reconfigured");
        self.base.configure(entry.source.clone(), Self::shaping(&tone));
        self.tracker.update_cabinet(index);

        if self.base.is_active() {
            scheduled |= if cabinet_changed {
                self.base.restart()
            } else {
                self.base.start(true)
            };
        }
        scheduled
    }

    fn connect_port(&self, name: &str) -> Option<ControlPort> {
        match name {
            "level" => Some(self.level.clone()),
            "bass" => Some(self.bass.clone()),
            "treble" => Some(self.treble.clone()),
            "cabinet" => Some(self.cabinet.clone()),
            _ => None,
        }
    }

    fn port_names(&self) -> Vec<&'static str> {
        vec!["level", "bass", "treble", "cabinet"]
    }

    fn state(&self) -> LifecycleState {
        self.base.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{BlockOutcome, BuildWorker};
    use std::time::{Duration, Instant};

    fn table() -> Vec<CabinetEntry> {
        vec![
            CabinetEntry::new(
                "closed",
                ImpulseResponseSource::from_samples(vec![1.0f32, 0.5, 0.25], 48000),
            ),
            CabinetEntry::new(
                "open",
                ImpulseResponseSource::from_samples(vec![0.8f32, -0.2], 48000),
            ),
        ]
    }

    fn running(config: &EngineConfig) -> (BuildWorker, CabinetConvolver) {
        let worker = BuildWorker::spawn(config).unwrap();
        let mut cab = CabinetConvolver::new(table(), &worker.handle(), config).unwrap();
        cab.init(48000).unwrap();
        cab.base_mut().change_buffer_size(64).unwrap();
        assert!(cab.activate(true));
        pump(&mut cab);
        (worker, cab)
    }

    fn pump(cab: &mut CabinetConvolver) {
        let input = vec![0.0; 64];
        let mut output = vec![0.0; 64];
        let deadline = Instant::now() + Duration::from_secs(10);
        while !cab.is_runnable() {
            assert!(Instant::now() < deadline, "cabinet did not become runnable");
            cab.process(&input, &mut output);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_empty_table_rejected() {
        let config = EngineConfig::default();
        let worker = BuildWorker::spawn(&config).unwrap();
        let err = CabinetConvolver::new(Vec::new(), &worker.handle(), &config).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_PARAMETER");
    }

    #[test]
    fn test_ports() {
        let config = EngineConfig::default();
        let worker = BuildWorker::spawn(&config).unwrap();
        let cab = CabinetConvolver::new(table(), &worker.handle(), &config).unwrap();
        assert_eq!(cab.port_names(), vec!["level", "bass", "treble", "cabinet"]);
        assert_eq!(cab.connect_port("cabinet").unwrap().range(), (0.0, 1.0));
        assert!(cab.connect_port("presence").is_none());

        cab.connect_port("cabinet").unwrap().set(0.7);
        assert_eq!(cab.selected_cabinet(), 1);
    }

    #[test]
    fn test_level_change_does_not_rebuild() {
        let config = EngineConfig::default();
        let (_worker, mut cab) = running(&config);

        cab.connect_port("level").unwrap().set(-6.0);
        assert!(!cab.update());
        assert_eq!(cab.state(), LifecycleState::Running);
        assert!((cab.base().gain().target() - 0.501).abs() < 1e-3);

        // Below the change threshold
        cab.connect_port("level").unwrap().set(-6.005);
        assert!(!cab.update());
    }

    #[test]
    fn test_tone_change_rebuilds() {
        let config = EngineConfig::default();
        let (_worker, mut cab) = running(&config);

        cab.connect_port("bass").unwrap().set(4.0);
        assert!(cab.update());
        assert!(cab.state().is_pending());
        assert_eq!(
            cab.base().controller().shaping(),
            ImpulseShaping::Cabinet {
                bass: 4.0,
                treble: 0.0
            }
        );
        pump(&mut cab);
        assert!(!cab.update());
    }

    #[test]
    fn test_cabinet_switch_rebuilds() {
        let config = EngineConfig::default();
        let (_worker, mut cab) = running(&config);

        cab.connect_port("cabinet").unwrap().set(1.0);
        assert!(cab.update());
        assert_eq!(
            cab.base().controller().source(),
            Some(&table()[1].source)
        );
        pump(&mut cab);

        let mut input = vec![0.0; 64];
        input[0] = 1.0;
        let mut output = vec![0.0; 64];
        let mut outcome = cab.base_mut().process(&input, &mut output);
        while outcome == BlockOutcome::Crossfading {
            outcome = cab.base_mut().process(&input, &mut output);
        }
        assert_eq!(outcome, BlockOutcome::Convolved);
    }
}
