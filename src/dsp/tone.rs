//! Tonal compensation
//!
//! Tone controls are applied in two places. Shelving EQ is baked into the
//! impulse response on the build worker, and level is a smoothed gain after
//! convolution. [`ToneTracker`] decides which of the two a change needs.

use crate::dsp::biquad::{filter_in_place, BiquadCoeffs, FilterType};

/// Smallest fingerprint difference treated as a change
pub const CHANGE_THRESHOLD: f32 = 0.01;

/// Shelf frequencies and slope of the tone controls
pub const BASS_SHELF_HZ: f64 = 250.0;
pub const TREBLE_SHELF_HZ: f64 = 2400.0;
pub const PRESENCE_SHELF_HZ: f64 = 3000.0;
pub const SHELF_Q: f64 = 0.707;

/// Per-sample coefficient of the post-convolution gain smoother
pub const GAIN_SMOOTHING: f32 = 0.999;

/// Convert decibels to linear gain
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// User-facing tone controls, all in dB
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ToneSettings {
    pub level: f32,
    pub bass: f32,
    pub treble: f32,
}

impl ToneSettings {
    pub fn new(level: f32, bass: f32, treble: f32) -> Self {
        Self {
            level,
            bass,
            treble,
        }
    }

    /// `level + bass + treble`
    pub fn sum(&self) -> f32 {
        self.level + self.bass + self.treble
    }

    /// The same settings with level zeroed, for components where level is
    /// a post gain and never reshapes the impulse response
    pub fn without_level(&self) -> Self {
        Self {
            level: 0.0,
            ..*self
        }
    }

    /// True when any control moved by more than [`CHANGE_THRESHOLD`]
    ///
    /// Controls are compared one by one so a bass cut matched by an equal
    /// treble boost still counts.
    pub fn differs_from(&self, other: &ToneSettings) -> bool {
        (self.level - other.level).abs() > CHANGE_THRESHOLD
            || (self.bass - other.bass).abs() > CHANGE_THRESHOLD
            || (self.treble - other.treble).abs() > CHANGE_THRESHOLD
    }
}

/// Remembers what was last applied so rebuilds only happen on real changes
#[derive(Debug, Clone, Default)]
pub struct ToneTracker {
    applied: Option<ToneSettings>,
    cabinet: Option<usize>,
}

impl ToneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Has the tone fingerprint changed since the last [`update_sum`](Self::update_sum)
    pub fn sum_changed(&self, current: &ToneSettings) -> bool {
        match &self.applied {
            Some(applied) => current.differs_from(applied),
            None => true,
        }
    }

    /// Commit `current` as the applied fingerprint
    pub fn update_sum(&mut self, current: &ToneSettings) {
        self.applied = Some(*current);
    }

    /// Has the cabinet selection changed since the last [`update_cabinet`](Self::update_cabinet)
    pub fn cabinet_changed(&self, cabinet: usize) -> bool {
        self.cabinet != Some(cabinet)
    }

    pub fn update_cabinet(&mut self, cabinet: usize) {
        self.cabinet = Some(cabinet);
    }

    /// Forget everything, so the next check reports a change
    pub fn invalidate(&mut self) {
        self.applied = None;
        self.cabinet = None;
    }
}

/// EQ baked into an impulse response before partitioning
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ImpulseShaping {
    #[default]
    Flat,
    /// Bass and treble shelves, with the IR scaled by `-(bass + treble) / 2` dB
    Cabinet { bass: f32, treble: f32 },
    /// Presence high shelf
    Presence { level: f32 },
}

impl ImpulseShaping {
    /// Filter `samples` in place at `sample_rate`
    pub fn apply(&self, samples: &mut [f32], sample_rate: u32) {
        let rate = sample_rate as f64;
        match *self {
            ImpulseShaping::Flat => {}
            ImpulseShaping::Cabinet { bass, treble } => {
                shelve(samples, FilterType::LowShelf, rate, BASS_SHELF_HZ, bass);
                shelve(samples, FilterType::HighShelf, rate, TREBLE_SHELF_HZ, treble);

                let compensation = db_to_gain(-(bass + treble) / 2.0);
                if (compensation - 1.0).abs() > f32::EPSILON {
                    samples.iter_mut().for_each(|s| *s *= compensation);
                }
            }
            ImpulseShaping::Presence { level } => {
                shelve(samples, FilterType::HighShelf, rate, PRESENCE_SHELF_HZ, level);
            }
        }
    }

    pub fn is_flat(&self) -> bool {
        match *self {
            ImpulseShaping::Flat => true,
            ImpulseShaping::Cabinet { bass, treble } => bass == 0.0 && treble == 0.0,
            ImpulseShaping::Presence { level } => level == 0.0,
        }
    }
}

/// Apply one shelf; a 0 dB shelf is skipped since its RBJ coefficients
/// only cancel up to rounding
fn shelve(samples: &mut [f32], kind: FilterType, rate: f64, freq: f64, gain_db: f32) {
    if gain_db == 0.0 {
        return;
    }
    let coeffs = BiquadCoeffs::calculate(kind, rate, freq, gain_db as f64, SHELF_Q);
    filter_in_place(samples, &coeffs);
}

/// One-pole smoothed gain applied after convolution
#[derive(Debug, Clone)]
pub struct GainSmoother {
    current: f32,
    target: f32,
    coeff: f32,
}

impl Default for GainSmoother {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl GainSmoother {
    /// Start settled at `gain`
    pub fn new(gain: f32) -> Self {
        Self {
            current: gain,
            target: gain,
            coeff: GAIN_SMOOTHING,
        }
    }

    pub fn set_target(&mut self, gain: f32) {
        self.target = gain;
    }

    pub fn set_target_db(&mut self, db: f32) {
        self.target = db_to_gain(db);
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    /// Jump straight to the target
    pub fn settle(&mut self) {
        self.current = self.target;
    }

    /// Multiply `samples` by the smoothed gain
    #[inline]
    pub fn process(&mut self, samples: &mut [f32]) {
        if self.current == self.target {
            if self.current != 1.0 {
                samples.iter_mut().for_each(|s| *s *= self.current);
            }
            return;
        }
        let step = 1.0 - self.coeff;
        for sample in samples.iter_mut() {
            self.current = self.coeff * self.current + step * self.target;
            *sample *= self.current;
        }
        if (self.current - self.target).abs() < 1e-6 {
            self.current = self.target;
        }
    }
}
