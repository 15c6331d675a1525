//! Convolver plugins
//!
//! Host-facing side of the engine. Every convolver implements
//! [`AudioPlugin`], so a host drives cabinets, presence filters and generic
//! IR convolvers the same way:
//!
//! - `init(sample_rate)` once the host rate is known
//! - `activate(true/false)` to start or stop processing
//! - `process(input, output)` from the audio thread
//! - `update()` from the control thread, to act on port changes
//!
//! Parameters are exposed as [`ControlPort`]s the host writes to.

mod base;
mod cabinet;
mod contrast;
mod impulse;
mod registry;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub use base::BaseConvolver;
pub use cabinet::{CabinetConvolver, CabinetEntry};
pub use contrast::ContrastConvolver;
pub use impulse::ImpulseConvolver;
pub use registry::PluginRegistry;

use crate::engine::LifecycleState;
use crate::error::Result;

/// Uniform interface of all convolvers
pub trait AudioPlugin: Send {
    /// Stable identifier, unique within a registry
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Set the processing sample rate
    fn init(&mut self, sample_rate: u32) -> Result<()>;

    /// Start (`true`) or stop (`false`) processing
    ///
    /// Returns whether a build is scheduled or running afterwards.
    fn activate(&mut self, start: bool) -> bool;

    /// Process one block on the audio thread
    fn process(&mut self, input: &[f32], output: &mut [f32]);

    /// Act on port and block size changes; called from the control thread
    ///
    /// Returns true when a rebuild was scheduled.
    fn update(&mut self) -> bool;

    /// Port with the given name
    fn connect_port(&self, name: &str) -> Option<ControlPort>;

    /// Names of all ports
    fn port_names(&self) -> Vec<&'static str>;

    fn state(&self) -> LifecycleState;

    fn is_runnable(&self) -> bool {
        self.state().is_runnable()
    }
}

/// A float parameter shared between host and plugin
#[derive(Debug, Clone)]
pub struct ControlPort {
    name: &'static str,
    min: f32,
    max: f32,
    default: f32,
    value: Arc<AtomicU32>,
}

impl ControlPort {
    pub fn new(name: &'static str, min: f32, max: f32, default: f32) -> Self {
        let default = default.clamp(min, max);
        Self {
            name,
            min,
            max,
            default,
            value: Arc::new(AtomicU32::new(default.to_bits())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Relaxed))
    }

    /// Store `value`, clamped to the port range; NaN is ignored
    pub fn set(&self, value: f32) {
        if value.is_nan() {
            return;
        }
        let value = value.clamp(self.min, self.max);
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.set(self.default);
    }
}
