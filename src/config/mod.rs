//! Configuration
//!
//! [`EngineConfig`] holds runtime engine settings; [`IrSettings`] is the
//! persisted impulse response selection consumed by the convolvers.

mod engine_config;
mod ir_settings;

pub use engine_config::{BypassMode, EngineConfig, ResamplerConfig};
pub use ir_settings::{GainPoint, IrSettings};
