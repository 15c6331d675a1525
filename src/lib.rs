//! Ampconv - real-time partitioned convolution for amp simulation
//!
//! Convolves guitar signals with cabinet and room impulse responses at low
//! latency, and rebuilds convolutions in the background when the impulse
//! response, tone controls, sample rate or block size change.
//!
//! # Architecture
//!
//! Three threads cooperate:
//! - Control thread: [`engine::ReconfigController`] decides when to rebuild
//! - Build worker: [`engine::BuildWorker`] loads, resamples, shapes and
//!   partitions impulse responses
//! - Audio thread: [`engine::LiveConvolution`] picks up finished builds
//!   without blocking and crossfades between them
//!
//! Hosts drive the [`convolver`] plugins, which wire the three together.

pub mod cli;
pub mod config;
pub mod convolver;
pub mod dsp;
pub mod engine;
pub mod error;

pub use error::{ConvolverError, Result};
