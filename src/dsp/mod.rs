//! DSP building blocks
//!
//! Everything the build worker needs to turn an impulse response into a
//! ready-to-run convolution state, plus the few pieces the audio thread
//! runs per block.

pub mod biquad;
pub mod fft;
pub mod partitioned;
pub mod resampler;
pub mod tone;

pub use biquad::{BiquadCoeffs, BiquadState, FilterType};
pub use partitioned::{validate_block_size, ConvolutionState, PartitionedKernel, MAX_BLOCK_SIZE};
pub use resampler::{resample_impulse, StreamResampler};
pub use tone::{db_to_gain, GainSmoother, ImpulseShaping, ToneSettings, ToneTracker};
