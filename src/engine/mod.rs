//! Convolution engine
//!
//! - Impulse response I/O and preparation
//! - Lifecycle state machine
//! - Reconfiguration controller (control thread)
//! - Build worker (background thread)
//! - Live convolution (audio thread)

pub mod controller;
pub mod impulse;
pub mod io;
pub mod lifecycle;
pub mod live;
pub mod worker;

pub use controller::{BuildEvent, BuildFailure, BuildRequest, ReconfigController};
pub use impulse::{
    ImpulseResponseSource, IrLoader, IrOrigin, IrStore, PreparedImpulse, WavLoader,
};
pub use io::{
    generate_impulse, generate_test_tone, read_mono, read_wav_info, write_mono, ExportFormat,
    MonoAudio, WavInfo,
};
pub use lifecycle::{AtomicLifecycle, LifecycleState};
pub use live::{BlockOutcome, LiveConvolution};
pub use worker::{BuildWorker, WorkerHandle, WorkerStats};
