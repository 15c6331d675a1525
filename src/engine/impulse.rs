//! Impulse response sources and preparation
//!
//! Turns an [`ImpulseResponseSource`] into samples at the processing rate:
//! load, window, gainline, gain, gain correction, delay, resample. Runs on
//! the build worker only.
//!
//! [`IrStore`] keeps the last prepared impulse so tone-only rebuilds skip
//! the file read and the resampler.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::{GainPoint, ResamplerConfig};
use crate::dsp::resampler::resample_impulse;
use crate::dsp::tone::db_to_gain;
use crate::engine::io::{read_mono, MonoAudio};
use crate::error::{ConvolverError, Result};

/// Where the impulse samples come from
#[derive(Debug, Clone, PartialEq)]
pub enum IrOrigin {
    /// WAV file, first channel
    File(PathBuf),
    /// Samples already in memory
    Memory { samples: Arc<[f32]>, sample_rate: u32 },
}

/// Immutable description of an impulse response and its selected window
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponseSource {
    pub origin: IrOrigin,
    /// First sample of the window
    pub offset: usize,
    /// Window length, 0 for "to the end"
    pub length: usize,
    /// Static linear gain
    pub gain: f32,
    /// Zeros prepended after windowing, at the native rate
    pub delay: usize,
    /// Normalise the window to unit energy before the static gain
    pub gain_correction: bool,
    pub gainline: Vec<GainPoint>,
}

impl ImpulseResponseSource {
    fn with_origin(origin: IrOrigin) -> Self {
        Self {
            origin,
            offset: 0,
            length: 0,
            gain: 1.0,
            delay: 0,
            gain_correction: false,
            gainline: Vec::new(),
        }
    }

    /// Whole file, unity gain
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::with_origin(IrOrigin::File(path.into()))
    }

    /// In-memory samples, unity gain
    pub fn from_samples(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self::with_origin(IrOrigin::Memory {
            samples: samples.into(),
            sample_rate,
        })
    }

    /// Single unit sample, a neutral kernel
    pub fn unit_impulse(sample_rate: u32) -> Self {
        Self::from_samples(vec![1.0f32], sample_rate)
    }

    pub fn with_window(mut self, offset: usize, length: usize) -> Self {
        self.offset = offset;
        self.length = length;
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_delay(mut self, delay: usize) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_gain_correction(mut self, enabled: bool) -> Self {
        self.gain_correction = enabled;
        self
    }

    pub fn with_gainline(mut self, gainline: Vec<GainPoint>) -> Self {
        self.gainline = gainline;
        self
    }

    /// File path, if the source is file-backed
    pub fn path(&self) -> Option<&Path> {
        match &self.origin {
            IrOrigin::File(path) => Some(path),
            IrOrigin::Memory { .. } => None,
        }
    }
}

impl fmt::Display for ImpulseResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            IrOrigin::File(path) => write!(f, "{}", path.display())?,
            IrOrigin::Memory {
                samples,
                sample_rate,
            } => write!(f, "<{} samples @ {} Hz>", samples.len(), sample_rate)?,
        }
        if self.offset > 0 || self.length > 0 {
            write!(f, " [offset {}, length {}]", self.offset, self.length)?;
        }
        Ok(())
    }
}

/// Reads impulse files; swapped out in tests
pub trait IrLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<MonoAudio>;
}

/// Loads WAV files from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct WavLoader;

impl IrLoader for WavLoader {
    fn load(&self, path: &Path) -> Result<MonoAudio> {
        read_mono(path)
    }
}

/// Impulse samples ready for shaping and partitioning
#[derive(Debug, Clone)]
pub struct PreparedImpulse {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    /// Rate the samples were read at
    pub native_rate: u32,
}

// ============================================================================
// Pipeline stages
// ============================================================================

/// Gain of the gainline at `index`, in dB
///
/// Linear between points, held flat before the first and after the last.
pub fn gainline_db_at(points: &[GainPoint], index: usize) -> f32 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return 0.0,
    };
    if index <= first.index {
        return first.gain_db;
    }
    if index >= last.index {
        return last.gain_db;
    }
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if index >= a.index && index <= b.index {
            if b.index == a.index {
                return b.gain_db;
            }
            let t = (index - a.index) as f32 / (b.index - a.index) as f32;
            return a.gain_db + t * (b.gain_db - a.gain_db);
        }
    }
    last.gain_db
}

/// Multiply `samples` by the gainline envelope
pub fn apply_gainline(samples: &mut [f32], gainline: &[GainPoint]) {
    if gainline.is_empty() {
        return;
    }
    let mut points = gainline.to_vec();
    points.sort_by_key(|p| p.index);
    for (i, sample) in samples.iter_mut().enumerate() {
        *sample *= db_to_gain(gainline_db_at(&points, i));
    }
}

/// Scale `samples` to unit energy; silent input is left alone
pub fn normalize_energy(samples: &mut [f32]) {
    let energy: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    if energy > 0.0 {
        let scale = (1.0 / energy.sqrt()) as f32;
        samples.iter_mut().for_each(|s| *s *= scale);
    }
}

/// Cut `[offset, offset + length)` out of `samples`
fn select_window(samples: &[f32], offset: usize, length: usize) -> Result<Vec<f32>> {
    if offset >= samples.len() {
        return Err(ConvolverError::build_failed(format!(
            "offset {} is beyond the impulse response ({} samples)",
            offset,
            samples.len()
        )));
    }
    let end = if length == 0 {
        samples.len()
    } else {
        offset.saturating_add(length).min(samples.len())
    };
    Ok(samples[offset..end].to_vec())
}

/// Window, envelope and gain at the native rate
fn shape_window(source: &ImpulseResponseSource, samples: &[f32]) -> Result<Vec<f32>> {
    let mut window = select_window(samples, source.offset, source.length)?;
    apply_gainline(&mut window, &source.gainline);
    if source.gain_correction {
        normalize_energy(&mut window);
    }
    if source.gain != 1.0 {
        window.iter_mut().for_each(|s| *s *= source.gain);
    }
    if source.delay > 0 {
        let mut delayed = vec![0.0; source.delay + window.len()];
        delayed[source.delay..].copy_from_slice(&window);
        window = delayed;
    }
    Ok(window)
}

/// Run the preparation pipeline up to, not including, tone shaping
pub fn prepare_impulse(
    source: &ImpulseResponseSource,
    sample_rate: u32,
    resampler: &ResamplerConfig,
    loader: &dyn IrLoader,
) -> Result<PreparedImpulse> {
    if sample_rate == 0 {
        return Err(ConvolverError::InvalidSampleRate {
            rate: 0,
            context: "processing rate".to_string(),
        });
    }

    let (window, native_rate) = match &source.origin {
        IrOrigin::File(path) => {
            let audio = loader.load(path)?;
            (shape_window(source, &audio.samples)?, audio.info.sample_rate)
        }
        IrOrigin::Memory {
            samples,
            sample_rate: rate,
        } => {
            if *rate == 0 {
                return Err(ConvolverError::InvalidSampleRate {
                    rate: 0,
                    context: "in-memory impulse response".to_string(),
                });
            }
            (shape_window(source, samples)?, *rate)
        }
    };

    let samples = if native_rate == sample_rate {
        window
    } else {
        // A kernel keeps its gain only if each tap shrinks with the rate ratio
        let mut resampled = resample_impulse(&window, native_rate, sample_rate, resampler)?;
        let scale = native_rate as f32 / sample_rate as f32;
        resampled.iter_mut().for_each(|s| *s *= scale);
        resampled
    };

    debug!(
        source = %source,
        native_rate,
        sample_rate,
        len = samples.len(),
        "prepared impulse response"
    );

    Ok(PreparedImpulse {
        samples: samples.into(),
        sample_rate,
        native_rate,
    })
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct CacheKey {
    source: ImpulseResponseSource,
    sample_rate: u32,
    resampler: ResamplerConfig,
}

/// Last prepared impulse of one convolver
pub struct IrStore {
    loader: Arc<dyn IrLoader>,
    cached: Mutex<Option<(CacheKey, PreparedImpulse)>>,
}

impl fmt::Debug for IrStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrStore")
            .field("cached", &self.cached.lock().is_some())
            .finish()
    }
}

impl Default for IrStore {
    fn default() -> Self {
        Self::new(Arc::new(WavLoader))
    }
}

impl IrStore {
    pub fn new(loader: Arc<dyn IrLoader>) -> Self {
        Self {
            loader,
            cached: Mutex::new(None),
        }
    }

    /// Prepared samples for `source`, from cache when nothing changed
    pub fn prepare(
        &self,
        source: &ImpulseResponseSource,
        sample_rate: u32,
        resampler: &ResamplerConfig,
    ) -> Result<PreparedImpulse> {
        let key = CacheKey {
            source: source.clone(),
            sample_rate,
            resampler: resampler.clone(),
        };
        if let Some((cached_key, prepared)) = self.cached.lock().as_ref() {
            if *cached_key == key {
                debug!(source = %source, "impulse response cache hit");
                return Ok(prepared.clone());
            }
        }

        let prepared = prepare_impulse(source, sample_rate, resampler, self.loader.as_ref())?;
        *self.cached.lock() = Some((key, prepared.clone()));
        Ok(prepared)
    }

    /// Drop the cached impulse so the next build re-reads the source
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    pub fn is_cached(&self, source: &ImpulseResponseSource, sample_rate: u32) -> bool {
        self.cached
            .lock()
            .as_ref()
            .map(|(key, _)| key.source == *source && key.sample_rate == sample_rate)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        loads: AtomicUsize,
        samples: Vec<f32>,
        rate: u32,
    }

    impl IrLoader for CountingLoader {
        fn load(&self, _path: &Path) -> Result<MonoAudio> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(MonoAudio {
                samples: self.samples.clone(),
                info: crate::engine::io::WavInfo {
                    sample_rate: self.rate,
                    channels: 1,
                    bits_per_sample: 32,
                    float: true,
                    frames: self.samples.len(),
                },
            })
        }
    }

    fn prepare_memory(source: &ImpulseResponseSource) -> Result<PreparedImpulse> {
        prepare_impulse(source, 48000, &ResamplerConfig::default(), &WavLoader)
    }

    #[test]
    fn test_window_offset_and_length() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let source = ImpulseResponseSource::from_samples(samples, 48000).with_window(2, 3);
        let prepared = prepare_memory(&source).unwrap();
        assert_eq!(&*prepared.samples, &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_zero_length_means_to_the_end() {
        let source =
            ImpulseResponseSource::from_samples(vec![1.0f32, 2.0, 3.0], 48000).with_window(1, 0);
        assert_eq!(&*prepare_memory(&source).unwrap().samples, &[2.0, 3.0]);
    }

    #[test]
    fn test_offset_past_end_fails() {
        let source = ImpulseResponseSource::from_samples(vec![1.0f32, 2.0], 48000).with_window(2, 0);
        assert!(matches!(
            prepare_memory(&source),
            Err(ConvolverError::BuildFailed { .. })
        ));
    }

    #[test]
    fn test_delay_and_gain() {
        let source = ImpulseResponseSource::from_samples(vec![1.0f32, 0.5], 48000)
            .with_gain(2.0)
            .with_delay(3);
        assert_eq!(
            &*prepare_memory(&source).unwrap().samples,
            &[0.0, 0.0, 0.0, 2.0, 1.0]
        );
    }

    #[test]
    fn test_gain_correction_normalises_energy() {
        let source = ImpulseResponseSource::from_samples(vec![3.0f32, 4.0], 48000)
            .with_gain_correction(true)
            .with_gain(0.5);
        let prepared = prepare_memory(&source).unwrap();
        assert_abs_diff_eq!(prepared.samples[0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(prepared.samples[1], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_gainline_interpolation() {
        let points = [GainPoint::new(10, 0.0), GainPoint::new(20, -20.0)];
        assert_eq!(gainline_db_at(&points, 0), 0.0);
        assert_abs_diff_eq!(gainline_db_at(&points, 15), -10.0, epsilon = 1e-6);
        assert_eq!(gainline_db_at(&points, 100), -20.0);
        assert_eq!(gainline_db_at(&[], 5), 0.0);
    }

    #[test]
    fn test_apply_gainline_sorts_points() {
        let mut samples = vec![1.0; 3];
        apply_gainline(
            &mut samples,
            &[GainPoint::new(2, -20.0), GainPoint::new(0, 0.0)],
        );
        assert_abs_diff_eq!(samples[0], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(samples[1], db_to_gain(-10.0), epsilon = 1e-6);
        assert_abs_diff_eq!(samples[2], 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_processing_rate_fails() {
        let source = ImpulseResponseSource::unit_impulse(48000);
        assert!(matches!(
            prepare_impulse(&source, 0, &ResamplerConfig::default(), &WavLoader),
            Err(ConvolverError::InvalidSampleRate { .. })
        ));
    }

    #[test]
    fn test_resampling_keeps_kernel_gain() {
        // A kernel summing to 1 should still sum to about 1 after resampling
        let mut kernel = vec![0.0; 2000];
        for (i, s) in kernel.iter_mut().enumerate().take(400) {
            *s = (-(i as f32) / 60.0).exp();
        }
        let total: f32 = kernel.iter().sum();
        kernel.iter_mut().for_each(|s| *s /= total);

        let source = ImpulseResponseSource::from_samples(kernel, 44100);
        let prepared = prepare_memory(&source).unwrap();
        assert_eq!(prepared.native_rate, 44100);
        assert_eq!(prepared.sample_rate, 48000);
        let resampled_total: f32 = prepared.samples.iter().sum();
        assert_abs_diff_eq!(resampled_total, 1.0, epsilon = 0.02);
    }

    #[test]
    fn test_store_caches_file_reads() {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
            samples: vec![1.0, 0.5, 0.25],
            rate: 48000,
        });
        let store = IrStore::new(loader.clone());
        let source = ImpulseResponseSource::from_file("/irs/cab.wav");
        let config = ResamplerConfig::default();

        store.prepare(&source, 48000, &config).unwrap();
        store.prepare(&source, 48000, &config).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(store.is_cached(&source, 48000));

        let moved = source.clone().with_window(1, 0);
        store.prepare(&moved, 48000, &config).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);

        store.invalidate();
        store.prepare(&moved, 48000, &config).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_display() {
        let source = ImpulseResponseSource::from_file("/irs/cab.wav").with_window(5, 10);
        assert_eq!(source.to_string(), "/irs/cab.wav [offset 5, length 10]");
    }
}
