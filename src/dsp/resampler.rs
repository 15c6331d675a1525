//! Streaming sample rate conversion
//!
//! Wraps a rubato sinc resampler behind a FIFO so callers can push blocks of
//! any length. Fractional phase and filter memory carry over between calls,
//! and the group delay is fixed for a given rate pair.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::config::ResamplerConfig;
use crate::error::{ConvolverError, Result};

fn check_rate(rate: u32, context: &str) -> Result<()> {
    if rate == 0 {
        return Err(ConvolverError::InvalidSampleRate {
            rate,
            context: context.to_string(),
        });
    }
    Ok(())
}

/// Incremental mono resampler between two fixed rates
pub struct StreamResampler {
    input_rate: u32,
    output_rate: u32,
    /// `None` when both rates are equal
    inner: Option<SincFixedIn<f32>>,
    chunk_size: usize,
    pending: Vec<f32>,
    pending_len: usize,
    out_buf: Vec<f32>,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("input_rate", &self.input_rate)
            .field("output_rate", &self.output_rate)
            .field("chunk_size", &self.chunk_size)
            .field("pending_len", &self.pending_len)
            .finish()
    }
}

impl StreamResampler {
    /// Create a resampler from `input_rate` to `output_rate`
    ///
    /// # Errors
    /// * `InvalidSampleRate` - if either rate is zero
    /// * `BuildFailed` - if the sinc filter cannot be constructed
    pub fn new(input_rate: u32, output_rate: u32, config: &ResamplerConfig) -> Result<Self> {
        check_rate(input_rate, "resampler input")?;
        check_rate(output_rate, "resampler output")?;

        let chunk_size = config.chunk_size.max(1);
        if input_rate == output_rate {
            return Ok(Self {
                input_rate,
                output_rate,
                inner: None,
                chunk_size,
                pending: Vec::new(),
                pending_len: 0,
                out_buf: Vec::new(),
            });
        }

        let parameters = SincInterpolationParameters {
            sinc_len: config.sinc_len,
            f_cutoff: config.f_cutoff,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: config.oversampling_factor,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = output_rate as f64 / input_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, parameters, chunk_size, 1).map_err(|e| {
            ConvolverError::build_failed(format!(
                "cannot create resampler {} -> {} Hz: {}",
                input_rate, output_rate, e
            ))
        })?;
        let out_buf = vec![0.0; inner.output_frames_max()];

        Ok(Self {
            input_rate,
            output_rate,
            inner: Some(inner),
            chunk_size,
            pending: vec![0.0; chunk_size],
            pending_len: 0,
            out_buf,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Output rate divided by input rate
    pub fn ratio(&self) -> f64 {
        self.output_rate as f64 / self.input_rate as f64
    }

    /// True when both rates are equal and samples are copied through
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Delay of the sinc filter in output samples, constant for a rate pair
    ///
    /// The converted stream is already trimmed by this amount: the first
    /// chunk comes out short and output sample `k` lines up with input time
    /// `k / ratio`. Callers do not compensate for it again.
    pub fn group_delay(&self) -> usize {
        self.inner.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Input frames consumed per internal conversion step
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Most output frames a single `convert` call can append per input chunk
    pub fn output_frames_per_chunk(&self) -> usize {
        self.out_buf.len().max(self.chunk_size)
    }

    /// Convert `input`, appending the produced samples to `output`
    ///
    /// Input is buffered internally until a full chunk is available, so the
    /// number of produced samples varies between calls. Does not allocate
    /// as long as `output` has spare capacity.
    pub fn convert(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            output.extend_from_slice(input);
            return Ok(input.len());
        };

        let mut produced = 0;
        let mut rest = input;
        while !rest.is_empty() {
            let take = (self.chunk_size - self.pending_len).min(rest.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&rest[..take]);
            self.pending_len += take;
            rest = &rest[take..];

            if self.pending_len == self.chunk_size {
                let wave_in: [&[f32]; 1] = [&self.pending[..]];
                let mut wave_out: [&mut [f32]; 1] = [&mut self.out_buf[..]];
                let (_, written) = inner
                    .process_into_buffer(&wave_in[..], &mut wave_out[..], None)
                    .map_err(|e| ConvolverError::build_failed(format!("resampling failed: {}", e)))?;
                output.extend_from_slice(&self.out_buf[..written]);
                produced += written;
                self.pending_len = 0;
            }
        }
        Ok(produced)
    }

    /// Drop buffered input and filter memory
    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
        self.pending_len = 0;
        self.pending.fill(0.0);
    }
}

/// Resample a complete impulse response
///
/// The result has `ceil(len * output_rate / input_rate)` samples and is
/// time-aligned with the input. Amplitude is preserved sample-wise; callers
/// converting a filter kernel scale by `input_rate / output_rate`.
pub fn resample_impulse(
    samples: &[f32],
    input_rate: u32,
    output_rate: u32,
    config: &ResamplerConfig,
) -> Result<Vec<f32>> {
    let mut resampler = StreamResampler::new(input_rate, output_rate, config)?;
    if resampler.is_passthrough() {
        return Ok(samples.to_vec());
    }

    let expected = (samples.len() as f64 * resampler.ratio()).ceil() as usize;
    let mut output = Vec::with_capacity(expected + 2 * resampler.output_frames_per_chunk());
    resampler.convert(samples, &mut output)?;

    // Flush the tail still held by the filter and the partial chunk
    let silence = vec![0.0; resampler.chunk_size()];
    while output.len() < expected {
        resampler.convert(&silence, &mut output)?;
    }

    output.truncate(expected);
    Ok(output)
}
