//! Uniformly partitioned FFT convolution
//!
//! The impulse response is split into `ceil(len / block_size)` partitions of
//! `block_size` samples, each transformed once with a `2 * block_size` point
//! real FFT. Processing is overlap-add over a ring of input spectra: a block
//! costs one forward FFT, one inverse FFT and `partitions` complex
//! multiply-accumulates.
//!
//! The current (possibly partial) input block is transformed on every call,
//! so the output carries no added latency and `process` accepts calls of any
//! length.

use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

use crate::dsp::fft::{complex_multiply_accumulate, copy_and_pad, zero_spectrum, Fft};
use crate::error::{ConvolverError, Result};

/// Largest block size a kernel can be partitioned for
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Validate a block size against [`MAX_BLOCK_SIZE`]
pub fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size > MAX_BLOCK_SIZE {
        return Err(ConvolverError::InvalidBlockSize {
            size: block_size,
            max: MAX_BLOCK_SIZE,
        });
    }
    Ok(())
}

/// Immutable, transformed impulse response partitions
#[derive(Debug, Clone)]
pub struct PartitionedKernel {
    block_size: usize,
    sample_rate: u32,
    impulse_len: usize,
    /// Partition spectra, pre-scaled by the inverse FFT normalisation
    partitions: Vec<Vec<Complex<f32>>>,
}

impl PartitionedKernel {
    /// Partition and transform `samples` for the given block size
    pub fn build(samples: &[f32], sample_rate: u32, block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        Self::build_with(&mut Fft::new(2 * block_size), samples, sample_rate, block_size)
    }

    fn build_with(
        fft: &mut Fft,
        samples: &[f32],
        sample_rate: u32,
        block_size: usize,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(ConvolverError::InvalidSampleRate {
                rate: sample_rate,
                context: "convolution kernel".to_string(),
            });
        }
        validate_block_size(block_size)?;
        if samples.is_empty() {
            return Err(ConvolverError::build_failed("impulse response is empty"));
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(ConvolverError::build_failed(format!(
                "impulse response sample {} is not finite",
                index
            )));
        }

        let fft_len = 2 * block_size;
        let scale = 1.0 / fft_len as f32;
        let mut time = vec![0.0; fft_len];
        let mut partitions = Vec::with_capacity(samples.len().div_ceil(block_size));

        for chunk in samples.chunks(block_size) {
            copy_and_pad(&mut time, chunk);
            time[..chunk.len()].iter_mut().for_each(|s| *s *= scale);
            let mut spectrum = vec![Complex::zero(); fft.spectrum_len()];
            fft.forward(&mut time, &mut spectrum)
                .map_err(|e| ConvolverError::build_failed(format!("forward FFT failed: {}", e)))?;
            partitions.push(spectrum);
        }

        Ok(Self {
            block_size,
            sample_rate,
            impulse_len: samples.len(),
            partitions,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length of the impulse response in samples
    pub fn impulse_len(&self) -> usize {
        self.impulse_len
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

/// A ready-to-run convolution: an immutable kernel plus its input history
///
/// The kernel is never touched after construction; `process` only advances
/// the history buffers. Not reentrant: exactly one thread may call `process`.
#[derive(Debug, Clone)]
pub struct ConvolutionState {
    kernel: PartitionedKernel,
    fft: Fft,
    /// Ring of input block spectra, `segments[current]` is the newest
    segments: Vec<Vec<Complex<f32>>>,
    current: usize,
    fft_buffer: Vec<f32>,
    pre_multiplied: Vec<Complex<f32>>,
    conv: Vec<Complex<f32>>,
    overlap: Vec<f32>,
    input_buffer: Vec<f32>,
    input_fill: usize,
}

impl ConvolutionState {
    /// Build a state for `samples` at `sample_rate`, processing `block_size`
    /// sample blocks. History starts zeroed.
    pub fn build(samples: &[f32], sample_rate: u32, block_size: usize) -> Result<Self> {
        validate_block_size(block_size)?;
        let mut fft = Fft::new(2 * block_size);
        let kernel = PartitionedKernel::build_with(&mut fft, samples, sample_rate, block_size)?;
        Ok(Self::from_kernel_with(kernel, fft))
    }

    /// Wrap an already built kernel with fresh history
    pub fn from_kernel(kernel: PartitionedKernel) -> Self {
        let fft = Fft::new(2 * kernel.block_size);
        Self::from_kernel_with(kernel, fft)
    }

    fn from_kernel_with(kernel: PartitionedKernel, fft: Fft) -> Self {
        let block_size = kernel.block_size;
        let bins = fft.spectrum_len();
        let segment_count = kernel.partitions.len();
        Self {
            fft,
            segments: vec![vec![Complex::zero(); bins]; segment_count],
            current: 0,
            fft_buffer: vec![0.0; 2 * block_size],
            pre_multiplied: vec![Complex::zero(); bins],
            conv: vec![Complex::zero(); bins],
            overlap: vec![0.0; block_size],
            input_buffer: vec![0.0; block_size],
            input_fill: 0,
            kernel,
        }
    }

    pub fn kernel(&self) -> &PartitionedKernel {
        &self.kernel
    }

    pub fn block_size(&self) -> usize {
        self.kernel.block_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.kernel.sample_rate
    }

    pub fn partition_count(&self) -> usize {
        self.kernel.partitions.len()
    }

    /// Convolve `input` into `output`, continuing from the previous call
    ///
    /// Calls may have any length; samples are emitted without added latency.
    /// Does not allocate.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        let len = input.len().min(output.len());
        let block_size = self.kernel.block_size;
        let count = self.kernel.partitions.len();

        let mut processed = 0;
        while processed < len {
            let block_started = self.input_fill == 0;
            let pos = self.input_fill;
            let n = (len - processed).min(block_size - pos);

            self.input_buffer[pos..pos + n].copy_from_slice(&input[processed..processed + n]);

            // Spectrum of the current block so far
            copy_and_pad(&mut self.fft_buffer, &self.input_buffer);
            if self
                .fft
                .forward(&mut self.fft_buffer, &mut self.segments[self.current])
                .is_err()
            {
                output[processed..len].fill(0.0);
                return;
            }

            // Older blocks do not change while the current one fills up
            if block_started {
                zero_spectrum(&mut self.pre_multiplied);
                for i in 1..count {
                    let segment = (self.current + i) % count;
                    complex_multiply_accumulate(
                        &mut self.pre_multiplied,
                        &self.kernel.partitions[i],
                        &self.segments[segment],
                    );
                }
            }
            self.conv.copy_from_slice(&self.pre_multiplied);
            complex_multiply_accumulate(
                &mut self.conv,
                &self.segments[self.current],
                &self.kernel.partitions[0],
            );

            if self
                .fft
                .inverse(&mut self.conv, &mut self.fft_buffer)
                .is_err()
            {
                output[processed..len].fill(0.0);
                return;
            }

            for (i, out) in output[processed..processed + n].iter_mut().enumerate() {
                *out = self.fft_buffer[pos + i] + self.overlap[pos + i];
            }

            self.input_fill += n;
            if self.input_fill == block_size {
                self.input_buffer.fill(0.0);
                self.input_fill = 0;
                self.overlap
                    .copy_from_slice(&self.fft_buffer[block_size..2 * block_size]);
                self.current = if self.current > 0 {
                    self.current - 1
                } else {
                    count - 1
                };
            }

            processed += n;
        }
    }

    /// Clear the input history, keeping the kernel
    pub fn reset(&mut self) {
        for segment in &mut self.segments {
            zero_spectrum(segment);
        }
        zero_spectrum(&mut self.pre_multiplied);
        zero_spectrum(&mut self.conv);
        self.fft_buffer.fill(0.0);
        self.overlap.fill(0.0);
        self.input_buffer.fill(0.0);
        self.input_fill = 0;
        self.current = 0;
    }
}
