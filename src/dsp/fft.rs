//! Real FFT wrapper used by the partitioned convolution engine
//!
//! Plans are created once per block size; forward/inverse run with
//! preallocated scratch so the audio path never allocates.

use std::fmt;
use std::sync::Arc;

use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;

/// Forward/inverse real FFT pair of a fixed length
#[derive(Clone)]
pub struct Fft {
    len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,
}

impl fmt::Debug for Fft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fft").field("len", &self.len).finish()
    }
}

impl Fft {
    /// Plan a real FFT of `len` points
    pub fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(len);
        let inverse = planner.plan_fft_inverse(len);
        let forward_scratch = forward.make_scratch_vec();
        let inverse_scratch = inverse.make_scratch_vec();
        Self {
            len,
            forward,
            inverse,
            forward_scratch,
            inverse_scratch,
        }
    }

    /// Number of real points
    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of complex bins produced by the forward transform
    pub fn spectrum_len(&self) -> usize {
        complex_size(self.len)
    }

    /// Forward transform. `input` is used as scratch and left undefined.
    pub fn forward(
        &mut self,
        input: &mut [f32],
        output: &mut [Complex<f32>],
    ) -> Result<(), FftError> {
        self.forward
            .process_with_scratch(input, output, &mut self.forward_scratch)
    }

    /// Inverse transform, unnormalised. `input` is used as scratch.
    ///
    /// The imaginary parts of the DC and Nyquist bins are forced to zero
    /// first; they only carry rounding noise for spectra of real signals.
    pub fn inverse(
        &mut self,
        input: &mut [Complex<f32>],
        output: &mut [f32],
    ) -> Result<(), FftError> {
        if let Some(first) = input.first_mut() {
            first.im = 0.0;
        }
        if self.len % 2 == 0 {
            if let Some(last) = input.last_mut() {
                last.im = 0.0;
            }
        }
        self.inverse
            .process_with_scratch(input, output, &mut self.inverse_scratch)
    }
}

/// Number of complex bins of a real FFT of `size` points
pub fn complex_size(size: usize) -> usize {
    (size / 2) + 1
}

/// Copy `src` into the front of `dst` and zero the remainder
pub fn copy_and_pad(dst: &mut [f32], src: &[f32]) {
    debug_assert!(dst.len() >= src.len());
    let n = src.len();
    dst[..n].copy_from_slice(src);
    dst[n..].fill(0.0);
}

/// `result += a * b` element-wise
#[inline]
pub fn complex_multiply_accumulate(
    result: &mut [Complex<f32>],
    a: &[Complex<f32>],
    b: &[Complex<f32>],
) {
    debug_assert_eq!(result.len(), a.len());
    debug_assert_eq!(result.len(), b.len());
    for ((r, x), y) in result.iter_mut().zip(a).zip(b) {
        *r += x * y;
    }
}

/// Zero a spectrum
#[inline]
pub fn zero_spectrum(buffer: &mut [Complex<f32>]) {
    buffer.fill(Complex::zero());
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_forward_inverse_restores_signal() {
        let mut fft = Fft::new(16);
        let original: Vec<f32> = (0..16).map(|i| (i as f32 * 0.3).sin()).collect();
        let mut time = original.clone();
        let mut spectrum = vec![Complex::zero(); fft.spectrum_len()];
        fft.forward(&mut time, &mut spectrum).unwrap();

        let mut restored = vec![0.0; 16];
        fft.inverse(&mut spectrum, &mut restored).unwrap();

        for (a, b) in original.iter().zip(&restored) {
            assert_abs_diff_eq!(*a, b / 16.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_copy_and_pad() {
        let mut dst = [9.0; 6];
        copy_and_pad(&mut dst, &[1.0, 2.0]);
        assert_eq!(dst, [1.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_complex_size() {
        assert_eq!(complex_size(512), 257);
        assert_eq!(complex_size(6), 4);
    }
}
