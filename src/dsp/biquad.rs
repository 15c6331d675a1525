//! Biquad shelving and peaking filters
//!
//! Used offline to shape impulse responses before partitioning, so tone
//! controls cost nothing on the audio thread.

use std::f64::consts::PI;

/// Filter shapes used by the tone controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Bell curve boost/cut
    Peak,
    /// Boost/cut below frequency
    LowShelf,
    /// Boost/cut above frequency
    HighShelf,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (1 + a1*z^-1 + a2*z^-2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoeffs {
    /// Unity gain, no filtering
    pub fn identity() -> Self {
        BiquadCoeffs {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Calculate coefficients using Audio EQ Cookbook formulas
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    pub fn calculate(
        filter_type: FilterType,
        sample_rate: f64,
        frequency: f64,
        gain_db: f64,
        q: f64,
    ) -> Self {
        // Clamp frequency below Nyquist
        let freq = frequency.clamp(10.0, sample_rate / 2.0 - 1.0);
        let q = q.clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);
        let a = 10.0_f64.powf(gain_db / 40.0);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterType::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
            FilterType::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                    (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
                )
            }
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Check if coefficients represent a bypass (unity gain, no filtering)
    pub fn is_bypass(&self) -> bool {
        (self.b0 - 1.0).abs() < 1e-10
            && self.b1.abs() < 1e-10
            && self.b2.abs() < 1e-10
            && self.a1.abs() < 1e-10
            && self.a2.abs() < 1e-10
    }

    /// Magnitude response at `frequency` Hz
    pub fn magnitude_at(&self, frequency: f64, sample_rate: f64) -> f64 {
        let w = 2.0 * PI * frequency / sample_rate;
        let (c1, s1) = (w.cos(), w.sin());
        let (c2, s2) = ((2.0 * w).cos(), (2.0 * w).sin());
        let num_re = self.b0 + self.b1 * c1 + self.b2 * c2;
        let num_im = -(self.b1 * s1 + self.b2 * s2);
        let den_re = 1.0 + self.a1 * c1 + self.a2 * c2;
        let den_im = -(self.a1 * s1 + self.a2 * s2);
        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

/// Direct Form I filter state
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    /// Process a single sample
    #[inline]
    pub fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Run `samples` through a fresh filter in place
pub fn filter_in_place(samples: &mut [f32], coeffs: &BiquadCoeffs) {
    if coeffs.is_bypass() {
        return;
    }
    let mut state = BiquadState::default();
    for sample in samples.iter_mut() {
        *sample = state.process(*sample as f64, coeffs) as f32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_gain_shelf_has_unit_response() {
        for (kind, freq) in [(FilterType::LowShelf, 250.0), (FilterType::HighShelf, 2400.0)] {
            let coeffs = BiquadCoeffs::calculate(kind, 48000.0, freq, 0.0, 0.707);
            for freq_hz in [20.0, 250.0, 1000.0, 2400.0, 12000.0, 20000.0] {
                assert_relative_eq!(coeffs.magnitude_at(freq_hz, 48000.0), 1.0, epsilon = 1e-9);
            }
        }
        assert!(BiquadCoeffs::identity().is_bypass());
    }

    #[test]
    fn test_low_shelf_boosts_lows_only() {
        let coeffs = BiquadCoeffs::calculate(FilterType::LowShelf, 48000.0, 250.0, 6.0, 0.707);
        let low = 20.0 * coeffs.magnitude_at(20.0, 48000.0).log10();
        let high = 20.0 * coeffs.magnitude_at(10000.0, 48000.0).log10();
        assert_relative_eq!(low, 6.0, epsilon = 0.2);
        assert!(high.abs() < 0.2);
    }

    #[test]
    fn test_high_shelf_cuts_highs_only() {
        let coeffs = BiquadCoeffs::calculate(FilterType::HighShelf, 48000.0, 2400.0, -6.0, 0.707);
        let low = 20.0 * coeffs.magnitude_at(50.0, 48000.0).log10();
        let high = 20.0 * coeffs.magnitude_at(18000.0, 48000.0).log10();
        assert!(low.abs() < 0.2);
        assert_relative_eq!(high, -6.0, epsilon = 0.3);
    }

    #[test]
    fn test_filter_in_place_with_bypass_leaves_samples() {
        let mut samples = vec![1.0, 0.5, -0.25];
        filter_in_place(&mut samples, &BiquadCoeffs::identity());
        assert_eq!(samples, vec![1.0, 0.5, -0.25]);
    }
}
