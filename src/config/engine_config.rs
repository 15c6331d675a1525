//! Runtime configuration of the convolution engine
//!
//! Loaded once by the composition root and handed to every convolver at
//! construction. All fields have defaults so a partial JSON file is valid.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsp::partitioned::MAX_BLOCK_SIZE;
use crate::error::{ConvolverError, Result};

/// What the audio thread emits while no convolution state is usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BypassMode {
    /// Copy input to output
    #[default]
    PassThrough,
    /// Output zeros
    Silence,
}

impl BypassMode {
    /// Fill `output` with the bypass signal for `input`
    #[inline]
    pub fn apply(self, input: &[f32], output: &mut [f32]) {
        match self {
            BypassMode::PassThrough => {
                let n = input.len().min(output.len());
                output[..n].copy_from_slice(&input[..n]);
                output[n..].fill(0.0);
            }
            BypassMode::Silence => output.fill(0.0),
        }
    }
}

/// Sinc resampler parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplerConfig {
    /// Sinc filter length in taps
    pub sinc_len: usize,
    /// Oversampling factor of the interpolation table
    pub oversampling_factor: usize,
    /// Cutoff relative to the lower Nyquist frequency
    pub f_cutoff: f32,
    /// Input frames per internal conversion step
    pub chunk_size: usize,
}

impl Default for ResamplerConfig {
    fn default() -> Self {
        Self {
            sinc_len: 128,
            oversampling_factor: 256,
            f_cutoff: 0.95,
            chunk_size: 1024,
        }
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output while no state is usable
    pub bypass: BypassMode,
    /// Length of the linear crossfade between an outgoing and an incoming
    /// state, in samples (0 switches hard)
    pub crossfade_samples: usize,
    /// Largest block the audio thread may be called with
    pub max_block_size: usize,
    /// Capacity of the queue carrying superseded states back to the worker
    pub retire_queue_depth: usize,
    /// Resampler used to bring impulse responses to the processing rate
    pub resampler: ResamplerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bypass: BypassMode::PassThrough,
            crossfade_samples: 1024,
            max_block_size: 8192,
            retire_queue_depth: 16,
            resampler: ResamplerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Read a configuration from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check all fields are within usable ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_block_size == 0 || self.max_block_size > MAX_BLOCK_SIZE {
            return Err(ConvolverError::InvalidParameter {
                param: "max_block_size".to_string(),
                value: self.max_block_size.to_string(),
                expected: format!("1-{}", MAX_BLOCK_SIZE),
            });
        }
        if self.retire_queue_depth == 0 {
            return Err(ConvolverError::InvalidParameter {
                param: "retire_queue_depth".to_string(),
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }
        if self.resampler.sinc_len < 2 || self.resampler.oversampling_factor == 0 {
            return Err(ConvolverError::InvalidParameter {
                param: "resampler".to_string(),
                value: format!(
                    "sinc_len={}, oversampling_factor={}",
                    self.resampler.sinc_len, self.resampler.oversampling_factor
                ),
                expected: "sinc_len >= 2 and oversampling_factor >= 1".to_string(),
            });
        }
        if !(self.resampler.f_cutoff > 0.0 && self.resampler.f_cutoff <= 1.0) {
            return Err(ConvolverError::InvalidParameter {
                param: "resampler.f_cutoff".to_string(),
                value: self.resampler.f_cutoff.to_string(),
                expected: "0.0 < f_cutoff <= 1.0".to_string(),
            });
        }
        if self.resampler.chunk_size == 0 {
            return Err(ConvolverError::InvalidParameter {
                param: "resampler.chunk_size".to_string(),
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "bypass": "silence", "crossfade_samples": 256 }"#).unwrap();
        assert_eq!(config.bypass, BypassMode::Silence);
        assert_eq!(config.crossfade_samples, 256);
        assert_eq!(config.max_block_size, 8192);
        assert_eq!(config.resampler, ResamplerConfig::default());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let config = EngineConfig {
            crossfade_samples: 0,
            ..Default::default()
        };
        config.to_json_file(&path).unwrap();
        assert_eq!(EngineConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EngineConfig {
            max_block_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.resampler.f_cutoff = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bypass_modes() {
        let input = [0.5, -0.25, 1.0];
        let mut output = [9.0; 3];
        BypassMode::PassThrough.apply(&input, &mut output);
        assert_eq!(output, input);
        BypassMode::Silence.apply(&input, &mut output);
        assert_eq!(output, [0.0; 3]);
    }
}
