//! WAV file I/O
//!
//! Impulse responses are read as 32-bit float, first channel only. Writing
//! and test-signal generation serve the CLI renderer and the tests.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::{ConvolverError, Result};

/// Header of a WAV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub float: bool,
    /// Frames per channel
    pub frames: usize,
}

impl WavInfo {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// First channel of a WAV file, as float
#[derive(Debug, Clone)]
pub struct MonoAudio {
    pub samples: Vec<f32>,
    pub info: WavInfo,
}

/// Export format configuration
#[derive(Debug, Clone, Copy)]
pub struct ExportFormat {
    pub sample_rate: u32,
    /// Bit depth: 16, 24, or 32 (float)
    pub bit_depth: u16,
}

impl Default for ExportFormat {
    fn default() -> Self {
        ExportFormat {
            sample_rate: 48000,
            bit_depth: 24,
        }
    }
}

impl ExportFormat {
    pub fn new(sample_rate: u32, bit_depth: u16) -> Self {
        ExportFormat {
            sample_rate,
            bit_depth,
        }
    }
}

fn unreadable(path: &Path, reason: String, source: Option<hound::Error>) -> ConvolverError {
    ConvolverError::FileUnreadable {
        path: path.display().to_string(),
        reason,
        source: source.map(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
    }
}

fn open(path: &Path) -> Result<WavReader<std::io::BufReader<std::fs::File>>> {
    if !path.exists() {
        return Err(unreadable(path, "file not found".to_string(), None));
    }
    WavReader::open(path)
        .map_err(|e| unreadable(path, format!("not a readable WAV file: {}", e), Some(e)))
}

fn info_of<R: std::io::Read>(reader: &WavReader<R>) -> WavInfo {
    let spec = reader.spec();
    WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        float: spec.sample_format == SampleFormat::Float,
        frames: reader.duration() as usize,
    }
}

/// Read only the header of a WAV file
pub fn read_wav_info(path: &Path) -> Result<WavInfo> {
    let reader = open(path)?;
    Ok(info_of(&reader))
}

/// Read the first channel of a WAV file
///
/// # Errors
/// * `FileUnreadable` - if the file is missing or not a valid WAV file
/// * `UnsupportedFormat` - for bit depths hound cannot convert
/// * `InvalidSampleRate` - if the header declares a zero rate
pub fn read_mono(path: &Path) -> Result<MonoAudio> {
    let reader = open(path)?;
    let info = info_of(&reader);
    if info.sample_rate == 0 {
        return Err(ConvolverError::InvalidSampleRate {
            rate: 0,
            context: path.display().to_string(),
        });
    }
    if info.channels == 0 {
        return Err(ConvolverError::UnsupportedFormat {
            format: "WAV file without channels".to_string(),
        });
    }

    let spec = reader.spec();
    let interleaved = read_samples_as_f32(path, reader, spec.bits_per_sample, spec.sample_format)?;
    let samples = interleaved
        .iter()
        .step_by(info.channels as usize)
        .copied()
        .collect();

    Ok(MonoAudio { samples, info })
}

/// Write mono samples to a WAV file
pub fn write_mono(path: &Path, samples: &[f32], format: ExportFormat) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: format.sample_rate,
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };
    let io_err = |e: hound::Error| ConvolverError::Io(std::io::Error::other(e.to_string()));

    let mut writer = WavWriter::create(path, spec).map_err(io_err)?;
    match format.bit_depth {
        16 => {
            for &sample in samples {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled).map_err(io_err)?;
            }
        }
        24 => {
            for &sample in samples {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled).map_err(io_err)?;
            }
        }
        32 => {
            for &sample in samples {
                writer.write_sample(sample).map_err(io_err)?;
            }
        }
        _ => {
            return Err(ConvolverError::UnsupportedFormat {
                format: format!("{}-bit audio (only 16, 24, 32 supported)", format.bit_depth),
            });
        }
    }
    writer.finalize().map_err(io_err)?;
    Ok(())
}

/// Sine wave of `frequency` Hz
pub fn generate_test_tone(frequency: f32, duration_secs: f32, sample_rate: u32) -> Vec<f32> {
    let num_samples = (duration_secs * sample_rate as f32) as usize;
    let angular_freq = 2.0 * std::f32::consts::PI * frequency / sample_rate as f32;
    (0..num_samples)
        .map(|i| (angular_freq * i as f32).sin())
        .collect()
}

/// Unit impulse followed by `len - 1` zeros
pub fn generate_impulse(len: usize) -> Vec<f32> {
    let mut samples = vec![0.0; len];
    if let Some(first) = samples.first_mut() {
        *first = 1.0;
    }
    samples
}

// ============================================================================
// Internal helper functions
// ============================================================================

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    path: &Path,
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let failed = |e: hound::Error| unreadable(path, format!("failed to read samples: {}", e), Some(e));
    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(failed),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                _ => {
                    return Err(ConvolverError::UnsupportedFormat {
                        format: format!("{}-bit integer audio", bits_per_sample),
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(failed)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generate_test_tone() {
        let tone = generate_test_tone(440.0, 1.0, 48000);
        assert_eq!(tone.len(), 48000);
        let zero_crossing = (48000.0 / 440.0 / 2.0) as usize;
        assert!(tone[zero_crossing].abs() < 0.1);
    }

    #[test]
    fn test_generate_impulse() {
        assert_eq!(generate_impulse(3), vec![1.0, 0.0, 0.0]);
        assert!(generate_impulse(0).is_empty());
    }

    #[test]
    fn test_round_trip_32bit_float() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ir.wav");
        let original = generate_test_tone(1000.0, 0.1, 44100);

        write_mono(&path, &original, ExportFormat::new(44100, 32)).unwrap();
        let read = read_mono(&path).unwrap();

        assert_eq!(read.info.sample_rate, 44100);
        assert_eq!(read.info.channels, 1);
        assert!(read.info.float);
        assert_eq!(read.samples, original);
    }

    #[test]
    fn test_round_trip_16bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ir16.wav");
        let original = generate_test_tone(1000.0, 0.05, 48000);

        write_mono(&path, &original, ExportFormat::new(48000, 16)).unwrap();
        let read = read_mono(&path).unwrap();

        assert_eq!(read.samples.len(), original.len());
        for (a, b) in original.iter().zip(&read.samples) {
            assert!((a - b).abs() < 0.001, "sample mismatch: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_read_mono_takes_first_channel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for i in 0..4 {
            writer.write_sample(i as f32).unwrap();
            writer.write_sample(-1.0f32).unwrap();
        }
        writer.finalize().unwrap();

        let read = read_mono(&path).unwrap();
        assert_eq!(read.samples, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(read.info.frames, 4);
    }

    #[test]
    fn test_read_nonexistent_file() {
        match read_mono(Path::new("/nonexistent/path/cab.wav")) {
            Err(ConvolverError::FileUnreadable { path, .. }) => {
                assert!(path.contains("nonexistent"))
            }
            other => panic!("Expected FileUnreadable error, got: {:?}", other),
        }
    }

    #[test]
    fn test_read_garbage_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not RIFF").unwrap();
        assert!(matches!(
            read_mono(&path),
            Err(ConvolverError::FileUnreadable { .. })
        ));
    }
}
