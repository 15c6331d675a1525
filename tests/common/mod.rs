//! Shared helpers for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ampconv::convolver::AudioPlugin;
use ampconv::engine::{write_mono, ExportFormat};

/// Write `samples` as a 32-bit float mono WAV
pub fn write_fixture(dir: &Path, name: &str, samples: &[f32], sample_rate: u32) -> PathBuf {
    let path = dir.join(name);
    write_mono(&path, samples, ExportFormat::new(sample_rate, 32)).unwrap();
    path
}

/// Decaying noise-like impulse response, deterministic
pub fn synthetic_ir(len: usize, sample_rate: u32) -> Vec<f32> {
    let mut state: u32 = 0x1234_5678;
    (0..len)
        .map(|i| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let noise = (state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0;
            let decay = (-(i as f32) / (sample_rate as f32 * 0.02)).exp();
            noise * decay * 0.5
        })
        .collect()
}

/// Direct-form convolution, truncated to the input length
pub fn direct_convolution(input: &[f32], kernel: &[f32]) -> Vec<f32> {
    (0..input.len())
        .map(|n| {
            let taps = kernel.len().min(n + 1);
            (0..taps).map(|k| kernel[k] as f64 * input[n - k] as f64).sum::<f64>() as f32
        })
        .collect()
}

/// Feed silent blocks until the plugin runs a published build
pub fn pump_until_runnable(plugin: &mut dyn AudioPlugin, block: usize) {
    let input = vec![0.0; block];
    let mut output = vec![0.0; block];
    let deadline = Instant::now() + Duration::from_secs(20);
    while !plugin.is_runnable() {
        assert!(
            Instant::now() < deadline,
            "{} did not become runnable (state {})",
            plugin.id(),
            plugin.state()
        );
        plugin.process(&input, &mut output);
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Run `input` through `plugin` block by block
pub fn process_blocks(plugin: &mut dyn AudioPlugin, input: &[f32], block: usize) -> Vec<f32> {
    let mut output = Vec::with_capacity(input.len());
    let mut out_block = vec![0.0; block];
    for chunk in input.chunks(block) {
        if chunk.len() < block {
            let mut padded = chunk.to_vec();
            padded.resize(block, 0.0);
            plugin.process(&padded, &mut out_block);
            output.extend_from_slice(&out_block[..chunk.len()]);
        } else {
            plugin.process(chunk, &mut out_block);
            output.extend_from_slice(&out_block);
        }
    }
    output
}
