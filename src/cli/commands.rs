//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::cli::RenderMode;
use crate::config::{EngineConfig, IrSettings, ResamplerConfig};
use crate::convolver::{
    AudioPlugin, BaseConvolver, CabinetConvolver, CabinetEntry, ImpulseConvolver,
};
use crate::dsp::partitioned::PartitionedKernel;
use crate::engine::impulse::prepare_impulse;
use crate::engine::{
    read_mono, read_wav_info, write_mono, BuildEvent, BuildWorker, ExportFormat,
    ImpulseResponseSource, WavLoader,
};

const BUILD_TIMEOUT: Duration = Duration::from_secs(30);

/// Tone and gain settings for `render`
#[derive(Debug, Clone, Copy)]
pub struct RenderTone {
    pub level: f32,
    pub bass: f32,
    pub treble: f32,
}

/// Render `input` through the selected convolver into `output`.
#[allow(clippy::too_many_arguments)]
pub fn render(
    input: &Path,
    ir: &Path,
    output: &Path,
    mode: RenderMode,
    block_size: usize,
    tone: RenderTone,
    bit_depth: u16,
    config_path: Option<&Path>,
) -> Result<()> {
    info!("Rendering {} through {}", input.display(), ir.display());

    let config = match config_path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.validate()?;

    let audio = read_mono(input).with_context(|| format!("reading {}", input.display()))?;
    let rate = audio.info.sample_rate;
    let ir_info = read_wav_info(ir).with_context(|| format!("reading {}", ir.display()))?;

    let worker = BuildWorker::spawn(&config)?;
    let handle = worker.handle();

    // Enough extra samples for the impulse response tail to ring out
    let tail = (ir_info.frames as u64 * rate as u64 / ir_info.sample_rate.max(1) as u64) as usize;
    let total = audio.samples.len() + tail;

    let rendered = match mode {
        RenderMode::Cabinet => {
            let name = ir
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let entry = CabinetEntry::new(name, ImpulseResponseSource::from_file(ir));
            let mut cab = CabinetConvolver::new(vec![entry], &handle, &config)?;
            set_port(&cab, "level", tone.level)?;
            set_port(&cab, "bass", tone.bass)?;
            set_port(&cab, "treble", tone.treble)?;
            prepare_base(cab.base_mut(), rate, block_size)?;

            cab.activate(true);
            cab.base_mut().settle_gain();
            wait_for_build(cab.base())?;
            let rendered = render_blocks(&mut cab, &audio.samples, total, block_size);
            cab.activate(false);
            rendered
        }
        RenderMode::Impulse => {
            if tone.bass != 0.0 || tone.treble != 0.0 {
                warn!("bass and treble are ignored in impulse mode");
            }
            let mut conv = ImpulseConvolver::new(&handle, &config);
            conv.set_settings(IrSettings::for_file(ir))?;
            set_port(&conv, "gain", tone.level)?;
            prepare_base(conv.base_mut(), rate, block_size)?;

            conv.activate(true);
            conv.base_mut().settle_gain();
            wait_for_build(conv.base())?;
            let rendered = render_blocks(&mut conv, &audio.samples, total, block_size);
            conv.activate(false);
            rendered
        }
    };

    let peak = rendered.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 1.0 {
        warn!("output peaks at {:.2} and will clip below 32-bit", peak);
    }

    write_mono(output, &rendered, ExportFormat::new(rate, bit_depth))
        .with_context(|| format!("writing {}", output.display()))?;

    println!("Rendered: {}", output.display());
    println!("  Mode: {:?}", mode);
    println!("  Sample rate: {} Hz", rate);
    println!("  Block size: {}", block_size);
    println!("  Samples: {} ({} tail)", rendered.len(), tail);
    println!("  Peak: {:.3}", peak);

    Ok(())
}

/// Print an impulse response's header and how it partitions.
pub fn inspect(ir: &Path, block_size: usize, rate: Option<u32>) -> Result<()> {
    info!("Inspecting {}", ir.display());

    let header = read_wav_info(ir).with_context(|| format!("reading {}", ir.display()))?;
    let rate = rate.unwrap_or(header.sample_rate);

    let source = ImpulseResponseSource::from_file(ir);
    let prepared = prepare_impulse(&source, rate, &ResamplerConfig::default(), &WavLoader)?;
    let kernel = PartitionedKernel::build(&prepared.samples, rate, block_size)?;

    let energy: f32 = prepared.samples.iter().map(|s| s * s).sum();
    let peak = prepared.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));

    println!("Impulse response: {}", ir.display());
    println!(
        "  Format: {} Hz, {} ch, {}-bit {}",
        header.sample_rate,
        header.channels,
        header.bits_per_sample,
        if header.float { "float" } else { "int" }
    );
    println!(
        "  Length: {} frames ({:.3} s)",
        header.frames,
        header.duration_secs()
    );
    if rate != header.sample_rate {
        println!("  Resampled to {} Hz: {} samples", rate, prepared.samples.len());
    }
    println!("  Peak: {:.4}, energy: {:.4}", peak, energy);
    println!(
        "  Block size {}: {} partitions, FFT size {}",
        block_size,
        kernel.partition_count(),
        2 * block_size
    );

    Ok(())
}

/// List the WAV files of an IR directory, favorites marked with `*`.
pub fn list(dir: &Path, settings: Option<&Path>) -> Result<()> {
    info!("Scanning {}", dir.display());

    let settings = match settings {
        Some(path) => IrSettings::from_json_file(path)
            .with_context(|| format!("loading IR settings {}", path.display()))?,
        None => IrSettings::default(),
    };

    let files = IrSettings::scan_directory(dir)?;
    if files.is_empty() {
        println!("No impulse responses in {}", dir.display());
        return Ok(());
    }

    println!("Impulse responses in {}:", dir.display());
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let marker = if settings.is_favorite(&name) { "*" } else { " " };
        match read_wav_info(path) {
            Ok(info) => println!(
                "{} {:<40} {:>6} Hz {:>8.3} s",
                marker,
                name,
                info.sample_rate,
                info.duration_secs()
            ),
            Err(e) => println!("{} {:<40} unreadable: {}", marker, name, e),
        }
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn set_port(plugin: &dyn AudioPlugin, name: &str, value: f32) -> Result<()> {
    let Some(port) = plugin.connect_port(name) else {
        bail!("{} has no port named {}", plugin.name(), name);
    };
    let (min, max) = port.range();
    if !(min..=max).contains(&value) {
        bail!("{} must be within {}..{} dB, got {}", name, min, max, value);
    }
    port.set(value);
    Ok(())
}

fn prepare_base(base: &mut BaseConvolver, rate: u32, block_size: usize) -> Result<()> {
    base.init(rate)?;
    base.change_buffer_size(block_size)?;
    Ok(())
}

/// Block until the first build is published
fn wait_for_build(base: &BaseConvolver) -> Result<()> {
    let controller = base.controller();
    match controller.wait_event(BUILD_TIMEOUT) {
        Some(BuildEvent::Published {
            block_size,
            partitions,
            ..
        }) => {
            info!(block_size, partitions, "convolution ready");
            Ok(())
        }
        Some(BuildEvent::Failed(failure)) => {
            bail!("building the convolution failed: {}", failure.message)
        }
        None => bail!("no convolution was built within {:?}", BUILD_TIMEOUT),
    }
}

/// Run `samples` through `plugin` in blocks, zero padded to `total`
fn render_blocks(
    plugin: &mut dyn AudioPlugin,
    samples: &[f32],
    total: usize,
    block_size: usize,
) -> Vec<f32> {
    let blocks = total.div_ceil(block_size);
    let mut rendered = Vec::with_capacity(blocks * block_size);
    let mut in_block = vec![0.0f32; block_size];
    let mut out_block = vec![0.0f32; block_size];
    for block in 0..blocks {
        let start = block * block_size;
        in_block.fill(0.0);
        if start < samples.len() {
            let end = (start + block_size).min(samples.len());
            in_block[..end - start].copy_from_slice(&samples[start..end]);
        }
        plugin.process(&in_block, &mut out_block);
        rendered.extend_from_slice(&out_block);
    }
    rendered.truncate(total);
    rendered
}
