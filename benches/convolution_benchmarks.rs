//! Convolution Benchmarks
//!
//! Block processing cost and kernel build time.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use ampconv::config::ResamplerConfig;
use ampconv::dsp::partitioned::{ConvolutionState, PartitionedKernel};
use ampconv::dsp::resampler::resample_impulse;
use ampconv::engine::generate_test_tone;

fn decaying_ir(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| ((i as f32 * 0.37).sin()) * (-(i as f32) / 2000.0).exp())
        .collect()
}

fn benchmark_block_processing(c: &mut Criterion) {
    let ir = decaying_ir(8192);
    let input = generate_test_tone(440.0, 1.0, 48000);
    let mut group = c.benchmark_group("process_block_8192_taps");

    for block_size in [64, 256, 1024] {
        let mut state = ConvolutionState::build(&ir, 48000, block_size).unwrap();
        let mut output = vec![0.0; block_size];
        let block = &input[..block_size];
        group.bench_with_input(BenchmarkId::from_parameter(block_size), &block_size, |b, _| {
            b.iter(|| state.process(black_box(block), &mut output))
        });
    }
    group.finish();
}

fn benchmark_kernel_build(c: &mut Criterion) {
    let ir = decaying_ir(48000);

    c.bench_function("partition_1s_ir_block_256", |b| {
        b.iter(|| PartitionedKernel::build(black_box(&ir), 48000, 256).unwrap())
    });
}

fn benchmark_impulse_resample(c: &mut Criterion) {
    let ir = decaying_ir(44100);
    let config = ResamplerConfig::default();

    c.bench_function("resample_1s_ir_44k_to_48k", |b| {
        b.iter(|| resample_impulse(black_box(&ir), 44100, 48000, &config).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_block_processing,
    benchmark_kernel_build,
    benchmark_impulse_resample
);
criterion_main!(benches);
