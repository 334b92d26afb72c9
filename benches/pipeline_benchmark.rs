//! Criterion benchmarks for the real-time process path
//!
//! Measures:
//! - Full chain (gain + 3-band EQ) per block size
//! - Passthrough cost when effects are disabled
//! - Raw mode
//! - Process cost while the control thread re-prepares filters

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use interfx_benchmarks::{generate_noise, generate_sine_wave};
use interfx_core::{
    AudioFormat, AudioProcessingObject, BufferState, EffectProperties, InitParams,
    InputConnection, OutputConnection, ProcessingMode, ProcessingPipeline, SettingsChangeNotifier,
    SharedPropertyStore, SystemEffectsApo,
};
use std::hint::black_box;
use std::sync::Arc;

const SAMPLE_RATE: u32 = 48000;
const CHANNELS: usize = 2;

type Stage = (ProcessingPipeline, SettingsChangeNotifier, Arc<SharedPropertyStore>);

fn stage(mode: ProcessingMode, enabled: bool) -> Stage {
    let properties = Arc::new(SharedPropertyStore::new(EffectProperties {
        enable_mfx: Some(u32::from(enabled)),
        gain_level: Some(2),
        eq_low: Some(4),
        eq_mid: Some(2),
        eq_high: Some(6),
        ..EffectProperties::default()
    }));
    let (mut pipeline, notifier) = SystemEffectsApo::default()
        .initialize(InitParams::new(mode).with_properties(properties.clone()))
        .expect("initialize");
    let format = AudioFormat::float32(SAMPLE_RATE, CHANNELS as u16);
    pipeline.lock(&format, &format).expect("lock");
    (pipeline, notifier, properties)
}

fn run_block(
    pipeline: &mut ProcessingPipeline,
    input: &mut [f32],
    output: &mut [f32],
    frames: u32,
) {
    let mut connection = InputConnection::new(input, BufferState::Valid, frames);
    let mut outputs = [OutputConnection::new(output)];
    pipeline.process(&mut connection, &mut outputs);
    black_box(outputs[0].state);
}

fn bench_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("process");

    for (name, mode, enabled) in [
        ("chain", ProcessingMode::Default, true),
        ("disabled", ProcessingMode::Default, false),
        ("raw", ProcessingMode::Raw, true),
    ] {
        for frames in [128usize, 480, 1024] {
            let (mut pipeline, _notifier, _properties) = stage(mode, enabled);
            let source = generate_sine_wave(440.0, SAMPLE_RATE, frames, CHANNELS);
            let mut input = source.clone();
            let mut output = vec![0.0; source.len()];

            group.throughput(Throughput::Elements(frames as u64));
            group.bench_with_input(BenchmarkId::new(name, frames), &frames, |b, &frames| {
                b.iter(|| {
                    input.copy_from_slice(&source);
                    run_block(&mut pipeline, &mut input, &mut output, frames as u32);
                });
            });
        }
    }

    group.finish();
}

fn bench_in_place(c: &mut Criterion) {
    let (mut pipeline, _notifier, _properties) = stage(ProcessingMode::Media, true);
    let source = generate_noise(480 * CHANNELS, 42);
    let mut buffer = source.clone();

    c.bench_function("process_in_place_480", |b| {
        b.iter(|| {
            buffer.copy_from_slice(&source);
            let mut connection = InputConnection::new(&mut buffer, BufferState::Valid, 480);
            let mut outputs = [OutputConnection::in_place()];
            pipeline.process(&mut connection, &mut outputs);
        });
    });
}

fn bench_with_settings_churn(c: &mut Criterion) {
    let (mut pipeline, notifier, properties) = stage(ProcessingMode::Default, true);
    let source = generate_sine_wave(1000.0, SAMPLE_RATE, 480, CHANNELS);
    let mut input = source.clone();
    let mut output = vec![0.0; source.len()];

    c.bench_function("process_480_with_reprepare", |b| {
        let mut level = 0u32;
        b.iter(|| {
            level = (level + 1) % 13;
            properties.set(interfx_core::PropertyKey::EqMid, Some(level));
            notifier.on_setting_changed("eq_mid");
            input.copy_from_slice(&source);
            run_block(&mut pipeline, &mut input, &mut output, 480);
        });
    });
}

criterion_group!(benches, bench_modes, bench_in_place, bench_with_settings_churn);
criterion_main!(benches);
