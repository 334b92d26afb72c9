//! Integration tests for the processing pipeline
//!
//! These drive an initialized stage the way a host does: lock, process blocks
//! on one thread, change settings from another, unlock.

use interfx_core::{
    ApoError, AudioFormat, AudioProcessingObject, BufferState, EffectProperties, HeapAllocator,
    InitParams, InputConnection, OutputConnection, ProcessingMode, ProcessingPipeline,
    PropertyKey, RealtimeAllocator, SettingsChangeNotifier, SharedPropertyStore, SystemEffectsApo,
    INTER_LATENCY,
};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_RATE: u32 = 48000;

fn generate_sine_wave(frequency: f32, frames: usize, channels: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let s = (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin();
            std::iter::repeat(s).take(channels)
        })
        .collect()
}

fn enabled_properties() -> EffectProperties {
    EffectProperties {
        enable_mfx: Some(1),
        ..EffectProperties::default()
    }
}

fn locked_stage(
    mode: ProcessingMode,
    properties: Arc<SharedPropertyStore>,
) -> (ProcessingPipeline, SettingsChangeNotifier) {
    let (mut pipeline, notifier) = SystemEffectsApo::default()
        .initialize(InitParams::new(mode).with_properties(properties))
        .unwrap();
    let format = AudioFormat::float32(SAMPLE_RATE, 2);
    pipeline.lock(&format, &format).unwrap();
    (pipeline, notifier)
}

fn process_block(
    pipeline: &mut ProcessingPipeline,
    input: &mut [f32],
    output: &mut [f32],
    state: BufferState,
) -> (BufferState, u32) {
    let frames = (input.len() / 2) as u32;
    let mut connection = InputConnection::new(input, state, frames);
    let mut outputs = [OutputConnection::new(output)];
    pipeline.process(&mut connection, &mut outputs);
    (outputs[0].state, outputs[0].valid_frame_count)
}

// ============================================================================
// LIFECYCLE SCENARIOS
// ============================================================================

#[test]
fn test_stereo_lock_coefficients() {
    let (pipeline, _notifier) = locked_stage(ProcessingMode::Default, Arc::default());
    assert_eq!(pipeline.coefficients().unwrap().as_slice(), &[1.0, 0.5]);
}

#[test]
fn test_relock_yields_identical_coefficients() {
    let (mut pipeline, _notifier) = locked_stage(ProcessingMode::Default, Arc::default());
    let format = AudioFormat::float32(SAMPLE_RATE, 2);

    let first = pipeline.coefficients().cloned();
    pipeline.unlock();
    pipeline.unlock();
    assert!(!pipeline.is_locked());

    pipeline.lock(&format, &format).unwrap();
    assert_eq!(pipeline.coefficients().cloned(), first);
}

#[test]
fn test_lock_twice_rejected() {
    let (mut pipeline, _notifier) = locked_stage(ProcessingMode::Default, Arc::default());
    let format = AudioFormat::float32(SAMPLE_RATE, 2);

    assert_eq!(pipeline.lock(&format, &format), Err(ApoError::AlreadyLocked));
    assert!(pipeline.is_locked());
}

#[test]
fn test_failed_allocation_leaves_stage_unlocked() {
    struct NoMemory;

    impl RealtimeAllocator for NoMemory {
        fn allocate(&self, len: usize) -> interfx_core::audio::Result<Box<[f32]>> {
            Err(ApoError::OutOfMemory(len))
        }
    }

    let (mut pipeline, _notifier) = SystemEffectsApo::default()
        .initialize(InitParams::default().with_allocator(Arc::new(NoMemory)))
        .unwrap();
    let format = AudioFormat::float32(SAMPLE_RATE, 2);

    assert!(matches!(pipeline.lock(&format, &format), Err(ApoError::OutOfMemory(_))));
    assert!(!pipeline.is_locked());

    // A later lock with a working allocator is unaffected
    let (mut pipeline, _notifier) = SystemEffectsApo::default()
        .initialize(InitParams::default().with_allocator(Arc::new(HeapAllocator)))
        .unwrap();
    assert!(pipeline.lock(&format, &format).is_ok());
}

#[test]
fn test_format_mismatch_rejected() {
    let (mut pipeline, _notifier) = SystemEffectsApo::default()
        .initialize(InitParams::default())
        .unwrap();

    let input = AudioFormat::float32(48000, 2);
    let output = AudioFormat::float32(48000, 1);
    assert!(matches!(pipeline.lock(&input, &output), Err(ApoError::FormatMismatch(_))));
    assert!(!pipeline.is_locked());
}

// ============================================================================
// SIGNAL PATH SCENARIOS
// ============================================================================

#[test]
fn test_latency_by_mode() {
    let properties = Arc::new(SharedPropertyStore::new(enabled_properties()));

    let (default, _n1) = locked_stage(ProcessingMode::Default, properties.clone());
    let (raw, _n2) = locked_stage(ProcessingMode::Raw, properties);

    assert_eq!(default.latency(), INTER_LATENCY);
    assert_eq!(raw.latency(), Duration::ZERO);
}

#[test]
fn test_eq_shapes_output_when_enabled() {
    let properties = Arc::new(SharedPropertyStore::new(EffectProperties {
        enable_mfx: Some(1),
        eq_mid: Some(12),
        ..EffectProperties::default()
    }));
    let (mut pipeline, _notifier) = locked_stage(ProcessingMode::Media, properties);

    let mut input = generate_sine_wave(1000.0, 4800, 2);
    let mut output = vec![0.0; input.len()];
    let (state, frames) = process_block(&mut pipeline, &mut input, &mut output, BufferState::Valid);

    assert_eq!(state, BufferState::Valid);
    assert_eq!(frames, 4800);

    // Left channel: +12 dB at the mid center, gain 1.0
    let left_peak = output[4800..].iter().step_by(2).fold(0.0_f32, |a, s| a.max(s.abs()));
    assert!(left_peak > 3.5, "left peak {left_peak}");
}

#[test]
fn test_disable_signals_once_then_passthrough() {
    let properties = Arc::new(SharedPropertyStore::new(enabled_properties()));
    let (mut pipeline, notifier) = locked_stage(ProcessingMode::Default, properties.clone());

    let count = Arc::new(AtomicUsize::new(0));
    struct Counter(Arc<AtomicUsize>);
    impl interfx_core::EffectsChangedSignal for Counter {
        fn signal(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
    notifier.effects_list(Some(Box::new(Counter(count.clone()))));

    properties.set(PropertyKey::EnableMfx, Some(0));
    notifier.on_setting_changed(PropertyKey::EnableMfx.as_str());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let mut input = generate_sine_wave(440.0, 64, 2);
    let expected = input.clone();
    let mut output = vec![0.0; input.len()];
    let (state, _) = process_block(&mut pipeline, &mut input, &mut output, BufferState::Valid);

    assert_eq!(state, BufferState::Valid);
    assert_eq!(output, expected);
    assert_eq!(pipeline.latency(), Duration::ZERO);
}

#[test]
fn test_settings_change_while_streaming() {
    let properties = Arc::new(SharedPropertyStore::new(EffectProperties {
        enable_mfx: Some(1),
        eq_low: Some(6),
        ..EffectProperties::default()
    }));
    let (mut pipeline, notifier) = locked_stage(ProcessingMode::Default, properties.clone());
    let stop = Arc::new(AtomicBool::new(false));

    let audio = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut blocks = 0usize;
            let mut output = vec![0.0; 960];
            while !stop.load(Ordering::Acquire) || blocks < 100 {
                let mut input = generate_sine_wave(100.0, 480, 2);
                let (state, frames) =
                    process_block(&mut pipeline, &mut input, &mut output, BufferState::Valid);
                assert_eq!(frames, 480);
                assert_eq!(state, BufferState::Valid);
                assert!(output.iter().all(|s| s.is_finite()));
                blocks += 1;
            }
            blocks
        })
    };

    for level in (0..50u32).map(|i| i % 13) {
        properties.set(PropertyKey::EqLow, Some(level));
        notifier.on_setting_changed("eq_low");
        properties.set(PropertyKey::EnableMfx, Some(if level % 2 == 0 { 1 } else { 0 }));
        notifier.on_setting_changed("enable_mfx");
    }
    stop.store(true, Ordering::Release);

    assert!(audio.join().unwrap() >= 100);
}

proptest! {
    #[test]
    fn prop_raw_mode_is_bit_exact(samples in prop::collection::vec(-1.0f32..1.0, 2..512)) {
        let properties = Arc::new(SharedPropertyStore::new(EffectProperties {
            enable_mfx: Some(1),
            gain_level: Some(4),
            eq_high: Some(9),
            ..EffectProperties::default()
        }));
        let (mut pipeline, _notifier) = locked_stage(ProcessingMode::Raw, properties);

        let even = samples.len() / 2 * 2;
        let mut input = samples[..even].to_vec();
        let mut output = vec![0.0; even];
        let (state, frames) =
            process_block(&mut pipeline, &mut input, &mut output, BufferState::Valid);

        prop_assert_eq!(state, BufferState::Valid);
        prop_assert_eq!(frames as usize, even / 2);
        prop_assert_eq!(&output[..], &samples[..even]);
    }
}
