//! Example demonstrating settings-driven effects and change notification
//!
//! Run with: cargo run --package interfx-core --example settings_demo

use interfx_core::{
    apply_file_changes, AudioFormat, AudioProcessingObject, BufferState, ChannelSignal,
    InitParams, InputConnection, InterFxConfig, OutputConnection, SharedPropertyStore,
    SystemEffectsApo,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("interfx_core=debug,info")
        .init();

    println!("=== InterFX Settings Demo ===\n");

    // 1. Write factory defaults
    let config_path = std::env::temp_dir().join("interfx_demo.toml");
    let mut config = InterFxConfig::factory_default();
    config.save_to_file(&config_path).await?;
    println!("1. Factory settings written to {}", config_path.display());

    // 2. Initialize and lock
    let properties = Arc::new(SharedPropertyStore::new(config.effects));
    let params = InitParams::new(config.stream.processing_mode).with_properties(properties.clone());
    let (mut pipeline, notifier) = SystemEffectsApo::default().initialize(params)?;
    let format = AudioFormat::float32(config.stream.sample_rate, config.stream.channels);
    pipeline.lock(&format, &format)?;

    let (signal, listener) = ChannelSignal::pair();
    let effects = notifier.effects_list(Some(Box::new(signal)));
    println!("2. Locked; active effects: {effects:?}, latency {:?}", pipeline.latency());

    // 3. Process one block
    let mut input = vec![0.5_f32; 2 * 480];
    let mut output = vec![0.0_f32; 2 * 480];
    let mut connection = InputConnection::new(&mut input, BufferState::Valid, 480);
    let mut outputs = [OutputConnection::new(&mut output)];
    pipeline.process(&mut connection, &mut outputs);
    println!("3. Block processed; output state {:?}", outputs[0].state);

    // 4. Disable effects through the file
    config.effects.enable_mfx = Some(0);
    config.save_to_file(&config_path).await?;
    let changed = apply_file_changes(&config_path, &properties, &notifier).await?;
    println!(
        "4. Changed keys {changed:?}; effects-changed signalled: {}",
        listener.try_recv()
    );
    println!("   Latency now {:?}", pipeline.latency());

    pipeline.unlock();
    tokio::fs::remove_file(&config_path).await?;
    println!("\n=== Done ===");
    Ok(())
}
