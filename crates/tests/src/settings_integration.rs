//! Integration tests for persisted settings driving a live stage

use interfx_core::{
    apply_file_changes, AudioProcessingObject, ChannelSignal, ConfigManager, EffectId, EqBand,
    InitParams, InterFxConfig, ProcessingMode, PropertyKey, SharedPropertyStore,
    SystemEffectsApo, INTER_LATENCY,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_factory_settings_enable_effects() {
    let temp_dir = TempDir::new().unwrap();
    let manager = ConfigManager::new(temp_dir.path().to_path_buf());
    let config = manager.load().await;

    let properties = Arc::new(SharedPropertyStore::new(config.effects));
    let (pipeline, notifier) = SystemEffectsApo::default()
        .initialize(InitParams::new(config.stream.processing_mode).with_properties(properties))
        .unwrap();

    assert_eq!(notifier.effects_list(None), vec![EffectId::GainEqualizer]);
    assert_eq!(pipeline.latency(), INTER_LATENCY);
    assert_eq!(notifier.store().equalizer().filter(EqBand::Low).level(), 3);
}

#[tokio::test]
async fn test_master_disable_in_file_turns_effects_off() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("interfx.toml");
    let mut config = InterFxConfig::factory_default();
    config.save_to_file(&path).await.unwrap();

    let properties = Arc::new(SharedPropertyStore::new(config.effects));
    let (pipeline, notifier) = SystemEffectsApo::default()
        .initialize(InitParams::default().with_properties(properties.clone()))
        .unwrap();
    let (signal, listener) = ChannelSignal::pair();
    notifier.effects_list(Some(Box::new(signal)));

    config.effects.disable_sysfx = Some(1);
    config.save_to_file(&path).await.unwrap();
    let changed = apply_file_changes(&path, &properties, &notifier).await.unwrap();

    assert_eq!(changed, vec![PropertyKey::DisableSysFx]);
    assert!(listener.wait_timeout(Duration::from_secs(1)));
    assert!(!listener.try_recv());
    assert_eq!(pipeline.latency(), Duration::ZERO);
    assert!(notifier.effects_list(None).is_empty());
    for band in EqBand::ALL {
        assert!(notifier.store().equalizer().filter(band).coeffs().is_identity());
    }
}

#[tokio::test]
async fn test_raw_mode_ignores_file_changes() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("interfx.toml");
    let config = InterFxConfig::factory_default();
    config.save_to_file(&path).await.unwrap();

    let properties = Arc::new(SharedPropertyStore::default());
    let (_pipeline, notifier) = SystemEffectsApo::default()
        .initialize(InitParams::new(ProcessingMode::Raw).with_properties(properties.clone()))
        .unwrap();
    let (signal, listener) = ChannelSignal::pair();
    notifier.effects_list(Some(Box::new(signal)));

    let changed = apply_file_changes(&path, &properties, &notifier).await.unwrap();

    assert!(!changed.is_empty());
    assert!(!listener.try_recv());
    assert_eq!(notifier.store().snapshot().values(), Default::default());
}

#[tokio::test]
async fn test_replaced_signal_is_closed() {
    let (_pipeline, notifier) = SystemEffectsApo::default()
        .initialize(InitParams::default())
        .unwrap();

    let (first, first_listener) = ChannelSignal::pair();
    let (second, second_listener) = ChannelSignal::pair();
    notifier.effects_list(Some(Box::new(first)));
    notifier.effects_list(Some(Box::new(second)));

    assert!(first_listener.is_closed());
    assert!(!second_listener.is_closed());

    drop(notifier);
    assert!(second_listener.is_closed());
}
