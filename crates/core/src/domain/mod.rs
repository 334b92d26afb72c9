//! Domain entities and processing rules

pub mod apo;
pub mod audio;
pub mod buffer;
pub mod config;
pub mod dsp;
pub mod lifecycle;
pub mod notifier;
pub mod pipeline;
pub mod settings;

// Re-export specific items to avoid ambiguous glob imports
pub use apo::{
    AudioProcessingObject, InitParams, RegistrationProperties, SystemEffectsApo, INTER_LATENCY,
};
pub use audio::{
    ApoError, AudioFormat, BufferState, ChannelCount, InputConnection, OutputConnection,
    OutputFrames, ProcessingMode, SampleFormat, SampleRate,
};
pub use config::{
    apply_file_changes, ConfigError, ConfigManager, EffectProperties, InterFxConfig,
    PropertyWatcher, SharedPropertyStore, StreamSettings,
};
pub use dsp::{
    gain, BiquadCoeffs, BiquadFilter, BiquadHistory, EqBand, EqualizerHistory, ThreeBandEqualizer,
};
pub use lifecycle::{
    CoefficientBuffer, HeapAllocator, LifecycleManager, LockedResources, RealtimeAllocator,
};
pub use notifier::{
    ChannelSignal, EffectId, EffectsChangedListener, EffectsChangedSignal, SettingsChangeNotifier,
};
pub use pipeline::ProcessingPipeline;
pub use settings::{
    compute_effective_setting, EffectControl, EffectsSettingsStore, EffectsSnapshot,
    EffectsValues, PropertyKey, PropertyStore,
};
