//! Effect settings: persisted keys, the effective-setting policy and the
//! lock-free snapshot read by the real-time thread
//!
//! The snapshot is written only from the control thread (initialization and
//! change notifications) and read once per block by the pipeline. Each control
//! is its own cache-padded atomic; a block may observe a mix of old and new
//! values, which is acceptable for one block.

use crate::domain::audio::{ApoError, ProcessingMode};
use crate::domain::dsp::{EqBand, ThreeBandEqualizer};
use crate::domain::notifier::EffectsChangedSignal;
use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, instrument};

// ============================================================================
// PROPERTY KEYS
// ============================================================================

/// Persisted endpoint property read by the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKey {
    /// Master "disable system effects" switch
    DisableSysFx,
    EnableMfx,
    GainLevel,
    EqLow,
    EqMid,
    EqHigh,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 6] = [
        PropertyKey::DisableSysFx,
        PropertyKey::EnableMfx,
        PropertyKey::GainLevel,
        PropertyKey::EqLow,
        PropertyKey::EqMid,
        PropertyKey::EqHigh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyKey::DisableSysFx => "disable_sysfx",
            PropertyKey::EnableMfx => "enable_mfx",
            PropertyKey::GainLevel => "gain_level",
            PropertyKey::EqLow => "eq_low",
            PropertyKey::EqMid => "eq_mid",
            PropertyKey::EqHigh => "eq_high",
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyKey {
    type Err = ApoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ApoError::InvalidArgument(format!("unknown property key '{s}'")))
    }
}

/// Read-only view of the persisted endpoint properties
///
/// `None` covers every way a read can fail to yield a u32: the key is absent,
/// unreadable, or holds a value of another type.
pub trait PropertyStore: Send + Sync {
    fn read_u32(&self, key: PropertyKey) -> Option<u32>;

    /// Whether the master disable switch is set
    fn system_effects_disabled(&self) -> bool {
        self.read_u32(PropertyKey::DisableSysFx)
            .is_some_and(|value| value != 0)
    }
}

/// Effective value of one control
///
/// Returns the stored value only when effects are not globally disabled, the
/// mode is not Raw and the control itself holds a non-zero u32. Otherwise 0.
/// The stored DWORD is a two's complement level: `0xFFFF_FFFA` is -6.
pub fn compute_effective_setting(
    raw: Option<u32>,
    master_disable: bool,
    mode: ProcessingMode,
) -> i32 {
    match raw {
        Some(value) if value != 0 && !master_disable && !mode.is_raw() => value as i32,
        _ => 0,
    }
}

// ============================================================================
// CONTROLS & SNAPSHOT
// ============================================================================

/// The five controls held in the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectControl {
    Enable,
    GainLevel,
    EqLow,
    EqMid,
    EqHigh,
}

impl EffectControl {
    pub const ALL: [EffectControl; 5] = [
        EffectControl::Enable,
        EffectControl::GainLevel,
        EffectControl::EqLow,
        EffectControl::EqMid,
        EffectControl::EqHigh,
    ];

    pub fn key(&self) -> PropertyKey {
        match self {
            EffectControl::Enable => PropertyKey::EnableMfx,
            EffectControl::GainLevel => PropertyKey::GainLevel,
            EffectControl::EqLow => PropertyKey::EqLow,
            EffectControl::EqMid => PropertyKey::EqMid,
            EffectControl::EqHigh => PropertyKey::EqHigh,
        }
    }

    /// Equalizer band driven by this control, if any
    pub fn band(&self) -> Option<EqBand> {
        match self {
            EffectControl::EqLow => Some(EqBand::Low),
            EffectControl::EqMid => Some(EqBand::Mid),
            EffectControl::EqHigh => Some(EqBand::High),
            EffectControl::Enable | EffectControl::GainLevel => None,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Plain copy of the snapshot, for logging and reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectsValues {
    pub enabled: i32,
    pub gain_level: i32,
    pub eq_low: i32,
    pub eq_mid: i32,
    pub eq_high: i32,
}

/// Independently updated atomic controls
#[derive(Debug, Default)]
pub struct EffectsSnapshot {
    controls: [CachePadded<AtomicI32>; 5],
}

impl EffectsSnapshot {
    #[inline]
    pub fn get(&self, control: EffectControl) -> i32 {
        self.controls[control.index()].load(Ordering::Acquire)
    }

    /// Store a new value, returning the previous one
    pub fn swap(&self, control: EffectControl, value: i32) -> i32 {
        self.controls[control.index()].swap(value, Ordering::AcqRel)
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.get(EffectControl::Enable) != 0
    }

    pub fn values(&self) -> EffectsValues {
        EffectsValues {
            enabled: self.get(EffectControl::Enable),
            gain_level: self.get(EffectControl::GainLevel),
            eq_low: self.get(EffectControl::EqLow),
            eq_mid: self.get(EffectControl::EqMid),
            eq_high: self.get(EffectControl::EqHigh),
        }
    }
}

// ============================================================================
// SETTINGS STORE
// ============================================================================

/// Control-side state guarded by the settings mutex
#[derive(Default)]
pub struct ControlState {
    pub(crate) signal: Option<Box<dyn EffectsChangedSignal>>,
}

impl fmt::Debug for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlState")
            .field("signal_registered", &self.signal.is_some())
            .finish()
    }
}

/// Settings shared between the control thread and the real-time thread
///
/// Writers (notifier, lock) serialize on the control mutex; the real-time
/// thread only reads the atomics and the published filter coefficients.
#[derive(Debug)]
pub struct EffectsSettingsStore {
    mode: ProcessingMode,
    snapshot: EffectsSnapshot,
    equalizer: ThreeBandEqualizer,
    control: Mutex<ControlState>,
}

impl EffectsSettingsStore {
    /// Build the initial snapshot
    ///
    /// Without a property store every control stays 0.
    #[instrument(skip(properties), fields(has_properties = properties.is_some()))]
    pub fn from_properties(mode: ProcessingMode, properties: Option<&dyn PropertyStore>) -> Self {
        let store = Self {
            mode,
            snapshot: EffectsSnapshot::default(),
            equalizer: ThreeBandEqualizer::new(),
            control: Mutex::new(ControlState::default()),
        };

        if let Some(properties) = properties {
            let master_disable = properties.system_effects_disabled();
            for control in EffectControl::ALL {
                let value = compute_effective_setting(
                    properties.read_u32(control.key()),
                    master_disable,
                    mode,
                );
                store.snapshot.swap(control, value);
                if let Some(band) = control.band() {
                    store.equalizer.prepare(band, value);
                }
            }
        }

        debug!(values = ?store.snapshot.values(), "Initial effect settings");
        store
    }

    pub fn mode(&self) -> ProcessingMode {
        self.mode
    }

    pub fn snapshot(&self) -> &EffectsSnapshot {
        &self.snapshot
    }

    pub fn equalizer(&self) -> &ThreeBandEqualizer {
        &self.equalizer
    }

    /// Whether the effect chain runs: mode is not Raw and effects are enabled
    #[inline]
    pub fn effects_active(&self) -> bool {
        !self.mode.is_raw() && self.snapshot.enabled()
    }

    /// Acquire the control mutex, tolerating poisoning
    pub(crate) fn control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Redesign the equalizer for the negotiated rate
    pub fn set_sample_rate(&self, sample_rate: u32) {
        let _guard = self.control();
        self.equalizer.set_sample_rate(sample_rate);
    }
}
