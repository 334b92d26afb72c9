//! Persisted settings for InterFX
//!
//! This module provides:
//! - The TOML settings file (stream format plus endpoint effect properties)
//! - `SharedPropertyStore`, the in-memory `PropertyStore` the stage reads from
//! - `ConfigManager` for the default settings location, with corrupt-file backup
//! - Hot-reload via `PropertyWatcher`, which turns file edits into
//!   `on_setting_changed` calls

use crate::domain::audio::{AudioFormat, ProcessingMode};
use crate::domain::notifier::SettingsChangeNotifier;
use crate::domain::settings::{PropertyKey, PropertyStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SETTINGS FILE
// ============================================================================

/// Stream parameters used when the settings drive a standalone pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub processing_mode: ProcessingMode,
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per processing call
    pub block_frames: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            processing_mode: ProcessingMode::Default,
            sample_rate: 48000,
            channels: 2,
            block_frames: 480,
        }
    }
}

impl StreamSettings {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::float32(self.sample_rate, self.channels)
    }
}

/// Endpoint effect properties, one optional u32 per key
///
/// A missing entry reads as "absent". Level keys are written to the file as
/// signed numbers (`eq_low = -6`) and held as their two's complement DWORD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_sysfx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_mfx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", with = "signed_level")]
    pub gain_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", with = "signed_level")]
    pub eq_low: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", with = "signed_level")]
    pub eq_mid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", with = "signed_level")]
    pub eq_high: Option<u32>,
}

/// Level DWORDs as signed TOML integers
///
/// Accepts anything in `i32::MIN..=u32::MAX`; writes the i32 reading.
mod signed_level {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(dword) => serializer.serialize_some(&(*dword as i32)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<i64>::deserialize(deserializer)?
            .map(|level| {
                if (i64::from(i32::MIN)..=i64::from(u32::MAX)).contains(&level) {
                    Ok(level as u32)
                } else {
                    Err(D::Error::custom(format!("level {level} does not fit in 32 bits")))
                }
            })
            .transpose()
    }
}

impl EffectProperties {
    pub fn get(&self, key: PropertyKey) -> Option<u32> {
        match key {
            PropertyKey::DisableSysFx => self.disable_sysfx,
            PropertyKey::EnableMfx => self.enable_mfx,
            PropertyKey::GainLevel => self.gain_level,
            PropertyKey::EqLow => self.eq_low,
            PropertyKey::EqMid => self.eq_mid,
            PropertyKey::EqHigh => self.eq_high,
        }
    }

    pub fn set(&mut self, key: PropertyKey, value: Option<u32>) {
        let slot = match key {
            PropertyKey::DisableSysFx => &mut self.disable_sysfx,
            PropertyKey::EnableMfx => &mut self.enable_mfx,
            PropertyKey::GainLevel => &mut self.gain_level,
            PropertyKey::EqLow => &mut self.eq_low,
            PropertyKey::EqMid => &mut self.eq_mid,
            PropertyKey::EqHigh => &mut self.eq_high,
        };
        *slot = value;
    }

    /// Keys whose value differs between `self` and `other`
    pub fn changed_keys(&self, other: &EffectProperties) -> Vec<PropertyKey> {
        PropertyKey::ALL
            .into_iter()
            .filter(|key| self.get(*key) != other.get(*key))
            .collect()
    }
}

impl PropertyStore for EffectProperties {
    fn read_u32(&self, key: PropertyKey) -> Option<u32> {
        self.get(key)
    }
}

/// Complete settings file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterFxConfig {
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub effects: EffectProperties,
}

impl InterFxConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading settings");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;

        debug!(effects = ?config.effects, "Settings loaded successfully");
        Ok(config)
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving settings");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Settings saved successfully");
        Ok(())
    }

    /// Effects enabled with a gentle low and high lift
    pub fn factory_default() -> Self {
        Self {
            stream: StreamSettings::default(),
            effects: EffectProperties {
                disable_sysfx: Some(0),
                enable_mfx: Some(1),
                gain_level: Some(1),
                eq_low: Some(3),
                eq_mid: Some(0),
                eq_high: Some(2),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.stream.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".to_string()));
        }
        if self.stream.channels == 0 {
            return Err(ConfigError::Invalid("channels must be non-zero".to_string()));
        }
        if self.stream.block_frames == 0 {
            return Err(ConfigError::Invalid("block_frames must be non-zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SHARED PROPERTY STORE
// ============================================================================

/// In-memory property snapshot shared with the stage
///
/// Replaced wholesale when the settings file changes.
#[derive(Debug, Default)]
pub struct SharedPropertyStore {
    inner: RwLock<EffectProperties>,
}

impl SharedPropertyStore {
    pub fn new(properties: EffectProperties) -> Self {
        Self {
            inner: RwLock::new(properties),
        }
    }

    pub fn get(&self) -> EffectProperties {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in `properties`, returning the keys that changed
    pub fn replace(&self, properties: EffectProperties) -> Vec<PropertyKey> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let changed = guard.changed_keys(&properties);
        *guard = properties;
        changed
    }

    /// Update a single key; returns whether the value changed
    pub fn set(&self, key: PropertyKey, value: Option<u32>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let changed = guard.get(key) != value;
        guard.set(key, value);
        changed
    }
}

impl PropertyStore for SharedPropertyStore {
    fn read_u32(&self, key: PropertyKey) -> Option<u32> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
    }
}

// ============================================================================
// HOT RELOAD
// ============================================================================

/// File system watcher over one settings file
pub struct PropertyWatcher {
    _watcher: notify::RecommendedWatcher,
    changes_tx: broadcast::Sender<PathBuf>,
    path: PathBuf,
}

impl PropertyWatcher {
    /// Watch `path` for modifications
    ///
    /// The parent directory is watched so editors that replace the file on
    /// save are still seen.
    pub async fn new(path: PathBuf) -> Result<Self> {
        use notify::Watcher;

        let (changes_tx, _changes_rx) = broadcast::channel(32);

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::Invalid(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(&dir).await?;
        let file_name = path.file_name().map(|name| name.to_os_string());

        let tx_clone = changes_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                ) {
                    for changed in event.paths {
                        if changed.file_name() == file_name.as_deref() {
                            if let Err(e) = tx_clone.send(changed) {
                                debug!("No subscriber for settings change: {}", e);
                            }
                        }
                    }
                }
            }
        })?;

        watcher.watch(&dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %path.display(), "Settings watcher started");

        Ok(Self {
            _watcher: watcher,
            changes_tx,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribe to settings change events
    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.changes_tx.subscribe()
    }
}

/// Reload `path` into `store` and notify the stage of every changed key
///
/// A file that fails to load leaves the store untouched.
#[instrument(skip(path, store, notifier), fields(path = %path.as_ref().display()))]
pub async fn apply_file_changes<P: AsRef<Path>>(
    path: P,
    store: &SharedPropertyStore,
    notifier: &SettingsChangeNotifier,
) -> Result<Vec<PropertyKey>> {
    let config = match InterFxConfig::load_from_file(path.as_ref()).await {
        Ok(config) => config,
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable settings file");
            return Err(e);
        }
    };

    let changed = store.replace(config.effects);
    for key in &changed {
        notifier.on_setting_changed(key.as_str());
    }

    debug!(changed = ?changed, "Settings file applied");
    Ok(changed)
}

// ============================================================================
// CONFIG MANAGER
// ============================================================================

/// Manages the settings file at `~/.config/interfx/interfx.toml`
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join("interfx.toml");

        Self {
            config_dir,
            config_path,
        }
    }

    /// `~/.config/interfx` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("interfx"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the settings file
    ///
    /// A missing file is created with factory defaults. A corrupt file is
    /// backed up next to itself and factory defaults are returned.
    #[instrument(skip(self))]
    pub async fn load(&self) -> InterFxConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Settings file not found, creating factory default"
            );

            let config = InterFxConfig::factory_default();
            if let Err(e) = config.save_to_file(&self.config_path).await {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to save factory default settings"
                );
            }

            return config;
        }

        match InterFxConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load settings, using factory default"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt settings"
                    );
                }

                InterFxConfig::factory_default()
            }
        }
    }

    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &InterFxConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    /// Delete the settings file
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        if self.config_path.exists() {
            fs::remove_file(&self.config_path).await?;
            info!(path = %self.config_path.display(), "Settings cleared");
        }
        Ok(())
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}
