//! Settings-change protocol between the control thread and the audio thread
//!
//! The host tells the stage a property changed; the notifier re-derives every
//! control under the settings mutex, republishes the snapshot and filter
//! coefficients, and signals a registered "effects changed" handle.

use crate::domain::audio::ProcessingMode;
use crate::domain::settings::{
    compute_effective_setting, EffectControl, EffectsSettingsStore, PropertyKey, PropertyStore,
};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

/// Handle the stage signals when its list of active effects may have changed
pub trait EffectsChangedSignal: Send {
    /// Wake whoever is waiting; must not block
    fn signal(&self);

    /// Release the handle; called when it is replaced or the stage goes away
    fn close(&mut self) {}
}

/// Identifier of an effect the stage can report as active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectId {
    /// Gain stage followed by the three-band equalizer
    GainEqualizer,
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectId::GainEqualizer => f.write_str("gain-equalizer"),
        }
    }
}

// ============================================================================
// CHANNEL SIGNAL
// ============================================================================

/// Auto-reset event over a bounded crossbeam channel
///
/// Repeated signals before the listener wakes collapse into one.
#[derive(Debug)]
pub struct ChannelSignal {
    tx: Option<Sender<()>>,
    closed: Arc<AtomicBool>,
}

/// Receiving end of a [`ChannelSignal`]
#[derive(Debug, Clone)]
pub struct EffectsChangedListener {
    rx: Receiver<()>,
    closed: Arc<AtomicBool>,
}

impl ChannelSignal {
    pub fn pair() -> (Self, EffectsChangedListener) {
        let (tx, rx) = channel::bounded(1);
        let closed = Arc::new(AtomicBool::new(false));
        let signal = Self {
            tx: Some(tx),
            closed: closed.clone(),
        };
        (signal, EffectsChangedListener { rx, closed })
    }
}

impl Drop for ChannelSignal {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl EffectsChangedSignal for ChannelSignal {
    fn signal(&self) {
        if let Some(tx) = &self.tx {
            match tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    trace!("Effects-changed listener dropped");
                }
            }
        }
    }

    fn close(&mut self) {
        self.tx = None;
        self.closed.store(true, Ordering::Release);
    }
}

impl EffectsChangedListener {
    /// Consume a pending signal, if any
    pub fn try_recv(&self) -> bool {
        self.rx.try_recv().is_ok()
    }

    /// Wait up to `timeout` for a signal
    ///
    /// Returns `false` on timeout or once the signal side has been closed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Whether the signal side was closed or dropped
    ///
    /// Leaves any pending signal in place.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// ============================================================================
// SETTINGS CHANGE NOTIFIER
// ============================================================================

/// Control-side half of an initialized stage
pub struct SettingsChangeNotifier {
    store: Arc<EffectsSettingsStore>,
    properties: Option<Arc<dyn PropertyStore>>,
}

impl fmt::Debug for SettingsChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsChangeNotifier")
            .field("store", &self.store)
            .field("has_properties", &self.properties.is_some())
            .finish()
    }
}

impl SettingsChangeNotifier {
    pub fn new(
        store: Arc<EffectsSettingsStore>,
        properties: Option<Arc<dyn PropertyStore>>,
    ) -> Self {
        Self { store, properties }
    }

    pub fn store(&self) -> &Arc<EffectsSettingsStore> {
        &self.store
    }

    pub fn mode(&self) -> ProcessingMode {
        self.store.mode()
    }

    /// React to a changed property
    ///
    /// Untracked keys and stages without a property store are ignored.
    /// Returns the number of controls whose value changed.
    #[instrument(skip(self), fields(mode = %self.store.mode()))]
    pub fn on_setting_changed(&self, key: &str) -> usize {
        let Some(properties) = self.properties.as_deref() else {
            return 0;
        };
        let Ok(key) = key.parse::<PropertyKey>() else {
            trace!("Ignoring untracked property");
            return 0;
        };

        let control = self.store.control();
        let master_disable = properties.system_effects_disabled();
        let mode = self.store.mode();
        let snapshot = self.store.snapshot();

        let mut changes = 0;
        for effect in EffectControl::ALL {
            let new_value =
                compute_effective_setting(properties.read_u32(effect.key()), master_disable, mode);
            let old_value = snapshot.swap(effect, new_value);

            if new_value != old_value {
                debug!(control = ?effect, old_value, new_value, "Control changed");
                if let Some(band) = effect.band() {
                    self.store.equalizer().prepare(band, new_value);
                }
                changes += 1;
            }
        }

        if changes > 0 {
            if let Some(signal) = control.signal.as_ref() {
                signal.signal();
            }
        }

        info!(%key, changes, values = ?snapshot.values(), "Settings change processed");
        changes
    }

    /// Register `signal` (closing any previous handle) and list active effects
    #[instrument(skip(self, signal), fields(has_signal = signal.is_some()))]
    pub fn effects_list(&self, signal: Option<Box<dyn EffectsChangedSignal>>) -> Vec<EffectId> {
        let mut control = self.store.control();

        if let Some(mut previous) = control.signal.take() {
            previous.close();
        }
        control.signal = signal;

        let effects = if self.store.effects_active() {
            vec![EffectId::GainEqualizer]
        } else {
            Vec::new()
        };

        debug!(count = effects.len(), "Effects list requested");
        effects
    }
}

impl Drop for SettingsChangeNotifier {
    fn drop(&mut self) {
        if let Some(mut signal) = self.store.control().signal.take() {
            signal.close();
        }
    }
}
