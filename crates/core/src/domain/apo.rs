//! Host-facing surface of the system-effects stage
//!
//! - [`AudioProcessingObject`]: the capability set a host drives
//! - [`RegistrationProperties`]: static identity data
//! - [`SystemEffectsApo::initialize`]: builds the real-time pipeline and its
//!   control-side notifier from one set of [`InitParams`]

use crate::domain::audio::{
    ApoError, AudioFormat, InputConnection, OutputConnection, ProcessingMode, Result,
};
use crate::domain::lifecycle::{HeapAllocator, RealtimeAllocator};
use crate::domain::notifier::SettingsChangeNotifier;
use crate::domain::pipeline::ProcessingPipeline;
use crate::domain::settings::{EffectsSettingsStore, PropertyStore};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Latency reported while the effect chain is active
pub const INTER_LATENCY: Duration = Duration::from_millis(10);

/// Capabilities a host uses to drive a processing stage
pub trait AudioProcessingObject: Send {
    /// Validate formats and acquire real-time resources
    fn lock(&mut self, input: &AudioFormat, output: &AudioFormat) -> Result<()>;

    /// Release real-time resources; harmless when not locked
    fn unlock(&mut self);

    fn is_locked(&self) -> bool;

    /// Latency this stage adds in its current configuration
    fn latency(&self) -> Duration;

    /// Process one block; never blocks, allocates or fails
    fn process(&mut self, input: &mut InputConnection<'_>, outputs: &mut [OutputConnection<'_>]);
}

/// Static identity data supplied to the host at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationProperties {
    pub name: &'static str,
    pub copyright: &'static str,
    pub major_version: u32,
    pub minor_version: u32,
    pub min_input_connections: u32,
    pub max_input_connections: u32,
    pub min_output_connections: u32,
    pub max_output_connections: u32,
    pub max_instances: u32,
    pub supports_in_place: bool,
    pub supported_modes: &'static [ProcessingMode],
}

impl RegistrationProperties {
    pub const INTER: RegistrationProperties = RegistrationProperties {
        name: "InterFX system effects",
        copyright: "Copyright (c) InterFX contributors",
        major_version: 1,
        minor_version: 0,
        min_input_connections: 1,
        max_input_connections: 1,
        min_output_connections: 1,
        max_output_connections: 1,
        max_instances: u32::MAX,
        supports_in_place: true,
        supported_modes: &ProcessingMode::ALL,
    };

    pub fn supports_mode(&self, mode: ProcessingMode) -> bool {
        self.supported_modes.contains(&mode)
    }
}

impl Default for RegistrationProperties {
    fn default() -> Self {
        Self::INTER
    }
}

/// Initialization data handed over by the host
#[derive(Clone)]
pub struct InitParams {
    pub mode: ProcessingMode,
    pub properties: Option<Arc<dyn PropertyStore>>,
    pub allocator: Arc<dyn RealtimeAllocator>,
}

impl fmt::Debug for InitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitParams")
            .field("mode", &self.mode)
            .field("has_properties", &self.properties.is_some())
            .finish_non_exhaustive()
    }
}

impl InitParams {
    /// No property store and the heap allocator
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            mode,
            properties: None,
            allocator: Arc::new(HeapAllocator),
        }
    }

    pub fn with_properties(mut self, properties: Arc<dyn PropertyStore>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn RealtimeAllocator>) -> Self {
        self.allocator = allocator;
        self
    }
}

impl Default for InitParams {
    fn default() -> Self {
        Self::new(ProcessingMode::Default)
    }
}

/// Factory for the gain + equalizer system-effects stage
#[derive(Debug, Clone, Default)]
pub struct SystemEffectsApo {
    registration: RegistrationProperties,
}

impl SystemEffectsApo {
    pub fn new(registration: RegistrationProperties) -> Self {
        Self { registration }
    }

    pub fn registration(&self) -> &RegistrationProperties {
        &self.registration
    }

    /// Read the initial settings and split the stage into its real-time and
    /// control halves
    #[instrument(skip(self, params), fields(mode = %params.mode))]
    pub fn initialize(
        &self,
        params: InitParams,
    ) -> Result<(ProcessingPipeline, SettingsChangeNotifier)> {
        if !self.registration.supports_mode(params.mode) {
            return Err(ApoError::InvalidArgument(format!(
                "processing mode '{}' is not supported",
                params.mode
            )));
        }

        let settings = Arc::new(EffectsSettingsStore::from_properties(
            params.mode,
            params.properties.as_deref(),
        ));
        let pipeline = ProcessingPipeline::new(settings.clone(), params.allocator);
        let notifier = SettingsChangeNotifier::new(settings, params.properties);

        info!(
            name = self.registration.name,
            values = ?notifier.store().snapshot().values(),
            "Initialized"
        );
        Ok((pipeline, notifier))
    }
}
