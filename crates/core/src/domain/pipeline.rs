//! Real-time processing pipeline
//!
//! Per block: materialize silence, then either run gain → EQ low → EQ mid →
//! EQ high, or pass the input through. Nothing here logs, allocates or locks.

use crate::domain::apo::{AudioProcessingObject, INTER_LATENCY};
use crate::domain::audio::{
    AudioFormat, BufferState, InputConnection, OutputConnection, OutputFrames, Result,
};
use crate::domain::buffer::{copy_frames, write_silence};
use crate::domain::dsp::gain;
use crate::domain::lifecycle::{
    CoefficientBuffer, LifecycleManager, LockedResources, RealtimeAllocator,
};
use crate::domain::settings::EffectsSettingsStore;
use std::sync::Arc;
use std::time::Duration;

/// Real-time half of an initialized stage
#[derive(Debug)]
pub struct ProcessingPipeline {
    settings: Arc<EffectsSettingsStore>,
    lifecycle: LifecycleManager,
}

impl ProcessingPipeline {
    pub fn new(settings: Arc<EffectsSettingsStore>, allocator: Arc<dyn RealtimeAllocator>) -> Self {
        Self {
            settings,
            lifecycle: LifecycleManager::new(allocator),
        }
    }

    pub fn settings(&self) -> &Arc<EffectsSettingsStore> {
        &self.settings
    }

    /// Gain coefficients of the current lock
    pub fn coefficients(&self) -> Option<&CoefficientBuffer> {
        self.lifecycle.resources().map(|resources| &resources.coefficients)
    }

    /// Negotiated format of the current lock
    pub fn format(&self) -> Option<AudioFormat> {
        self.lifecycle.resources().map(|resources| resources.format)
    }
}

impl AudioProcessingObject for ProcessingPipeline {
    fn lock(&mut self, input: &AudioFormat, output: &AudioFormat) -> Result<()> {
        self.lifecycle.lock(input, output)?;
        self.settings.set_sample_rate(input.sample_rate.hz());
        Ok(())
    }

    fn unlock(&mut self) {
        self.lifecycle.unlock();
    }

    fn is_locked(&self) -> bool {
        self.lifecycle.is_locked()
    }

    fn latency(&self) -> Duration {
        if self.settings.effects_active() {
            INTER_LATENCY
        } else {
            Duration::ZERO
        }
    }

    fn process(&mut self, input: &mut InputConnection<'_>, outputs: &mut [OutputConnection<'_>]) {
        let Some(LockedResources {
            format,
            coefficients,
            history,
        }) = self.lifecycle.resources_mut()
        else {
            debug_assert!(false, "process called while unlocked");
            return;
        };

        match input.state {
            BufferState::Invalid => {
                debug_assert!(false, "invalid input buffer");
                return;
            }
            BufferState::Silent => {
                write_silence(
                    input.frames,
                    input.valid_frame_count as usize,
                    format.samples_per_frame(),
                );
            }
            BufferState::Valid => {}
        }

        let Some(output) = outputs.first_mut() else {
            return;
        };

        let frames = input.valid_frame_count as usize;
        let channels = format.samples_per_frame();
        let k = coefficients.as_slice();

        if self.settings.effects_active() {
            let equalizer = self.settings.equalizer();
            match &mut output.frames {
                OutputFrames::InPlace => {
                    gain::apply_in_place(input.frames, frames, channels, k);
                    equalizer.process(input.frames, frames, channels, history);
                }
                OutputFrames::Distinct(out) => {
                    gain::apply(out, input.frames, frames, channels, k);
                    equalizer.process(out, frames, channels, history);
                }
            }
            output.state = BufferState::Valid;
        } else {
            if let OutputFrames::Distinct(out) = &mut output.frames {
                copy_frames(out, input.frames, frames, channels);
            }
            output.state = input.state;
        }

        output.valid_frame_count = input.valid_frame_count;
    }
}
