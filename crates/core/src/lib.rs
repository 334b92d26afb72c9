//! InterFX core: a real-time system-effects processing stage
//!
//! The crate is organised around three concerns:
//! - the per-block signal path (`domain::pipeline`, `domain::dsp`, `domain::buffer`)
//! - the lock/unlock lifecycle that owns every real-time allocation (`domain::lifecycle`)
//! - the settings-change protocol between the control thread and the audio
//!   thread (`domain::settings`, `domain::notifier`, `domain::config`)

pub mod domain;

pub use domain::*;
