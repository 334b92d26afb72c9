//! Audio formats and host connection types
//!
//! This module defines what the host hands the processing stage: a format
//! descriptor per connection at lock time, and per-call connections carrying
//! interleaved f32 frames tagged with a buffer state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to the control-context caller
///
/// Nothing in here is ever produced on the real-time path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApoError {
    /// Input and output formats disagree, or are not 32-bit float
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),

    /// A real-time allocation could not be satisfied
    #[error("Out of memory: failed to allocate {0} samples")]
    OutOfMemory(usize),

    /// `lock` was called on a pipeline that is already locked
    #[error("Pipeline is already locked for processing")]
    AlreadyLocked,

    /// Invalid initialization data
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, ApoError>;

/// Audio sample rate in Hz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    Hz44100,
    Hz48000,
    Hz96000,
    Hz192000,
    Custom(u32),
}

impl SampleRate {
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
            SampleRate::Hz96000 => 96000,
            SampleRate::Hz192000 => 192000,
            SampleRate::Custom(hz) => *hz,
        }
    }

    pub fn from_hz(hz: u32) -> Self {
        match hz {
            44100 => SampleRate::Hz44100,
            48000 => SampleRate::Hz48000,
            96000 => SampleRate::Hz96000,
            192000 => SampleRate::Hz192000,
            hz => SampleRate::Custom(hz),
        }
    }
}

/// Number of audio channels (samples per frame)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelCount {
    Mono,
    Stereo,
    Surround(u16),
}

impl ChannelCount {
    pub fn count(&self) -> u16 {
        match self {
            ChannelCount::Mono => 1,
            ChannelCount::Stereo => 2,
            ChannelCount::Surround(n) => *n,
        }
    }

    pub fn from_count(count: u16) -> Self {
        match count {
            1 => ChannelCount::Mono,
            2 => ChannelCount::Stereo,
            n => ChannelCount::Surround(n),
        }
    }
}

/// Sample representations a host may negotiate
///
/// Only `F32` is accepted by the processing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    I16,
    I32,
    F32,
    F64,
}

/// Uncompressed format descriptor for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: SampleRate,
    pub channels: ChannelCount,
    pub sample_format: SampleFormat,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: SampleRate::Hz48000,
            channels: ChannelCount::Stereo,
            sample_format: SampleFormat::F32,
        }
    }
}

impl AudioFormat {
    /// Interleaved 32-bit float format
    pub fn float32(sample_rate_hz: u32, channels: u16) -> Self {
        Self {
            sample_rate: SampleRate::from_hz(sample_rate_hz),
            channels: ChannelCount::from_count(channels),
            sample_format: SampleFormat::F32,
        }
    }

    pub fn samples_per_frame(&self) -> usize {
        self.channels.count() as usize
    }

    /// Number of whole frames spanning `duration` at this rate
    pub fn frames_for(&self, duration: Duration) -> usize {
        (self.sample_rate.hz() as u128 * duration.as_nanos() / 1_000_000_000) as usize
    }
}

/// Audio signal processing mode, fixed when the stage is initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Default,
    /// Unprocessed signal path: the effect chain never runs in this mode
    Raw,
    Communications,
    Speech,
    Media,
    Movie,
}

impl ProcessingMode {
    pub const ALL: [ProcessingMode; 6] = [
        ProcessingMode::Default,
        ProcessingMode::Raw,
        ProcessingMode::Communications,
        ProcessingMode::Speech,
        ProcessingMode::Media,
        ProcessingMode::Movie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Default => "default",
            ProcessingMode::Raw => "raw",
            ProcessingMode::Communications => "communications",
            ProcessingMode::Speech => "speech",
            ProcessingMode::Media => "media",
            ProcessingMode::Movie => "movie",
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, ProcessingMode::Raw)
    }
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMode {
    type Err = ApoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ApoError::InvalidArgument(format!("unknown processing mode '{s}'")))
    }
}

/// State tag carried by every connection buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferState {
    /// Never valid at processing time
    #[default]
    Invalid,
    Valid,
    /// Samples are meaningless and may be materialized as zeros
    Silent,
}

/// Input connection for one `process` call
///
/// `frames` is mutable because a silent input is materialized in place before
/// the effect chain reads it. The state tag is never rewritten by the stage.
#[derive(Debug)]
pub struct InputConnection<'a> {
    pub frames: &'a mut [f32],
    pub state: BufferState,
    pub valid_frame_count: u32,
}

impl<'a> InputConnection<'a> {
    pub fn new(frames: &'a mut [f32], state: BufferState, valid_frame_count: u32) -> Self {
        Self {
            frames,
            state,
            valid_frame_count,
        }
    }
}

/// Where an output connection's samples live
#[derive(Debug)]
pub enum OutputFrames<'a> {
    /// Output shares the input buffer
    InPlace,
    /// Output has its own buffer
    Distinct(&'a mut [f32]),
}

/// Output connection for one `process` call
#[derive(Debug)]
pub struct OutputConnection<'a> {
    pub frames: OutputFrames<'a>,
    pub state: BufferState,
    pub valid_frame_count: u32,
}

impl<'a> OutputConnection<'a> {
    pub fn new(frames: &'a mut [f32]) -> Self {
        Self {
            frames: OutputFrames::Distinct(frames),
            state: BufferState::Invalid,
            valid_frame_count: 0,
        }
    }

    pub fn in_place() -> Self {
        Self {
            frames: OutputFrames::InPlace,
            state: BufferState::Invalid,
            valid_frame_count: 0,
        }
    }
}
