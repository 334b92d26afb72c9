//! Signal processing blocks for the effect chain
//!
//! This module provides:
//! - Biquad coefficient design (RBJ low shelf, peaking, high shelf)
//! - A shareable `BiquadFilter` whose coefficients can be re-prepared from the
//!   control thread while the real-time thread keeps processing
//! - The three-band equalizer built from three such filters
//! - The per-channel gain stage
//!
//! Everything called from the real-time thread is:
//! - Allocation free (history lives in caller-owned buffers)
//! - Lock free on the reader side
//! - Infallible

use crate::domain::audio::{ApoError, Result};
use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use tracing::trace;

/// Parameter constraints for the equalizer bands
pub mod params {
    /// Band level range, in integer steps
    pub const LEVEL_MIN: i32 = -12;
    pub const LEVEL_MAX: i32 = 12;

    /// Boost or cut applied per level step
    pub const DB_PER_LEVEL: f32 = 1.0;

    /// EQ frequencies (Hz)
    pub const FREQ_LOW_SHELF: f32 = 200.0;
    pub const FREQ_MID_CENTER: f32 = 1000.0;
    pub const FREQ_HIGH_SHELF: f32 = 2000.0;

    pub const SHELF_Q: f32 = 0.707;
    pub const MID_Q: f32 = 1.0;

    /// Design rate used until a lock supplies the negotiated one
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
}

// ============================================================================
// BIQUAD COEFFICIENTS
// ============================================================================

/// Biquad filter coefficients, normalized so that a0 == 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoeffs {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl Default for BiquadCoeffs {
    fn default() -> Self {
        Self::identity()
    }
}

/// Intermediate terms shared by every RBJ design
struct Rbj {
    a: f32,
    cos_w0: f32,
    alpha: f32,
}

impl Rbj {
    fn new(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        Self {
            a: 10.0_f32.powf(gain_db / 40.0),
            cos_w0: w0.cos(),
            alpha: w0.sin() / (2.0 * q),
        }
    }
}

impl BiquadCoeffs {
    /// Pass-through coefficients: y[n] = x[n]
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }

    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Low shelf: boosts or cuts everything below `freq`
    #[must_use]
    pub fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let Rbj { a, cos_w0, alpha } = Rbj::new(sample_rate, freq, gain_db, q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
            a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
            (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// High shelf: boosts or cuts everything above `freq`
    #[must_use]
    pub fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let Rbj { a, cos_w0, alpha } = Rbj::new(sample_rate, freq, gain_db, q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
            a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
            (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    /// Peaking: boosts or cuts a band centered on `freq`
    #[must_use]
    pub fn peaking(sample_rate: f32, freq: f32, gain_db: f32, q: f32) -> Self {
        let Rbj { a, cos_w0, alpha } = Rbj::new(sample_rate, freq, gain_db, q);

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        )
    }

    /// Magnitude response at `freq`, in linear gain
    pub fn magnitude_at(&self, sample_rate: f32, freq: f32) -> f32 {
        let w = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let (cos1, sin1) = (w.cos(), w.sin());
        let (cos2, sin2) = ((2.0 * w).cos(), (2.0 * w).sin());

        let num_re = self.b0 + self.b1 * cos1 + self.b2 * cos2;
        let num_im = -(self.b1 * sin1 + self.b2 * sin2);
        let den_re = 1.0 + self.a1 * cos1 + self.a2 * cos2;
        let den_im = -(self.a1 * sin1 + self.a2 * sin2);

        ((num_re * num_re + num_im * num_im) / (den_re * den_re + den_im * den_im)).sqrt()
    }
}

// ============================================================================
// EQ BANDS
// ============================================================================

/// One of the three equalizer slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EqBand {
    Low,
    Mid,
    High,
}

impl EqBand {
    pub const ALL: [EqBand; 3] = [EqBand::Low, EqBand::Mid, EqBand::High];

    /// Boost/cut in dB for a band level, clamped to the supported range
    pub fn gain_db(level: i32) -> f32 {
        level.clamp(params::LEVEL_MIN, params::LEVEL_MAX) as f32 * params::DB_PER_LEVEL
    }

    /// Coefficients realizing `level` at `sample_rate`
    ///
    /// Level 0 is exactly the identity filter.
    #[must_use]
    pub fn coeffs_for_level(&self, level: i32, sample_rate: u32) -> BiquadCoeffs {
        if level == 0 {
            return BiquadCoeffs::identity();
        }

        let sr = sample_rate as f32;
        let gain_db = Self::gain_db(level);
        match self {
            EqBand::Low => {
                BiquadCoeffs::low_shelf(sr, params::FREQ_LOW_SHELF, gain_db, params::SHELF_Q)
            }
            EqBand::Mid => {
                BiquadCoeffs::peaking(sr, params::FREQ_MID_CENTER, gain_db, params::MID_Q)
            }
            EqBand::High => {
                BiquadCoeffs::high_shelf(sr, params::FREQ_HIGH_SHELF, gain_db, params::SHELF_Q)
            }
        }
    }

    /// Frequency where this band's effect is strongest
    pub fn probe_frequency(&self) -> f32 {
        match self {
            EqBand::Low => 20.0,
            EqBand::Mid => params::FREQ_MID_CENTER,
            EqBand::High => 16000.0,
        }
    }
}

// ============================================================================
// BIQUAD FILTER
// ============================================================================

/// Direct Form I history for one channel of one filter
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiquadHistory {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadHistory {
    #[inline]
    pub fn tick(&mut self, c: &BiquadCoeffs, x: f32) -> f32 {
        // y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Biquad filter shared between the control and real-time threads
///
/// The control thread calls [`prepare`](Self::prepare); the whole coefficient
/// set is published through an `AtomicCell`, so `process` always sees either
/// the old set or the new one. Concurrent `prepare` calls must be serialized
/// by the caller.
#[derive(Debug)]
pub struct BiquadFilter {
    band: EqBand,
    level: AtomicI32,
    coeffs: AtomicCell<BiquadCoeffs>,
}

impl BiquadFilter {
    /// Create an identity filter for `band`
    pub fn new(band: EqBand) -> Self {
        Self {
            band,
            level: AtomicI32::new(0),
            coeffs: AtomicCell::new(BiquadCoeffs::identity()),
        }
    }

    pub fn band(&self) -> EqBand {
        self.band
    }

    /// Level the current coefficients were designed for
    pub fn level(&self) -> i32 {
        self.level.load(Ordering::Acquire)
    }

    /// Snapshot of the current coefficient set
    pub fn coeffs(&self) -> BiquadCoeffs {
        self.coeffs.load()
    }

    /// Recompute coefficients for `level` at `sample_rate`
    pub fn prepare(&self, level: i32, sample_rate: u32) {
        let coeffs = self.band.coeffs_for_level(level, sample_rate);
        self.coeffs.store(coeffs);
        self.level.store(level, Ordering::Release);

        trace!(band = ?self.band, level, sample_rate, "Biquad prepared");
    }

    /// Filter `frames` interleaved frames of `buffer` in place
    ///
    /// `history` holds one entry per channel. It advances on every call,
    /// identity coefficients included.
    pub fn process(
        &self,
        buffer: &mut [f32],
        frames: usize,
        channels: usize,
        history: &mut [BiquadHistory],
    ) {
        if channels == 0 {
            return;
        }
        let coeffs = self.coeffs.load();

        let len = (frames * channels).min(buffer.len());
        for frame in buffer[..len].chunks_exact_mut(channels) {
            for (sample, state) in frame.iter_mut().zip(history.iter_mut()) {
                *sample = state.tick(&coeffs, *sample);
            }
        }
    }
}

// ============================================================================
// 3-BAND EQUALIZER
// ============================================================================

/// Per-channel filter history for all three bands, owned by a locked pipeline
#[derive(Debug, Clone, Default)]
pub struct EqualizerHistory {
    low: Vec<BiquadHistory>,
    mid: Vec<BiquadHistory>,
    high: Vec<BiquadHistory>,
}

impl EqualizerHistory {
    /// Zeroed history for `channels` channels
    pub fn with_channels(channels: usize) -> Result<Self> {
        Ok(Self {
            low: zeroed_history(channels)?,
            mid: zeroed_history(channels)?,
            high: zeroed_history(channels)?,
        })
    }

    pub fn channels(&self) -> usize {
        self.low.len()
    }

    pub fn reset(&mut self) {
        for state in self.low.iter_mut().chain(&mut self.mid).chain(&mut self.high) {
            state.reset();
        }
    }
}

fn zeroed_history(channels: usize) -> Result<Vec<BiquadHistory>> {
    let mut history = Vec::new();
    history
        .try_reserve_exact(channels)
        .map_err(|_| ApoError::OutOfMemory(channels * 4))?;
    history.resize(channels, BiquadHistory::default());
    Ok(history)
}

/// Fixed three-band equalizer: low shelf, mid peak, high shelf
///
/// Bands are processed in that order, in place.
#[derive(Debug)]
pub struct ThreeBandEqualizer {
    low: BiquadFilter,
    mid: BiquadFilter,
    high: BiquadFilter,
    sample_rate: AtomicU32,
}

impl Default for ThreeBandEqualizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreeBandEqualizer {
    pub fn new() -> Self {
        Self {
            low: BiquadFilter::new(EqBand::Low),
            mid: BiquadFilter::new(EqBand::Mid),
            high: BiquadFilter::new(EqBand::High),
            sample_rate: AtomicU32::new(params::DEFAULT_SAMPLE_RATE),
        }
    }

    pub fn filter(&self, band: EqBand) -> &BiquadFilter {
        match band {
            EqBand::Low => &self.low,
            EqBand::Mid => &self.mid,
            EqBand::High => &self.high,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    /// Re-prepare one band at the current design rate
    pub fn prepare(&self, band: EqBand, level: i32) {
        self.filter(band).prepare(level, self.sample_rate());
    }

    /// Switch the design rate, keeping every band's level
    pub fn set_sample_rate(&self, sample_rate: u32) {
        if sample_rate == 0 || sample_rate == self.sample_rate() {
            return;
        }
        self.sample_rate.store(sample_rate, Ordering::Release);
        for band in EqBand::ALL {
            let filter = self.filter(band);
            filter.prepare(filter.level(), sample_rate);
        }
    }

    /// Run low, mid, then high band over `frames` frames in place
    pub fn process(
        &self,
        buffer: &mut [f32],
        frames: usize,
        channels: usize,
        history: &mut EqualizerHistory,
    ) {
        self.low.process(buffer, frames, channels, &mut history.low);
        self.mid.process(buffer, frames, channels, &mut history.mid);
        self.high.process(buffer, frames, channels, &mut history.high);
    }
}

// ============================================================================
// GAIN STAGE
// ============================================================================

/// Static per-channel attenuation
pub mod gain {
    /// Gain for channel `channel` of `channels`: `1 - channel / channels`
    #[inline]
    pub fn ramp_coefficient(channel: usize, channels: usize) -> f32 {
        if channels == 0 {
            return 1.0;
        }
        let step = 1.0 / channels as f32;
        1.0 - step * channel as f32
    }

    /// Fill one coefficient per channel
    pub fn fill_coefficients(coefficients: &mut [f32]) {
        let channels = coefficients.len();
        for (channel, k) in coefficients.iter_mut().enumerate() {
            *k = ramp_coefficient(channel, channels);
        }
    }

    /// `output[f][c] = input[f][c] * k[c]` for the first `frames` frames
    pub fn apply(
        output: &mut [f32],
        input: &[f32],
        frames: usize,
        channels: usize,
        coefficients: &[f32],
    ) {
        if channels == 0 {
            return;
        }
        let len = (frames * channels).min(input.len()).min(output.len());
        for (out_frame, in_frame) in output[..len]
            .chunks_exact_mut(channels)
            .zip(input[..len].chunks_exact(channels))
        {
            for ((out, inp), k) in out_frame.iter_mut().zip(in_frame).zip(coefficients) {
                *out = inp * k;
            }
        }
    }

    /// In-place variant of [`apply`]
    pub fn apply_in_place(
        buffer: &mut [f32],
        frames: usize,
        channels: usize,
        coefficients: &[f32],
    ) {
        if channels == 0 {
            return;
        }
        let len = (frames * channels).min(buffer.len());
        for frame in buffer[..len].chunks_exact_mut(channels) {
            for (sample, k) in frame.iter_mut().zip(coefficients) {
                *sample *= k;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
