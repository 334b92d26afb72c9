//! Lock/unlock lifecycle of the processing stage
//!
//! `lock` validates the negotiated formats and acquires everything the real-time
//! path needs; `unlock` releases it. The real-time path never allocates, so every
//! buffer it touches is owned by [`LockedResources`].

use crate::domain::audio::{ApoError, AudioFormat, Result, SampleFormat};
use crate::domain::dsp::{gain, EqualizerHistory};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Allocator for buffers handed to the real-time path
///
/// Kept separate from ordinary setup allocation so hosts can back it with a
/// pre-reserved or locked memory pool.
pub trait RealtimeAllocator: Send + Sync {
    /// Allocate `len` zeroed samples
    fn allocate(&self, len: usize) -> Result<Box<[f32]>>;
}

/// Plain heap allocator that reports failure instead of aborting
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl RealtimeAllocator for HeapAllocator {
    fn allocate(&self, len: usize) -> Result<Box<[f32]>> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| ApoError::OutOfMemory(len))?;
        buffer.resize(len, 0.0);
        Ok(buffer.into_boxed_slice())
    }
}

/// One gain multiplier per channel, fixed for the duration of a lock
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientBuffer(Box<[f32]>);

impl CoefficientBuffer {
    /// Allocate and fill the gain ramp for `channels` channels
    pub fn for_channels(allocator: &dyn RealtimeAllocator, channels: usize) -> Result<Self> {
        let mut coefficients = allocator.allocate(channels)?;
        gain::fill_coefficients(&mut coefficients);
        Ok(Self(coefficients))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything acquired by a successful `lock`
#[derive(Debug)]
pub struct LockedResources {
    pub format: AudioFormat,
    pub coefficients: CoefficientBuffer,
    pub history: EqualizerHistory,
}

#[derive(Debug, Default)]
enum LockState {
    #[default]
    Unlocked,
    Locked(LockedResources),
}

/// Unlocked → Locked → Unlocked state machine
pub struct LifecycleManager {
    allocator: Arc<dyn RealtimeAllocator>,
    state: LockState,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    pub fn new(allocator: Arc<dyn RealtimeAllocator>) -> Self {
        Self {
            allocator,
            state: LockState::Unlocked,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.state, LockState::Locked(_))
    }

    /// Check that a connection pair can be processed
    pub fn validate_formats(input: &AudioFormat, output: &AudioFormat) -> Result<()> {
        if input.sample_rate.hz() != output.sample_rate.hz() {
            return Err(ApoError::FormatMismatch(format!(
                "frame rate {} Hz in, {} Hz out",
                input.sample_rate.hz(),
                output.sample_rate.hz()
            )));
        }
        if input.channels.count() != output.channels.count() {
            return Err(ApoError::FormatMismatch(format!(
                "{} channels in, {} channels out",
                input.channels.count(),
                output.channels.count()
            )));
        }
        if input.channels.count() == 0 {
            return Err(ApoError::FormatMismatch("zero channels".to_string()));
        }
        if input.sample_format != SampleFormat::F32 || output.sample_format != SampleFormat::F32 {
            return Err(ApoError::FormatMismatch(format!(
                "{:?} in, {:?} out; only 32-bit float is supported",
                input.sample_format, output.sample_format
            )));
        }
        Ok(())
    }

    /// Validate formats and acquire the real-time resources
    ///
    /// On any error the manager stays unlocked and retains nothing.
    #[instrument(skip(self))]
    pub fn lock(&mut self, input: &AudioFormat, output: &AudioFormat) -> Result<()> {
        if self.is_locked() {
            warn!("Lock requested while already locked");
            return Err(ApoError::AlreadyLocked);
        }
        Self::validate_formats(input, output)?;

        let channels = input.samples_per_frame();
        let coefficients = CoefficientBuffer::for_channels(self.allocator.as_ref(), channels)?;
        let history = EqualizerHistory::with_channels(channels)?;

        info!(
            sample_rate = input.sample_rate.hz(),
            channels,
            coefficients = ?coefficients.as_slice(),
            "Locked for processing"
        );

        self.state = LockState::Locked(LockedResources {
            format: *input,
            coefficients,
            history,
        });
        Ok(())
    }

    /// Release everything `lock` acquired
    ///
    /// Returns whether anything was released; unlocking twice is harmless.
    #[instrument(skip(self))]
    pub fn unlock(&mut self) -> bool {
        match std::mem::take(&mut self.state) {
            LockState::Locked(resources) => {
                debug!(channels = resources.coefficients.len(), "Unlocked");
                true
            }
            LockState::Unlocked => false,
        }
    }

    pub fn resources(&self) -> Option<&LockedResources> {
        match &self.state {
            LockState::Locked(resources) => Some(resources),
            LockState::Unlocked => None,
        }
    }

    pub fn resources_mut(&mut self) -> Option<&mut LockedResources> {
        match &mut self.state {
            LockState::Locked(resources) => Some(resources),
            LockState::Unlocked => None,
        }
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audio::{ChannelCount, SampleRate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every request
    struct ExhaustedAllocator;

    impl RealtimeAllocator for ExhaustedAllocator {
        fn allocate(&self, len: usize) -> Result<Box<[f32]>> {
            Err(ApoError::OutOfMemory(len))
        }
    }

    #[derive(Default)]
    struct CountingAllocator(AtomicUsize);

    impl RealtimeAllocator for CountingAllocator {
        fn allocate(&self, len: usize) -> Result<Box<[f32]>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            HeapAllocator.allocate(len)
        }
    }

    fn manager() -> LifecycleManager {
        LifecycleManager::new(Arc::new(HeapAllocator))
    }

    #[test]
    fn test_heap_allocator_zeroes() {
        let buffer = HeapAllocator.allocate(16).unwrap();
        assert_eq!(buffer.len(), 16);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_lock_stereo_coefficients() {
        let mut lifecycle = manager();
        let format = AudioFormat::float32(48000, 2);

        lifecycle.lock(&format, &format).unwrap();
        let resources = lifecycle.resources().unwrap();
        assert_eq!(resources.coefficients.as_slice(), &[1.0, 0.5]);
        assert_eq!(resources.history.channels(), 2);
        assert!(lifecycle.is_locked());
    }

    #[test]
    fn test_lock_mono_coefficient_is_unity() {
        let mut lifecycle = manager();
        let format = AudioFormat::float32(44100, 1);

        lifecycle.lock(&format, &format).unwrap();
        assert_eq!(lifecycle.resources().unwrap().coefficients.as_slice(), &[1.0]);
    }

    #[test]
    fn test_lock_rejects_rate_mismatch() {
        let mut lifecycle = manager();
        let input = AudioFormat::float32(48000, 2);
        let output = AudioFormat::float32(44100, 2);

        assert!(matches!(
            lifecycle.lock(&input, &output),
            Err(ApoError::FormatMismatch(_))
        ));
        assert!(!lifecycle.is_locked());
    }

    #[test]
    fn test_lock_rejects_channel_mismatch() {
        let mut lifecycle = manager();
        let input = AudioFormat::float32(48000, 2);
        let output = AudioFormat {
            channels: ChannelCount::Mono,
            ..input
        };

        assert!(matches!(
            lifecycle.lock(&input, &output),
            Err(ApoError::FormatMismatch(_))
        ));
    }

    #[test]
    fn test_lock_rejects_non_float() {
        let mut lifecycle = manager();
        let input = AudioFormat {
            sample_rate: SampleRate::Hz48000,
            channels: ChannelCount::Stereo,
            sample_format: SampleFormat::I16,
        };

        assert!(matches!(
            lifecycle.lock(&input, &input),
            Err(ApoError::FormatMismatch(_))
        ));
        assert!(lifecycle.resources().is_none());
    }

    #[test]
    fn test_lock_out_of_memory_stays_unlocked() {
        let mut lifecycle = LifecycleManager::new(Arc::new(ExhaustedAllocator));
        let format = AudioFormat::default();

        assert_eq!(
            lifecycle.lock(&format, &format).unwrap_err(),
            ApoError::OutOfMemory(2)
        );
        assert!(!lifecycle.is_locked());
    }

    #[test]
    fn test_double_lock_rejected() {
        let mut lifecycle = manager();
        let format = AudioFormat::default();

        lifecycle.lock(&format, &format).unwrap();
        assert_eq!(
            lifecycle.lock(&format, &format).unwrap_err(),
            ApoError::AlreadyLocked
        );
        assert!(lifecycle.is_locked());
    }

    #[test]
    fn test_unlock_is_idempotent() {
        let mut lifecycle = manager();
        let format = AudioFormat::default();

        assert!(!lifecycle.unlock());
        lifecycle.lock(&format, &format).unwrap();
        assert!(lifecycle.unlock());
        assert!(!lifecycle.unlock());
        assert!(!lifecycle.is_locked());
    }

    #[test]
    fn test_one_allocation_per_lock_cycle() {
        let allocator = Arc::new(CountingAllocator::default());
        let mut lifecycle = LifecycleManager::new(allocator.clone());
        let format = AudioFormat::float32(48000, 2);

        lifecycle.lock(&format, &format).unwrap();
        let first = lifecycle.resources().unwrap().coefficients.clone();
        lifecycle.unlock();
        lifecycle.lock(&format, &format).unwrap();
        let second = lifecycle.resources().unwrap().coefficients.clone();

        assert_eq!(first, second);
        assert_eq!(allocator.0.load(Ordering::SeqCst), 2);
    }
}
