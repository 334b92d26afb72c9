//! Frame-level buffer helpers used on the real-time path
//!
//! Both helpers clamp to the slices they are given, so a frame count that
//! overstates the buffer never panics.

/// Write zeros over the first `frames` interleaved frames
#[inline]
pub fn write_silence(buffer: &mut [f32], frames: usize, channels: usize) {
    let len = (frames * channels).min(buffer.len());
    buffer[..len].fill(0.0);
}

/// Copy the first `frames` interleaved frames of `src` into `dst`
#[inline]
pub fn copy_frames(dst: &mut [f32], src: &[f32], frames: usize, channels: usize) {
    let len = (frames * channels).min(src.len()).min(dst.len());
    dst[..len].copy_from_slice(&src[..len]);
}
