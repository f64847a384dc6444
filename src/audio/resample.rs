//! Channel mixing, streaming resampling and sample-format conversion.
//!
//! The ASR backend expects **mono PCM16 little-endian** audio at the
//! configured rate (16 kHz), cut into frames of a fixed sample count.
//! Microphones rarely deliver that directly, so each cpal buffer goes
//! through:
//!
//! 1. [`stereo_to_mono`]: average interleaved channels.
//! 2. [`FrameResampler::push`]: convert the device rate to the target rate
//!    with `rubato` and release fixed-size frames.
//! 3. [`pcm16_le_bytes`]: clamp and quantise `f32` to `i16` bytes.
//!
//! The resampler keeps its state across callbacks, so the output rate is
//! exact over a whole session however the driver sizes its buffers.

use rubato::{FftFixedIn, Resampler};
use thiserror::Error;

/// Preferred resampler input block.  Rounded up to a whole number of
/// rate-ratio units so every block yields the same output length.
const RESAMPLER_CHUNK_SIZE: usize = 1024;

// ---------------------------------------------------------------------------
// stereo_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// `channels == 1` copies the input; `channels == 0` yields an empty vector.
///
/// ```rust
/// use sentio_wakeword::audio::stereo_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = stereo_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn stereo_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// FrameResampler
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("sample rates must be non-zero (got {input} Hz -> {output} Hz)")]
    InvalidRate { input: u32, output: u32 },

    #[error("frame size must be greater than zero")]
    InvalidFrameSize,

    #[error("failed to build resampler: {0}")]
    Setup(#[from] rubato::ResamplerConstructionError),
}

/// Streaming mono resampler that emits fixed-size frames.
///
/// Input arrives in whatever block sizes the driver uses; it is buffered
/// into resampler blocks, and the output is buffered again into frames of
/// exactly `frame_size` samples.  Equal rates skip `rubato` entirely.
///
/// ```rust
/// use sentio_wakeword::audio::FrameResampler;
///
/// let mut frames = Vec::new();
/// let mut resampler = FrameResampler::new(16_000, 16_000, 4).unwrap();
/// resampler.push(&[0.1, 0.2, 0.3], |f| frames.push(f.to_vec()));
/// assert!(frames.is_empty());
/// resampler.push(&[0.4, 0.5], |f| frames.push(f.to_vec()));
/// assert_eq!(frames, vec![vec![0.1, 0.2, 0.3, 0.4]]);
/// assert_eq!(resampler.pending(), 1);
/// ```
pub struct FrameResampler {
    resampler: Option<FftFixedIn<f32>>,
    chunk_in: usize,
    in_buf: Vec<f32>,
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameResampler {
    pub fn new(input_rate: u32, output_rate: u32, frame_size: usize) -> Result<Self, ResampleError> {
        if input_rate == 0 || output_rate == 0 {
            return Err(ResampleError::InvalidRate {
                input: input_rate,
                output: output_rate,
            });
        }
        if frame_size == 0 {
            return Err(ResampleError::InvalidFrameSize);
        }

        let (resampler, chunk_in) = if input_rate == output_rate {
            (None, 0)
        } else {
            let chunk_in = block_size(input_rate, output_rate);
            let resampler = FftFixedIn::<f32>::new(
                input_rate as usize,
                output_rate as usize,
                chunk_in,
                1,
                1,
            )?;
            (Some(resampler), chunk_in)
        };

        Ok(Self {
            resampler,
            chunk_in,
            in_buf: Vec::with_capacity(chunk_in),
            frame_size,
            pending: Vec::with_capacity(frame_size),
        })
    }

    /// Feed mono samples at the input rate.  `emit` is called once per
    /// completed frame, oldest first.
    pub fn push(&mut self, mut src: &[f32], mut emit: impl FnMut(&[f32])) {
        let Some(resampler) = self.resampler.as_mut() else {
            emit_frames(&mut self.pending, self.frame_size, src, &mut emit);
            return;
        };

        while !src.is_empty() {
            let take = (self.chunk_in - self.in_buf.len()).min(src.len());
            self.in_buf.extend_from_slice(&src[..take]);
            src = &src[take..];

            if self.in_buf.len() == self.chunk_in {
                match resampler.process(&[&self.in_buf[..]], None) {
                    Ok(out) => {
                        if let Some(channel) = out.first() {
                            emit_frames(&mut self.pending, self.frame_size, channel, &mut emit);
                        }
                    }
                    Err(e) => log::warn!("resample: dropping {} samples: {e}", self.chunk_in),
                }
                self.in_buf.clear();
            }
        }
    }

    /// Output samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Smallest multiple of `input / gcd(input, output)` that is at least
/// [`RESAMPLER_CHUNK_SIZE`].
fn block_size(input_rate: u32, output_rate: u32) -> usize {
    let unit = (input_rate / gcd(input_rate, output_rate)) as usize;
    RESAMPLER_CHUNK_SIZE.div_ceil(unit) * unit
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn emit_frames(
    pending: &mut Vec<f32>,
    frame_size: usize,
    mut data: &[f32],
    emit: &mut impl FnMut(&[f32]),
) {
    while !data.is_empty() {
        let take = (frame_size - pending.len()).min(data.len());
        pending.extend_from_slice(&data[..take]);
        data = &data[take..];

        if pending.len() == frame_size {
            emit(pending.as_slice());
            pending.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// pcm16_le_bytes
// ---------------------------------------------------------------------------

/// Quantise `[-1.0, 1.0]` samples to little-endian signed 16-bit PCM.
/// Out-of-range input is clamped.
pub fn pcm16_le_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            v.to_le_bytes()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Push `seconds` of a constant signal at `rate` in driver-sized
    /// buffers; return every emitted frame.
    fn run(rate: u32, seconds: usize, buffer: usize, frame_size: usize) -> Vec<Vec<f32>> {
        let mut resampler = FrameResampler::new(rate, 16_000, frame_size).unwrap();
        let input = vec![0.5_f32; rate as usize * seconds];
        let mut frames = Vec::new();
        for block in input.chunks(buffer) {
            resampler.push(block, |f| frames.push(f.to_vec()));
        }
        frames
    }

    #[test]
    fn mono_input_is_copied() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(stereo_to_mono(&input, 1), input);
    }

    #[test]
    fn zero_channels_yields_nothing() {
        assert!(stereo_to_mono(&[1.0_f32, 2.0], 0).is_empty());
    }

    #[test]
    fn incomplete_trailing_frame_is_ignored() {
        let out = stereo_to_mono(&[0.2_f32, 0.4, 0.9], 2);
        assert_eq!(out.len(), 1);
        assert!((out[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn block_size_is_a_whole_number_of_ratio_units() {
        // 44.1k:16k reduces to 441:160.
        assert_eq!(block_size(44_100, 16_000), 1_323);
        // 48k:16k reduces to 3:1.
        assert_eq!(block_size(48_000, 16_000), 1_026);
        assert_eq!(gcd(44_100, 16_000), 100);
    }

    #[test]
    fn equal_rates_only_reframe() {
        let frames = run(16_000, 1, 512, 1_024);
        // 16 000 = 15 * 1024 + 640 pending.
        assert_eq!(frames.len(), 15);
        assert!(frames.iter().all(|f| f.len() == 1_024 && f.iter().all(|&s| s == 0.5)));
    }

    #[test]
    fn frames_keep_order_across_pushes() {
        let mut resampler = FrameResampler::new(16_000, 16_000, 3).unwrap();
        let mut out = Vec::new();
        for chunk in [[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0], [7.0, 8.0]] {
            resampler.push(&chunk, |f| out.push(f.to_vec()));
        }
        assert_eq!(out, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(resampler.pending(), 2);
    }

    #[test]
    fn one_second_at_44k1_never_overshoots_16k() {
        let frames = run(44_100, 1, 512, 160);
        let produced = frames.len() * 160;
        // At most one resampler block (480 output samples) is still buffered.
        assert!(produced <= 16_000, "produced {produced}");
        assert!(produced >= 16_000 - 480, "produced {produced}");
    }

    #[test]
    fn long_session_at_44k1_has_no_drift() {
        // 60 s = 2000 whole resampler blocks of 1323 input samples.
        let frames = run(44_100, 60, 512, 160);
        assert_eq!(frames.len() * 160, 60 * 16_000);
        assert!(frames.iter().all(|f| f.len() == 160));
    }

    #[test]
    fn downsampling_48k_keeps_amplitude() {
        let frames = run(48_000, 3, 480, 160);
        let samples: Vec<f32> = frames.concat();
        // Skip the filter's start-up transient.
        for &s in &samples[samples.len() / 2..] {
            assert!((s - 0.5).abs() < 0.02, "amplitude drift: {s}");
        }
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(
            FrameResampler::new(0, 16_000, 1024),
            Err(ResampleError::InvalidRate { .. })
        ));
        assert!(matches!(
            FrameResampler::new(44_100, 16_000, 0),
            Err(ResampleError::InvalidFrameSize)
        ));
    }

    #[test]
    fn pcm16_encoding_is_little_endian_and_clamped() {
        let bytes = pcm16_le_bytes(&[0.0, 1.0, -1.0, 2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[6], bytes[7]]), i16::MAX);
    }
}
