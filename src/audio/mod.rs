//! Audio capture: microphone → mono → 16 kHz → fixed PCM16 frames.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → stereo_to_mono
//!           → FrameResampler (rubato, 1024-sample frames) → pcm16_le_bytes → ChunkSink
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sentio_wakeword::audio::{AudioSource, CaptureParams, MicrophoneCapture};
//!
//! # async fn example() {
//! let mut capture = MicrophoneCapture::new(
//!     CaptureParams::default(),
//!     Box::new(|frame: Vec<u8>| println!("{} bytes", frame.len())),
//! );
//! capture.start().await.unwrap();
//! tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//! capture.stop();
//! # }
//! ```

pub mod capture;
pub mod resample;

pub use capture::{
    AudioSource, AudioSourceFactory, CaptureError, CaptureParams, ChunkSink, MicrophoneCapture,
    MicrophoneCaptureFactory,
};
pub use resample::{pcm16_le_bytes, stereo_to_mono, FrameResampler, ResampleError};
