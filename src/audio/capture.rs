//! Microphone capture via `cpal`.
//!
//! [`MicrophoneCapture`] opens the default input device and delivers fixed
//! frames of mono PCM16 bytes to a caller-supplied [`ChunkSink`].  cpal
//! streams are not `Send` on every platform, so the stream lives on its own
//! thread for the whole session.  `start()` awaits that thread's report
//! that the stream is playing (or why it is not) without blocking the
//! runtime, and `stop()` tells it to drop the stream and joins it.

use std::sync::mpsc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::audio::resample::{pcm16_le_bytes, stereo_to_mono, FrameResampler, ResampleError};
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// CaptureParams / ChunkSink
// ---------------------------------------------------------------------------

/// Output format requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per delivered frame.
    pub frame_size: usize,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

impl From<&AudioConfig> for CaptureParams {
    fn from(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frame_size: config.frame_size,
        }
    }
}

/// Receives each PCM16 little-endian frame, in capture order.
pub type ChunkSink = Box<dyn FnMut(Vec<u8>) + Send + 'static>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running the audio capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("only mono capture is supported (requested {0} channels)")]
    UnsupportedChannels(u16),

    #[error("frame size must be greater than zero")]
    InvalidFrameSize,

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error("capture already started")]
    AlreadyStarted,

    #[error("capture thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// AudioSource trait
// ---------------------------------------------------------------------------

/// A startable, stoppable audio producer owned by one listening session.
#[async_trait]
pub trait AudioSource: Send {
    /// Begin delivering frames to the sink.  Resolves once the device is
    /// open (or failed to open).
    async fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop delivering frames and release the device.  Idempotent.
    fn stop(&mut self);
}

/// Creates one [`AudioSource`] per listening session.
pub trait AudioSourceFactory: Send + Sync {
    fn create(&self, params: CaptureParams, sink: ChunkSink) -> Box<dyn AudioSource>;
}

// ---------------------------------------------------------------------------
// MicrophoneCapture
// ---------------------------------------------------------------------------

struct CaptureWorker {
    stop_tx: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Default-input-device capture built on top of `cpal`.
pub struct MicrophoneCapture {
    params: CaptureParams,
    sink: Option<ChunkSink>,
    worker: Option<CaptureWorker>,
}

impl MicrophoneCapture {
    pub fn new(params: CaptureParams, sink: ChunkSink) -> Self {
        Self {
            params,
            sink: Some(sink),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

#[async_trait]
impl AudioSource for MicrophoneCapture {
    async fn start(&mut self) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyStarted);
        }
        if self.params.channels != 1 {
            return Err(CaptureError::UnsupportedChannels(self.params.channels));
        }
        if self.params.frame_size == 0 {
            return Err(CaptureError::InvalidFrameSize);
        }
        let sink = self.sink.take().ok_or(CaptureError::AlreadyStarted)?;

        let params = self.params;
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("wakeword-capture".into())
            .spawn(move || match open_stream(params, sink) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until stop() sends or drops the sender.
                    let _ = stop_rx.recv();
                    drop(stream);
                    log::debug!("capture: stream released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                log::info!(
                    "capture: started ({} Hz, {} ch, {} samples/frame)",
                    params.sample_rate,
                    params.channels,
                    params.frame_size
                );
                self.worker = Some(CaptureWorker { stop_tx, thread });
                Ok(())
            }
            // The thread has already returned; joining does not wait on the device.
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Thread("capture thread exited during start".into()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.thread.join().is_err() {
                log::warn!("capture: thread panicked during shutdown");
            }
            log::info!("capture: stopped");
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Open the default input device and start a stream feeding `sink`.
fn open_stream(params: CaptureParams, mut sink: ChunkSink) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

    let supported = device.default_input_config()?;
    let native_channels = supported.channels();
    let native_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    log::debug!("capture: device format {native_rate} Hz, {native_channels} ch");

    let mut resampler = FrameResampler::new(native_rate, params.sample_rate, params.frame_size)?;

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            let mono = stereo_to_mono(data, native_channels);
            resampler.push(&mono, |frame| sink(pcm16_le_bytes(frame)));
        },
        |err: cpal::StreamError| {
            log::error!("cpal stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    Ok(stream)
}

/// Factory handing out [`MicrophoneCapture`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrophoneCaptureFactory;

impl AudioSourceFactory for MicrophoneCaptureFactory {
    fn create(&self, params: CaptureParams, sink: ChunkSink) -> Box<dyn AudioSource> {
        Box::new(MicrophoneCapture::new(params, sink))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn discard() -> ChunkSink {
        Box::new(|_| {})
    }

    #[test]
    fn default_params_are_16k_mono_1024() {
        let params = CaptureParams::default();
        assert_eq!(params.sample_rate, 16_000);
        assert_eq!(params.channels, 1);
        assert_eq!(params.frame_size, 1024);
    }

    #[tokio::test]
    async fn stereo_output_is_rejected_before_touching_the_device() {
        let params = CaptureParams {
            channels: 2,
            ..CaptureParams::default()
        };
        let mut capture = MicrophoneCapture::new(params, discard());
        assert!(matches!(
            capture.start().await,
            Err(CaptureError::UnsupportedChannels(2))
        ));
        assert!(!capture.is_running());
    }

    #[tokio::test]
    async fn zero_frame_size_is_rejected() {
        let params = CaptureParams {
            frame_size: 0,
            ..CaptureParams::default()
        };
        let mut capture = MicrophoneCapture::new(params, discard());
        assert!(matches!(
            capture.start().await,
            Err(CaptureError::InvalidFrameSize)
        ));
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let mut capture = MicrophoneCapture::new(CaptureParams::default(), discard());
        capture.stop();
        capture.stop();
        assert!(!capture.is_running());
    }

    #[test]
    fn capture_source_is_object_safe_and_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Box<dyn AudioSource>>();
        let source: Box<dyn AudioSource> =
            MicrophoneCaptureFactory.create(CaptureParams::default(), discard());
        drop(source);
    }
}
