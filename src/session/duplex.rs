//! Full-duplex audio for one session
//!
//! Pairs the microphone capture loop (device to connection) with the
//! playback buffer (connection to speaker). No resampling happens here; the
//! input rate is negotiated once when the session starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::mpsc;

use super::shutdown::{CloseReason, Shutdown};
use super::transport::Outbound;
use crate::Result;
use crate::voice::{AudioDevice, InputStream, PlaybackBuffer, PlaybackConfig, StreamParams};

/// Microphone and speaker streams owned by one session
pub struct DuplexAudioChannel {
    input: Arc<dyn InputStream>,
    playback: Arc<PlaybackBuffer>,
    frames_sent: AtomicU64,
    released: AtomicBool,
}

impl DuplexAudioChannel {
    /// Open both streams and start the playback loop
    ///
    /// # Errors
    ///
    /// Returns error if either stream cannot be opened; nothing stays open
    pub fn open(
        device: &dyn AudioDevice,
        input_params: StreamParams,
        output_params: StreamParams,
        playback: PlaybackConfig,
    ) -> Result<Self> {
        let input = device.open_input(input_params)?;

        let output = match device.open_output(output_params) {
            Ok(output) => output,
            Err(e) => {
                input.close();
                return Err(e);
            }
        };

        let buffer = Arc::new(PlaybackBuffer::new(playback));
        if let Err(e) = buffer.start(Arc::clone(&output)) {
            input.close();
            output.close();
            return Err(e);
        }

        tracing::debug!(
            input_rate = input_params.sample_rate,
            chunk_size = input_params.chunk_size,
            output_rate = output_params.sample_rate,
            "duplex audio opened"
        );

        Ok(Self {
            input,
            playback: buffer,
            frames_sent: AtomicU64::new(0),
            released: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn playback(&self) -> Arc<PlaybackBuffer> {
        Arc::clone(&self.playback)
    }

    #[must_use]
    pub fn input_params(&self) -> StreamParams {
        self.input.params()
    }

    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Forward microphone frames to `outbound` in capture order until shutdown
    ///
    /// A read or send failure triggers session shutdown.
    pub async fn run_capture(&self, outbound: mpsc::Sender<Outbound>, shutdown: Shutdown) {
        let chunk = self.input.params().chunk_size;

        loop {
            let input = Arc::clone(&self.input);
            let read = tokio::task::spawn_blocking(move || input.read(chunk));

            let pcm = tokio::select! {
                biased;
                () = shutdown.fired() => break,
                result = read => result,
            };

            let pcm = match pcm {
                Ok(Ok(pcm)) => pcm,
                Ok(Err(e)) => {
                    if !shutdown.is_fired() {
                        tracing::error!(error = %e, "microphone read failed");
                        shutdown.trigger(CloseReason::Failed(format!("microphone read failed: {e}")));
                    }
                    break;
                }
                Err(e) => {
                    shutdown.trigger(CloseReason::Failed(format!("capture task failed: {e}")));
                    break;
                }
            };

            if outbound.send(Outbound::Audio(pcm)).await.is_err() {
                if !shutdown.is_fired() {
                    shutdown.trigger(CloseReason::Failed("connection writer stopped".to_string()));
                }
                break;
            }
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(frames = self.frames_sent(), "capture loop exited");
    }

    /// Close the microphone and stop playback; idempotent
    ///
    /// Closing the input unblocks a capture read still in flight.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        self.input.close();
        let playback = Arc::clone(&self.playback);
        if let Err(e) = tokio::task::spawn_blocking(move || playback.stop()).await {
            tracing::warn!(error = %e, "playback stop task failed");
        }
        tracing::debug!("duplex audio released");
    }
}
