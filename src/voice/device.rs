//! Audio device capability consumed by the wake word gate and voice sessions
//!
//! Components never reach for a global device manager; each one receives an
//! `Arc<dyn AudioDevice>` at construction. Only one holder reads the input
//! device at a time, handed over through the gate's pause/resume.

use std::sync::Arc;

use super::frame::AudioFormat;
use crate::Result;

/// Parameters of one opened PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel in one frame
    pub chunk_size: usize,
}

impl StreamParams {
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u16, chunk_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            chunk_size,
        }
    }

    /// Linear16 format of frames on this stream
    #[must_use]
    pub const fn format(&self) -> AudioFormat {
        AudioFormat::linear16(self.sample_rate, self.channels)
    }

    /// Bytes in one full frame
    #[must_use]
    pub const fn frame_bytes(&self) -> usize {
        self.format().frame_bytes(self.chunk_size)
    }
}

/// Blocking PCM capture stream
///
/// `close` may be called from any thread and must unblock a pending `read`.
pub trait InputStream: Send + Sync {
    fn params(&self) -> StreamParams;

    /// Block until `samples` samples per channel are available
    ///
    /// # Errors
    ///
    /// Returns error if the stream is closed or the device fails
    fn read(&self, samples: usize) -> Result<Vec<u8>>;

    /// Release the device; idempotent
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Blocking PCM playback stream
pub trait OutputStream: Send + Sync {
    fn params(&self) -> StreamParams;

    /// Hand linear16 bytes to the device, blocking while its backlog is full
    ///
    /// # Errors
    ///
    /// Returns error if the stream is closed or the device fails
    fn write(&self, pcm: &[u8]) -> Result<()>;

    /// Release the device; idempotent
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Capability to open PCM streams on the host's audio hardware
pub trait AudioDevice: Send + Sync {
    /// Open a capture stream
    ///
    /// # Errors
    ///
    /// Returns error if the input device is unavailable
    fn open_input(&self, params: StreamParams) -> Result<Arc<dyn InputStream>>;

    /// Open a playback stream
    ///
    /// # Errors
    ///
    /// Returns error if the output device is unavailable
    fn open_output(&self, params: StreamParams) -> Result<Arc<dyn OutputStream>>;

    /// Native sample rate of the selected input device
    ///
    /// # Errors
    ///
    /// Returns error if no input device is present
    fn native_input_rate(&self) -> Result<u32>;
}
