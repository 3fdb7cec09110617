//! Speaker output through cpal

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use super::cpal_device::{select_output, spawn_stream_thread};
use super::device::{OutputStream, StreamParams};
use super::frame::{i16_to_f32, pcm16_to_samples};
use crate::{Error, Result};

/// Device-side backlog above which `write` blocks
const HIGH_WATER: Duration = Duration::from_millis(200);

const WRITE_POLL: Duration = Duration::from_millis(20);

#[derive(Default)]
struct Pending {
    samples: VecDeque<i16>,
    closed: bool,
}

struct Shared {
    pending: Mutex<Pending>,
    drained: Condvar,
}

impl Shared {
    /// Fill one device buffer; mono sources are duplicated across device channels
    fn fill(&self, data: &mut [f32], source_channels: usize, device_channels: usize) {
        let Ok(mut pending) = self.pending.lock() else {
            data.fill(0.0);
            return;
        };

        for frame in data.chunks_mut(device_channels) {
            if source_channels == device_channels {
                for out in frame.iter_mut() {
                    *out = pending.samples.pop_front().map_or(0.0, i16_to_f32);
                }
            } else {
                let sample = pending.samples.pop_front().map_or(0.0, i16_to_f32);
                frame.fill(sample);
            }
        }
        drop(pending);
        self.drained.notify_all();
    }
}

/// Open speaker stream
pub struct CpalOutput {
    params: StreamParams,
    shared: Arc<Shared>,
    high_water: usize,
    stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalOutput {
    /// Start a playback stream at `params`
    ///
    /// Falls back to a stereo device stream when mono is rejected.
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available or no stream can be built
    pub fn open(prefer_usb: bool, params: StreamParams) -> Result<Self> {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Pending::default()),
            drained: Condvar::new(),
        });

        let callback_shared = Arc::clone(&shared);
        let stop = spawn_stream_thread("speaker", move || {
            let device = select_output(prefer_usb)?;
            let source_channels = usize::from(params.channels);

            let mut attempts = vec![params.channels];
            if params.channels == 1 {
                attempts.push(2);
            }

            let mut last_error = None;
            for channels in attempts {
                let config = StreamConfig {
                    channels,
                    sample_rate: SampleRate(params.sample_rate),
                    buffer_size: BufferSize::Default,
                };
                let device_channels = usize::from(channels);
                let shared = Arc::clone(&callback_shared);

                match device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        shared.fill(data, source_channels, device_channels);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                ) {
                    Ok(stream) => {
                        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
                        tracing::debug!(
                            device = device.name().unwrap_or_default(),
                            sample_rate = params.sample_rate,
                            channels,
                            "audio playback started"
                        );
                        return Ok(stream);
                    }
                    Err(e) => {
                        tracing::debug!(channels, error = %e, "output config rejected");
                        last_error = Some(e);
                    }
                }
            }

            Err(Error::Audio(last_error.map_or_else(
                || "no suitable output config found".to_string(),
                |e| e.to_string(),
            )))
        })?;

        #[allow(clippy::cast_possible_truncation)]
        let high_water = (u128::from(params.sample_rate)
            * u128::from(params.channels)
            * HIGH_WATER.as_millis()
            / 1000) as usize;

        Ok(Self {
            params,
            shared,
            high_water,
            stop: Mutex::new(Some(stop)),
        })
    }
}

impl OutputStream for CpalOutput {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn write(&self, pcm: &[u8]) -> Result<()> {
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.closed {
            return Err(Error::Audio("output stream closed".to_string()));
        }
        pending.samples.extend(pcm16_to_samples(pcm));

        while pending.samples.len() > self.high_water && !pending.closed {
            pending = self
                .shared
                .drained
                .wait_timeout(pending, WRITE_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(())
    }

    fn close(&self) {
        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if pending.closed {
                return;
            }
            pending.closed = true;
            pending.samples.clear();
        }
        self.shared.drained.notify_all();

        self.stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!("audio playback stopped");
    }

    fn is_closed(&self) -> bool {
        self.shared
            .pending
            .lock()
            .map(|p| p.closed)
            .unwrap_or(true)
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}
