//! Microphone capture through cpal

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};

use super::cpal_device::{select_input, spawn_stream_thread};
use super::device::{InputStream, StreamParams};
use super::frame::{f32_to_i16, samples_to_pcm16};
use crate::{Error, Result};

/// Captured audio kept before the oldest samples are discarded
const MAX_BACKLOG: Duration = Duration::from_secs(2);

/// Wake interval of a blocked `read`
const READ_POLL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Captured {
    samples: VecDeque<i16>,
    closed: bool,
}

struct Shared {
    captured: Mutex<Captured>,
    ready: Condvar,
    max_backlog: usize,
}

impl Shared {
    fn push(&self, data: &[f32]) {
        let Ok(mut captured) = self.captured.lock() else {
            return;
        };
        captured.samples.extend(data.iter().copied().map(f32_to_i16));
        let excess = captured.samples.len().saturating_sub(self.max_backlog);
        if excess > 0 {
            captured.samples.drain(..excess);
        }
        drop(captured);
        self.ready.notify_all();
    }
}

/// Open microphone stream
pub struct CpalInput {
    params: StreamParams,
    shared: Arc<Shared>,
    stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalInput {
    /// Start capturing at `params`
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or the stream cannot
    /// be built at the requested rate
    pub fn open(prefer_usb: bool, params: StreamParams) -> Result<Self> {
        #[allow(clippy::cast_possible_truncation)]
        let max_backlog = (u64::from(params.sample_rate)
            * u64::from(params.channels)
            * MAX_BACKLOG.as_secs()) as usize;

        let shared = Arc::new(Shared {
            captured: Mutex::new(Captured::default()),
            ready: Condvar::new(),
            max_backlog,
        });

        let callback_shared = Arc::clone(&shared);
        let stop = spawn_stream_thread("mic-capture", move || {
            let device = select_input(prefer_usb)?;
            let config = StreamConfig {
                channels: params.channels,
                sample_rate: SampleRate(params.sample_rate),
                buffer_size: BufferSize::Default,
            };

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        callback_shared.push(data);
                    },
                    |err| {
                        tracing::error!(error = %err, "audio capture error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?;

            stream.play().map_err(|e| Error::Audio(e.to_string()))?;
            tracing::debug!(
                device = device.name().unwrap_or_default(),
                sample_rate = params.sample_rate,
                channels = params.channels,
                "audio capture started"
            );
            Ok(stream)
        })?;

        Ok(Self {
            params,
            shared,
            stop: Mutex::new(Some(stop)),
        })
    }
}

impl InputStream for CpalInput {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn read(&self, samples: usize) -> Result<Vec<u8>> {
        let wanted = samples * usize::from(self.params.channels);
        let mut captured = self
            .shared
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if captured.closed {
                return Err(Error::Audio("input stream closed".to_string()));
            }
            if captured.samples.len() >= wanted {
                break;
            }
            captured = self
                .shared
                .ready
                .wait_timeout(captured, READ_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let frame: Vec<i16> = captured.samples.drain(..wanted).collect();
        Ok(samples_to_pcm16(&frame))
    }

    fn close(&self) {
        {
            let mut captured = self
                .shared
                .captured
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if captured.closed {
                return;
            }
            captured.closed = true;
            captured.samples.clear();
        }
        self.shared.ready.notify_all();

        // Dropping the sender ends the stream thread
        self.stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!("audio capture stopped");
    }

    fn is_closed(&self) -> bool {
        self.shared
            .captured
            .lock()
            .map(|c| c.closed)
            .unwrap_or(true)
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}
