//! Host audio through cpal
//!
//! cpal streams are not `Send`, so every opened stream lives on its own
//! thread and is dropped there when the handle is closed.

use std::sync::mpsc;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};

use super::capture::CpalInput;
use super::device::{AudioDevice, InputStream, OutputStream, StreamParams};
use super::speaker::CpalOutput;
use crate::{Error, Result};

/// Input rate assumed when the device does not report one
pub const FALLBACK_INPUT_RATE: u32 = 48000;

/// Audio device backed by the default cpal host
#[derive(Debug, Clone, Copy)]
pub struct CpalDevice {
    prefer_usb: bool,
}

/// One enumerated device, for the `devices` command
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub default_rate: Option<u32>,
    pub max_channels: u16,
}

impl CpalDevice {
    #[must_use]
    pub const fn new(prefer_usb: bool) -> Self {
        Self { prefer_usb }
    }

    /// Enumerate the host's input and output devices
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot enumerate devices
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let mut found = Vec::new();

        for device in host.input_devices().map_err(|e| Error::Audio(e.to_string()))? {
            let config = device.default_input_config().ok();
            found.push(DeviceInfo {
                name: device.name().unwrap_or_default(),
                is_input: true,
                is_output: false,
                default_rate: config.as_ref().map(|c| c.sample_rate().0),
                max_channels: config.map_or(0, |c| c.channels()),
            });
        }

        for device in host.output_devices().map_err(|e| Error::Audio(e.to_string()))? {
            let config = device.default_output_config().ok();
            found.push(DeviceInfo {
                name: device.name().unwrap_or_default(),
                is_input: false,
                is_output: true,
                default_rate: config.as_ref().map(|c| c.sample_rate().0),
                max_channels: config.map_or(0, |c| c.channels()),
            });
        }

        Ok(found)
    }
}

impl AudioDevice for CpalDevice {
    fn open_input(&self, params: StreamParams) -> Result<Arc<dyn InputStream>> {
        Ok(Arc::new(CpalInput::open(self.prefer_usb, params)?))
    }

    fn open_output(&self, params: StreamParams) -> Result<Arc<dyn OutputStream>> {
        Ok(Arc::new(CpalOutput::open(self.prefer_usb, params)?))
    }

    fn native_input_rate(&self) -> Result<u32> {
        let device = select_input(self.prefer_usb)?;
        match device.default_input_config() {
            Ok(config) => Ok(config.sample_rate().0),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback = FALLBACK_INPUT_RATE,
                    "could not detect native input rate"
                );
                Ok(FALLBACK_INPUT_RATE)
            }
        }
    }
}

fn first_usb(mut devices: impl Iterator<Item = cpal::Device>) -> Option<cpal::Device> {
    devices.find(|d| {
        let name = d.name().unwrap_or_default();
        tracing::debug!(device = %name, "found audio device");
        name.to_lowercase().contains("usb")
    })
}

/// Input device: first USB device if preferred and present, else the default
pub(super) fn select_input(prefer_usb: bool) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if prefer_usb
        && let Some(device) = host.input_devices().ok().and_then(first_usb)
    {
        tracing::debug!(device = device.name().unwrap_or_default(), "selected usb input");
        return Ok(device);
    }
    host.default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))
}

/// Output device: first USB device if preferred and present, else the default
pub(super) fn select_output(prefer_usb: bool) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if prefer_usb
        && let Some(device) = host.output_devices().ok().and_then(first_usb)
    {
        tracing::debug!(device = device.name().unwrap_or_default(), "selected usb output");
        return Ok(device);
    }
    host.default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))
}

/// Build a stream on a dedicated thread and keep it alive until the returned
/// sender is dropped
pub(super) fn spawn_stream_thread<F>(name: &str, build: F) -> Result<mpsc::Sender<()>>
where
    F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
    let (stop_tx, stop_rx) = mpsc::channel::<()>();

    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            // Returns once the handle sends or drops its sender
            let _ = stop_rx.recv();
            drop(stream);
        })?;

    ready_rx
        .recv()
        .map_err(|_| Error::Audio("audio stream thread exited".to_string()))??;
    Ok(stop_tx)
}
