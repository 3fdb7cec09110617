//! Wake word gate
//!
//! Scans microphone frames for a keyword. On a match the gate releases the
//! microphone, emits a [`WakeEvent`] and waits until the event is completed
//! before reacquiring the device and scanning again. Exactly one of the gate
//! and the session it started reads the input device at any time.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::device::{AudioDevice, InputStream, StreamParams};
use super::frame::pcm16_to_samples;
use super::wake_word::KeywordDetector;
use crate::Result;

/// Observable gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// Not scanning; the loop has not started or has stopped
    Idle,
    /// Holding the microphone and scanning frames
    Listening,
    /// Microphone released
    Paused,
    /// Microphone lost after a device error; the loop keeps reopening it
    Reopening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Pause,
    Stop,
}

/// Gate tuning
#[derive(Debug, Clone, Copy)]
pub struct GateOptions {
    /// Microphone channel count; only the first channel reaches the detector
    pub channels: u16,
    /// Sleep between checks while paused or after a device error
    pub poll_interval: Duration,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            channels: 1,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Keyword detection handed to the session owner
///
/// The gate stays paused until the event is completed or dropped.
#[derive(Debug)]
pub struct WakeEvent {
    keyword: String,
    index: usize,
    done: Option<oneshot::Sender<()>>,
}

impl WakeEvent {
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Let the gate resume scanning
    pub fn complete(self) {
        drop(self);
    }
}

impl Drop for WakeEvent {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

/// Handle to a running scan loop
pub struct WakeWordGate {
    commands: watch::Sender<Command>,
    state: watch::Receiver<GateState>,
    params: StreamParams,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WakeWordGate {
    /// Open the microphone and start scanning
    ///
    /// Returns the gate and the stream of wake events.
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be opened; this aborts startup
    pub fn start(
        device: Arc<dyn AudioDevice>,
        detector: Box<dyn KeywordDetector>,
        options: GateOptions,
    ) -> Result<(Self, mpsc::Receiver<WakeEvent>)> {
        let params = StreamParams::new(
            detector.sample_rate(),
            options.channels.max(1),
            detector.frame_length(),
        );
        let input = device.open_input(params)?;

        let (commands, command_rx) = watch::channel(Command::Run);
        let (state_tx, state) = watch::channel(GateState::Listening);
        let (events_tx, events) = mpsc::channel(1);

        tracing::info!(
            keywords = ?detector.keywords(),
            sample_rate = params.sample_rate,
            frame_length = params.chunk_size,
            "wake word gate listening"
        );

        let scan = ScanLoop {
            device,
            detector,
            params,
            poll_interval: options.poll_interval,
            input: Some(input),
            commands: command_rx,
            state: state_tx,
            events: events_tx,
        };
        let task = tokio::spawn(scan.run());

        Ok((
            Self {
                commands,
                state,
                params,
                task: Mutex::new(Some(task)),
            },
            events,
        ))
    }

    #[must_use]
    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    /// Stream parameters the microphone is (re)opened with
    #[must_use]
    pub const fn params(&self) -> StreamParams {
        self.params
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<GateState> {
        self.state.clone()
    }

    /// Stop scanning and release the microphone; resolves once it is released
    pub async fn pause(&self) {
        self.commands.send_if_modified(|c| {
            if *c == Command::Run {
                *c = Command::Pause;
                true
            } else {
                false
            }
        });
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|s| matches!(s, GateState::Paused | GateState::Idle))
            .await;
    }

    /// Reacquire the microphone and scan again; no-op unless paused
    pub fn resume(&self) {
        self.commands.send_if_modified(|c| {
            if *c == Command::Pause {
                *c = Command::Run;
                true
            } else {
                false
            }
        });
    }

    /// Wait until the gate reaches `target`
    pub async fn wait_for_state(&self, target: GateState) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == target).await;
    }

    /// Terminate the scan loop and release the detector and microphone
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) {
        self.commands.send_replace(Command::Stop);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "wake word scan loop failed");
            }
            tracing::info!("wake word gate stopped");
        }
    }
}

impl Drop for WakeWordGate {
    fn drop(&mut self) {
        self.commands.send_replace(Command::Stop);
    }
}

struct ScanLoop {
    device: Arc<dyn AudioDevice>,
    detector: Box<dyn KeywordDetector>,
    params: StreamParams,
    poll_interval: Duration,
    input: Option<Arc<dyn InputStream>>,
    commands: watch::Receiver<Command>,
    state: watch::Sender<GateState>,
    events: mpsc::Sender<WakeEvent>,
}

impl ScanLoop {
    async fn run(mut self) {
        loop {
            let command = *self.commands.borrow_and_update();
            match command {
                Command::Stop => break,
                Command::Pause => {
                    self.release();
                    self.state.send_replace(GateState::Paused);
                    // Bounded wait instead of polling the device
                    let _ =
                        tokio::time::timeout(self.poll_interval, self.commands.changed()).await;
                    continue;
                }
                Command::Run => {}
            }

            let Some(stream) = self.acquire().await else {
                continue;
            };

            let frame_length = self.params.chunk_size;
            let reader = Arc::clone(&stream);
            let mut read = tokio::task::spawn_blocking(move || reader.read(frame_length));

            let pcm = tokio::select! {
                result = &mut read => result,
                _ = self.commands.changed() => {
                    // Pause or stop requested mid-read: unblock the reader and discard
                    self.release();
                    let _ = read.await;
                    continue;
                }
            };

            let pcm = match pcm {
                Ok(Ok(pcm)) => pcm,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "microphone read failed, reopening");
                    self.release();
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "microphone read task failed");
                    self.release();
                    continue;
                }
            };

            let samples = first_channel(&pcm16_to_samples(&pcm), self.params.channels);
            match self.detector.process(&samples).await {
                Ok(Some(index)) => {
                    if !self.hand_off(index).await {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "keyword detection failed");
                }
            }
        }

        self.release();
        self.state.send_replace(GateState::Idle);
        tracing::debug!("wake word scan loop exited");
    }

    /// Current input stream, reopening it at the original parameters if needed
    async fn acquire(&mut self) -> Option<Arc<dyn InputStream>> {
        if let Some(stream) = &self.input {
            return Some(Arc::clone(stream));
        }

        match self.device.open_input(self.params) {
            Ok(stream) => {
                tracing::debug!("wake word gate reacquired microphone");
                self.input = Some(Arc::clone(&stream));
                self.state.send_replace(GateState::Listening);
                Some(stream)
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to reopen microphone");
                tokio::time::sleep(self.poll_interval).await;
                None
            }
        }
    }

    /// Drop the microphone; `Listening` is only published while it is held
    fn release(&mut self) {
        if let Some(stream) = self.input.take() {
            stream.close();
            self.detector.reset();
            self.state.send_if_modified(|s| {
                if *s == GateState::Listening {
                    *s = GateState::Reopening;
                    true
                } else {
                    false
                }
            });
            tracing::debug!("wake word gate released microphone");
        }
    }

    /// Pause, emit the event and wait for its completion
    ///
    /// Returns `false` when the gate should shut down.
    async fn hand_off(&mut self, index: usize) -> bool {
        self.release();
        self.state.send_replace(GateState::Paused);

        let keyword = self
            .detector
            .keywords()
            .get(index)
            .cloned()
            .unwrap_or_default();
        tracing::info!(keyword = %keyword, "wake word detected");

        let (done_tx, done_rx) = oneshot::channel();
        let event = WakeEvent {
            keyword,
            index,
            done: Some(done_tx),
        };
        if self.events.send(event).await.is_err() {
            tracing::debug!("wake event receiver dropped");
            return false;
        }

        let stopping = self.commands.wait_for(|c| *c == Command::Stop);
        tokio::select! {
            _ = done_rx => true,
            _ = stopping => false,
        }
    }
}

fn first_channel(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .iter()
        .step_by(usize::from(channels))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_channel() {
        assert_eq!(first_channel(&[1, 2, 3, 4], 2), vec![1, 3]);
        assert_eq!(first_channel(&[1, 2, 3], 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_dropping_event_completes_it() {
        let (tx, mut rx) = oneshot::channel();
        let event = WakeEvent {
            keyword: "computer".to_string(),
            index: 0,
            done: Some(tx),
        };
        assert_eq!(event.keyword(), "computer");
        event.complete();
        assert!(rx.try_recv().is_ok());
    }
}
