//! Agent speech playback
//!
//! A bounded FIFO of frames drained by a dedicated thread into the output
//! stream. `clear` discards pending frames for barge-in without touching the
//! playback thread; `stop` queues the stop sentinel, joins the thread with a
//! bounded wait and releases the output device.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::device::OutputStream;
use super::frame::AudioFrame;
use crate::Result;

/// Playback tuning
#[derive(Debug, Clone, Copy)]
pub struct PlaybackConfig {
    /// Maximum pending frames; the oldest frame is dropped on overflow
    pub capacity: usize,
    /// Bounded wait of one queue pop
    pub pop_wait: Duration,
    /// Bound on joining the playback thread during `stop`
    pub join_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            pop_wait: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// Result of one bounded pop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    Frame(AudioFrame),
    /// Stop sentinel reached
    Stop,
    /// Nothing arrived within the wait
    Empty,
}

enum Slot {
    Frame(AudioFrame),
    Stop,
}

#[derive(Default)]
struct Queue {
    slots: VecDeque<Slot>,
    frames: usize,
    stopped: bool,
}

struct Player {
    thread: JoinHandle<()>,
    done: mpsc::Receiver<()>,
    output: Arc<dyn OutputStream>,
}

/// Queue of agent audio feeding the speaker
pub struct PlaybackBuffer {
    queue: Mutex<Queue>,
    available: Condvar,
    config: PlaybackConfig,
    player: Mutex<Option<Player>>,
    stop_started: AtomicBool,
}

impl PlaybackBuffer {
    #[must_use]
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            config,
            player: Mutex::new(None),
            stop_started: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the playback thread writing into `output`
    ///
    /// # Errors
    ///
    /// Returns error if the thread cannot be spawned
    pub fn start(self: &Arc<Self>, output: Arc<dyn OutputStream>) -> Result<()> {
        let mut player = self.player.lock().unwrap_or_else(PoisonError::into_inner);
        if player.is_some() || self.is_stopped() {
            return Ok(());
        }

        let (done_tx, done) = mpsc::channel();
        let buffer = Arc::clone(self);
        let sink = Arc::clone(&output);
        let thread = std::thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                buffer.drain_into(sink.as_ref());
                let _ = done_tx.send(());
            })?;

        *player = Some(Player {
            thread,
            done,
            output,
        });
        tracing::debug!("playback loop started");
        Ok(())
    }

    /// Consumption loop: re-polls on empty, exits only on the stop sentinel
    fn drain_into(&self, output: &dyn OutputStream) {
        loop {
            match self.pop(self.config.pop_wait) {
                Popped::Frame(frame) => {
                    if let Err(e) = output.write(frame.data()) {
                        tracing::error!(error = %e, "audio playback error");
                        break;
                    }
                }
                Popped::Empty => {}
                Popped::Stop => break,
            }
        }
        tracing::debug!("playback loop exited");
    }

    /// Append a frame; returns `false` (and drops it) once stopped
    pub fn enqueue(&self, frame: AudioFrame) -> bool {
        let mut queue = self.lock();
        if queue.stopped {
            return false;
        }

        if queue.frames >= self.config.capacity
            && let Some(pos) = queue.slots.iter().position(|s| matches!(s, Slot::Frame(_)))
        {
            queue.slots.remove(pos);
            queue.frames -= 1;
            tracing::warn!(capacity = self.config.capacity, "playback queue full, dropped oldest frame");
        }

        queue.slots.push_back(Slot::Frame(frame));
        queue.frames += 1;
        drop(queue);
        self.available.notify_one();
        true
    }

    /// Discard every pending frame, keeping the stop sentinel
    ///
    /// Returns the number of frames discarded.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let dropped = queue.frames;
        queue.slots.retain(|s| matches!(s, Slot::Stop));
        queue.frames = 0;
        dropped
    }

    /// Take the next entry, waiting at most `wait`
    pub fn pop(&self, wait: Duration) -> Popped {
        let mut queue = self.lock();
        if queue.slots.is_empty() {
            queue = self
                .available
                .wait_timeout_while(queue, wait, |q| q.slots.is_empty())
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        match queue.slots.pop_front() {
            Some(Slot::Frame(frame)) => {
                queue.frames -= 1;
                Popped::Frame(frame)
            }
            Some(Slot::Stop) => {
                // Leave the sentinel for any later pop
                queue.slots.push_front(Slot::Stop);
                Popped::Stop
            }
            None => Popped::Empty,
        }
    }

    /// Frames waiting to be played
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().frames
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Queue the stop sentinel, join the playback thread, release the output
    ///
    /// Blocks for at most the configured join timeout. Safe to call repeatedly.
    pub fn stop(&self) {
        if self.stop_started.swap(true, Ordering::SeqCst) {
            return;
        }

        {
            let mut queue = self.lock();
            queue.stopped = true;
            queue.slots.push_back(Slot::Stop);
        }
        self.available.notify_all();

        let player = self
            .player
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(player) = player {
            match player.done.recv_timeout(self.config.join_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if player.thread.join().is_err() {
                        tracing::warn!("playback thread panicked");
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        timeout_ms = self.config.join_timeout.as_millis(),
                        "playback loop did not exit in time, force releasing output"
                    );
                }
            }
            player.output.close();
        }

        let dropped = self.clear();
        tracing::debug!(dropped, "playback stopped");
    }
}

impl Default for PlaybackBuffer {
    fn default() -> Self {
        Self::new(PlaybackConfig::default())
    }
}
