//! One bounded-lifetime conversation with the agent
//!
//! `listen` connects, opens both audio streams at the detected native input
//! rate, and runs the capture, receive and write loops until the first
//! termination signal. Teardown always closes the microphone, stops playback
//! and closes the connection, whichever loop ended the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::duplex::DuplexAudioChannel;
use super::machine::{ProtocolStats, SessionProtocol, ThinkingFiller, Transition};
use super::protocol::{AgentSettings, AudioSettings, SettingsPayload};
use super::shutdown::{CloseReason, Shutdown};
use super::transport::{AgentSink, AgentStream, Connection, Connector, Inbound, Outbound, decode};
use crate::tools::ToolDispatcher;
use crate::voice::{AudioDevice, AudioFormat, PlaybackConfig, StreamParams};
use crate::{Error, Result};

/// Outbound frames buffered ahead of the socket writer
const OUTBOUND_CAPACITY: usize = 64;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Everything a session needs besides its collaborators
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub input_channels: u16,
    /// Length of one microphone frame
    pub chunk_duration: Duration,
    pub output_sample_rate: u32,
    pub output_channels: u16,
    pub playback: PlaybackConfig,
    /// Agent block of the settings message
    pub agent: AgentSettings,
    pub filler: Option<ThinkingFiller>,
    /// Bound on joining each loop during teardown
    pub teardown_timeout: Duration,
    pub max_duration: Option<Duration>,
}

/// Outcome of a session that closed without failing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: Uuid,
    pub reason: CloseReason,
    /// Negotiated microphone rate, if the session got that far
    pub input_rate: Option<u32>,
    pub frames_sent: u64,
    pub messages_received: u64,
    pub audio_chunks_received: u64,
    pub tool_calls: u64,
    pub barge_ins: u64,
    /// Queued agent frames discarded by barge-in
    pub dropped_frames: u64,
    pub duration: Duration,
}

/// Single-use voice session
pub struct VoiceSession {
    id: Uuid,
    device: Arc<dyn AudioDevice>,
    connector: Arc<dyn Connector>,
    tools: Arc<dyn ToolDispatcher>,
    settings: Arc<SessionSettings>,
    state: watch::Sender<SessionState>,
    shutdown: Shutdown,
    started: AtomicBool,
}

impl VoiceSession {
    #[must_use]
    pub fn new(
        device: Arc<dyn AudioDevice>,
        connector: Arc<dyn Connector>,
        tools: Arc<dyn ToolDispatcher>,
        settings: Arc<SessionSettings>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            id: Uuid::new_v4(),
            device,
            connector,
            tools,
            settings,
            state,
            shutdown: Shutdown::new(),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Ask the session to end; idempotent, valid before `listen`
    pub fn close(&self) {
        if self.shutdown.trigger(CloseReason::LocalClose) {
            tracing::info!(session_id = %self.id, "voice session close requested");
        }
        if !self.started.load(Ordering::SeqCst) {
            self.state.send_replace(SessionState::Closed);
        }
    }

    /// Run the session until inactivity, peer close, local close or failure
    ///
    /// # Errors
    ///
    /// Returns error if the connection or audio streams cannot be opened, or a
    /// loop fails; resources are released before returning in every case
    pub async fn listen(&self, inactivity_timeout: Duration) -> Result<SessionSummary> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Session("voice session already used".to_string()));
        }

        let span = tracing::info_span!("voice_session", session_id = %self.id);
        let result = self.run(inactivity_timeout).instrument(span).await;
        self.state.send_replace(SessionState::Closed);
        result
    }

    async fn run(&self, inactivity_timeout: Duration) -> Result<SessionSummary> {
        let started = Instant::now();
        if self.shutdown.is_fired() {
            return Ok(self.summary(started, None, 0, ProtocolStats::default()));
        }

        self.state.send_replace(SessionState::Connecting);
        let connection = tokio::select! {
            connection = self.connector.connect() => connection?,
            () = self.shutdown.fired() => {
                return Ok(self.summary(started, None, 0, ProtocolStats::default()));
            }
        };
        let Connection { mut sink, stream } = connection;

        let (duplex, input_rate) = match self.open_audio() {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!(error = %e, "failed to open session audio");
                let _ = sink.close().await;
                return Err(e);
            }
        };
        let duplex = Arc::new(duplex);
        self.state.send_replace(SessionState::Active);
        tracing::info!(input_rate, "voice session active");

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let writer = tokio::spawn(write_loop(sink, out_rx, self.shutdown.clone()).in_current_span());

        let capture = {
            let duplex = Arc::clone(&duplex);
            let out_tx = out_tx.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { duplex.run_capture(out_tx, shutdown).await }.in_current_span())
        };

        let output_format =
            AudioFormat::linear16(self.settings.output_sample_rate, self.settings.output_channels);
        let protocol = SessionProtocol::new(
            SettingsPayload {
                audio: AudioSettings::linear16(input_rate, self.settings.output_sample_rate),
                agent: self.settings.agent.clone(),
            },
            duplex.playback(),
            out_tx,
            Arc::clone(&self.tools),
            output_format,
        )
        .with_filler(self.settings.filler.clone());
        let counters = protocol.counters();
        let receiver = tokio::spawn(
            receive_loop(stream, protocol, inactivity_timeout, self.shutdown.clone())
                .in_current_span(),
        );

        match self.settings.max_duration {
            Some(limit) => {
                if tokio::time::timeout(limit, self.shutdown.fired()).await.is_err() {
                    tracing::info!(limit_secs = limit.as_secs(), "session reached max duration");
                    self.shutdown.trigger(CloseReason::MaxDuration);
                }
            }
            None => self.shutdown.fired().await,
        }

        self.state.send_replace(SessionState::Closing);
        duplex.release().await;

        let timeout = self.settings.teardown_timeout;
        join_loop("receive", receiver, timeout).await;
        join_loop("capture", capture, timeout).await;
        join_loop("write", writer, timeout).await;

        let summary = self.summary(
            started,
            Some(input_rate),
            duplex.frames_sent(),
            counters.snapshot(),
        );
        match &summary.reason {
            CloseReason::Failed(reason) => {
                tracing::warn!(reason, "voice session failed");
                Err(Error::Session(reason.clone()))
            }
            reason => {
                tracing::info!(
                    reason = %reason,
                    duration_ms = summary.duration.as_millis(),
                    frames_sent = summary.frames_sent,
                    "voice session closed"
                );
                Ok(summary)
            }
        }
    }

    fn open_audio(&self) -> Result<(DuplexAudioChannel, u32)> {
        let input_rate = self.device.native_input_rate()?;
        let input_format = AudioFormat::linear16(input_rate, self.settings.input_channels);
        let input = StreamParams::new(
            input_rate,
            self.settings.input_channels,
            input_format.samples_for(self.settings.chunk_duration).max(1),
        );

        let output_format =
            AudioFormat::linear16(self.settings.output_sample_rate, self.settings.output_channels);
        let output = StreamParams::new(
            self.settings.output_sample_rate,
            self.settings.output_channels,
            output_format.samples_for(self.settings.chunk_duration).max(1),
        );

        let duplex =
            DuplexAudioChannel::open(self.device.as_ref(), input, output, self.settings.playback)?;
        Ok((duplex, input_rate))
    }

    fn summary(
        &self,
        started: Instant,
        input_rate: Option<u32>,
        frames_sent: u64,
        stats: ProtocolStats,
    ) -> SessionSummary {
        SessionSummary {
            id: self.id,
            reason: self.shutdown.reason().unwrap_or(CloseReason::LocalClose),
            input_rate,
            frames_sent,
            messages_received: stats.messages,
            audio_chunks_received: stats.audio_chunks,
            tool_calls: stats.tool_calls,
            barge_ins: stats.barge_ins,
            dropped_frames: stats.dropped_frames,
            duration: started.elapsed(),
        }
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.shutdown.trigger(CloseReason::LocalClose);
    }
}

/// Read agent frames until shutdown; silence longer than the window closes
async fn receive_loop(
    mut stream: AgentStream,
    mut protocol: SessionProtocol,
    inactivity_timeout: Duration,
    shutdown: Shutdown,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.fired() => break,
            next = tokio::time::timeout(inactivity_timeout, stream.next()) => next,
        };

        let frame = match next {
            Err(_) => {
                tracing::info!(
                    timeout_secs = inactivity_timeout.as_secs(),
                    "no agent activity, closing session"
                );
                shutdown.trigger(CloseReason::Inactivity);
                break;
            }
            Ok(None) => {
                tracing::info!("agent connection ended");
                shutdown.trigger(CloseReason::PeerClosed);
                break;
            }
            Ok(Some(Err(e))) => {
                tracing::error!(error = %e, "agent connection failed");
                shutdown.trigger(CloseReason::Failed(e.to_string()));
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let message = match decode(frame) {
            Inbound::Message(message) => message,
            Inbound::Closed => {
                tracing::info!("agent closed the connection");
                shutdown.trigger(CloseReason::PeerClosed);
                break;
            }
            Inbound::Ignored => continue,
        };

        match protocol.handle(message).await {
            Ok(Transition::Continue) => {}
            Ok(Transition::Close(reason)) => {
                shutdown.trigger(reason);
                break;
            }
            Err(e @ (Error::Session(_) | Error::Connection(_))) => {
                shutdown.trigger(CloseReason::Failed(e.to_string()));
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "agent message rejected");
            }
        }
    }

    protocol.close();
}

/// Forward queued frames to the socket; closes the socket on exit
async fn write_loop(mut sink: AgentSink, mut outbound: mpsc::Receiver<Outbound>, shutdown: Shutdown) {
    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.fired() => break,
            next = outbound.recv() => next,
        };
        let Some(frame) = next else {
            break;
        };

        let wire = match frame.into_wire() {
            Ok(wire) => wire,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode outbound message");
                continue;
            }
        };

        if let Err(e) = sink.send(wire).await {
            tracing::error!(error = %e, "agent send failed");
            shutdown.trigger(CloseReason::Failed(e.to_string()));
            break;
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!(error = %e, "agent connection close failed");
    }
    tracing::debug!("write loop exited");
}

/// Await a session loop, aborting it after `timeout`
async fn join_loop(name: &'static str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(task = name, error = %e, "session loop failed");
        }
        Err(_) => {
            tracing::warn!(task = name, "session loop did not stop in time, aborting");
            handle.abort();
        }
    }
}
