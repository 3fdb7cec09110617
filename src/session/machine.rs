//! Session protocol state machine
//!
//! Interprets inbound agent messages and drives their side effects: sending
//! settings after `Welcome`, clearing playback on barge-in, queuing agent
//! audio and answering function calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::{ClientMessage, FunctionCall, SessionMessage, SettingsPayload};
use super::shutdown::CloseReason;
use super::transport::Outbound;
use crate::tools::{ToolDispatcher, ToolOutput};
use crate::voice::{AudioFormat, AudioFrame, PlaybackBuffer};
use crate::{Error, Result};

/// Protocol phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    AwaitingWelcome,
    Configuring,
    Active,
    Closing,
}

/// What the receive loop should do after a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Continue,
    Close(CloseReason),
}

/// Spoken filler injected when the agent thinks for too long
#[derive(Debug, Clone)]
pub struct ThinkingFiller {
    pub grace: Duration,
    pub message: String,
}

/// Counters reported in the session summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolStats {
    pub messages: u64,
    pub audio_chunks: u64,
    pub tool_calls: u64,
    pub barge_ins: u64,
    pub dropped_frames: u64,
}

/// Live protocol counters, shared so they outlive an aborted receive loop
#[derive(Debug, Default)]
pub struct ProtocolCounters {
    messages: AtomicU64,
    audio_chunks: AtomicU64,
    tool_calls: AtomicU64,
    barge_ins: AtomicU64,
    dropped_frames: AtomicU64,
}

impl ProtocolCounters {
    #[must_use]
    pub fn snapshot(&self) -> ProtocolStats {
        ProtocolStats {
            messages: self.messages.load(Ordering::Relaxed),
            audio_chunks: self.audio_chunks.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            barge_ins: self.barge_ins.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Per-session protocol driver, owned by the receive loop
pub struct SessionProtocol {
    state: ProtocolState,
    settings: SettingsPayload,
    playback: Arc<PlaybackBuffer>,
    outbound: mpsc::Sender<Outbound>,
    tools: Arc<dyn ToolDispatcher>,
    output_format: AudioFormat,
    filler: Option<ThinkingFiller>,
    filler_armed: bool,
    filler_task: Option<JoinHandle<()>>,
    counters: Arc<ProtocolCounters>,
}

impl SessionProtocol {
    #[must_use]
    pub fn new(
        settings: SettingsPayload,
        playback: Arc<PlaybackBuffer>,
        outbound: mpsc::Sender<Outbound>,
        tools: Arc<dyn ToolDispatcher>,
        output_format: AudioFormat,
    ) -> Self {
        Self {
            state: ProtocolState::AwaitingWelcome,
            settings,
            playback,
            outbound,
            tools,
            output_format,
            filler: None,
            filler_armed: false,
            filler_task: None,
            counters: Arc::default(),
        }
    }

    #[must_use]
    pub fn with_filler(mut self, filler: Option<ThinkingFiller>) -> Self {
        self.filler = filler;
        self
    }

    #[must_use]
    pub const fn state(&self) -> ProtocolState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> ProtocolStats {
        self.counters.snapshot()
    }

    /// Handle on the live counters; stays readable after the protocol is gone
    #[must_use]
    pub fn counters(&self) -> Arc<ProtocolCounters> {
        Arc::clone(&self.counters)
    }

    /// Apply one inbound message
    ///
    /// # Errors
    ///
    /// Returns a recoverable per-message error (`NotSupported`, `Protocol`)
    /// that the caller logs before continuing, or `Error::Session` when the
    /// outbound channel is gone
    pub async fn handle(&mut self, message: SessionMessage) -> Result<Transition> {
        bump(&self.counters.messages, 1);

        if self.state == ProtocolState::Closing {
            tracing::trace!(kind = message.kind(), "message after close ignored");
            return Ok(Transition::Continue);
        }

        match (self.state, message) {
            (ProtocolState::AwaitingWelcome, SessionMessage::Welcome { request_id }) => {
                tracing::info!(request_id = ?request_id, "agent welcome received, sending settings");
                self.send(ClientMessage::Settings(Box::new(self.settings.clone())))
                    .await?;
                self.state = ProtocolState::Configuring;
            }
            (ProtocolState::Configuring, SessionMessage::SettingsApplied) => {
                tracing::info!("agent settings applied");
                self.state = ProtocolState::Active;
            }
            (ProtocolState::AwaitingWelcome | ProtocolState::Configuring, SessionMessage::Error { description, code }) => {
                tracing::error!(code = ?code, description, "agent rejected session settings");
                return Ok(Transition::Close(CloseReason::Failed(format!(
                    "agent rejected settings: {description}"
                ))));
            }
            (ProtocolState::Active, SessionMessage::UserStartedSpeaking) => {
                self.cancel_filler();
                let dropped = self.playback.clear();
                bump(&self.counters.barge_ins, 1);
                bump(&self.counters.dropped_frames, dropped as u64);
                tracing::info!(dropped, "user started speaking, playback cleared");
            }
            (ProtocolState::Active, SessionMessage::AgentStartedSpeaking) => {
                self.cancel_filler();
                tracing::debug!("agent started speaking");
            }
            (ProtocolState::Active, SessionMessage::ConversationText { role, content }) => {
                tracing::info!(role, content, "conversation text");
            }
            (ProtocolState::Active, SessionMessage::AgentAudioDone) => {
                tracing::debug!("agent audio done");
            }
            (ProtocolState::Active, SessionMessage::AgentThinking { content }) => {
                tracing::debug!(content, "agent thinking");
                self.arm_filler();
            }
            (ProtocolState::Active, SessionMessage::FunctionCallRequest { functions }) => {
                self.cancel_filler();
                self.handle_function_calls(functions).await?;
            }
            (ProtocolState::Active, SessionMessage::AudioChunk(data)) => {
                bump(&self.counters.audio_chunks, 1);
                if !self.playback.enqueue(AudioFrame::new(self.output_format, data)) {
                    tracing::trace!("audio chunk after playback stop dropped");
                }
            }
            (_, SessionMessage::Error { description, code }) => {
                tracing::warn!(code = ?code, description, "agent error");
            }
            (_, SessionMessage::Warning { description }) => {
                tracing::warn!(description, "agent warning");
            }
            (_, SessionMessage::Unrecognized(raw)) => {
                tracing::debug!(raw = %truncate(&raw, 200), "unrecognized agent message");
            }
            (state, other) => {
                tracing::debug!(state = ?state, kind = other.kind(), "message ignored in current state");
            }
        }

        Ok(Transition::Continue)
    }

    /// Enter `Closing`; later messages are ignored
    pub fn close(&mut self) {
        self.cancel_filler();
        self.state = ProtocolState::Closing;
    }

    /// Answer a `FunctionCallRequest`
    ///
    /// A single call is dispatched and answered with one response. A request
    /// carrying several calls dispatches none of them and answers each call id
    /// with its own failure response, so no pending call is left unanswered on
    /// the agent side; the request is then reported as `NotSupported`.
    async fn handle_function_calls(&mut self, functions: Vec<FunctionCall>) -> Result<()> {
        match functions.as_slice() {
            [] => Err(Error::Protocol(
                "function call request without functions".to_string(),
            )),
            [call] => self.invoke(call).await,
            calls => {
                tracing::warn!(count = calls.len(), "multiple function calls in one request");
                for call in calls {
                    self.respond(
                        call,
                        ToolOutput::failure("only one function call per request is supported"),
                    )
                    .await?;
                }
                Err(Error::NotSupported(format!(
                    "{} function calls in one request",
                    calls.len()
                )))
            }
        }
    }

    /// Dispatch one call; a response is sent whether or not dispatch succeeds
    async fn invoke(&mut self, call: &FunctionCall) -> Result<()> {
        bump(&self.counters.tool_calls, 1);
        tracing::info!(name = %call.name, id = %call.id, "function call requested");

        let output = match self.tools.dispatch(call).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(name = %call.name, error = %e, "function call failed");
                ToolOutput::failure(&e.to_string())
            }
        };
        self.respond(call, output).await
    }

    async fn respond(&self, call: &FunctionCall, output: ToolOutput) -> Result<()> {
        self.send(ClientMessage::FunctionCallResponse {
            id: call.id.clone(),
            name: call.name.clone(),
            content: output.content,
        })
        .await?;

        if let Some(follow_up) = output.follow_up {
            self.send(follow_up).await?;
        }
        Ok(())
    }

    async fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound
            .send(Outbound::Message(message))
            .await
            .map_err(|_| Error::Session("outbound channel closed".to_string()))
    }

    /// Start the filler timer once per agent turn
    fn arm_filler(&mut self) {
        let Some(filler) = self.filler.clone() else {
            return;
        };
        if self.filler_armed {
            return;
        }
        self.filler_armed = true;

        let outbound = self.outbound.clone();
        self.filler_task = Some(tokio::spawn(async move {
            tokio::time::sleep(filler.grace).await;
            tracing::debug!("agent still thinking, injecting filler");
            let _ = outbound
                .send(Outbound::Message(ClientMessage::InjectAgentMessage {
                    message: filler.message,
                }))
                .await;
        }));
    }

    fn cancel_filler(&mut self) {
        self.filler_armed = false;
        if let Some(task) = self.filler_task.take() {
            task.abort();
        }
    }
}

impl Drop for SessionProtocol {
    fn drop(&mut self) {
        self.cancel_filler();
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
