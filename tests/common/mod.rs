//! Shared test utilities
//!
//! In-memory audio device, channel-backed agent transport, and recording
//! collaborators; nothing here touches audio hardware or the network.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;

use marlene::session::{Connection, Connector, WireMessage};
use marlene::tools::{DeviceCommand, SmartHomeTrigger};
use marlene::voice::{
    AudioDevice, InputStream, KeywordDetector, OutputStream, StreamParams, Transcriber,
};
use marlene::{Error, Result};

/// Pacing of one mock microphone read
pub const READ_PACE: Duration = Duration::from_millis(10);

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct DeviceShared {
    script: Mutex<VecDeque<Vec<i16>>>,
    input_opens: Mutex<Vec<StreamParams>>,
    output_opens: Mutex<Vec<StreamParams>>,
    written: Mutex<Vec<Vec<u8>>>,
    reads: AtomicUsize,
    active_inputs: AtomicUsize,
    max_active_inputs: AtomicUsize,
    input_closes: AtomicUsize,
    output_closes: AtomicUsize,
    fail_input: AtomicBool,
    fail_reads: AtomicBool,
    fail_output: AtomicBool,
    write_delay: Mutex<Duration>,
}

/// Scripted in-memory audio device
///
/// Reads return scripted frames first, then silence, each after
/// [`READ_PACE`]. Output writes are recorded.
pub struct MockDevice {
    native_rate: u32,
    shared: Arc<DeviceShared>,
}

impl MockDevice {
    pub fn new(native_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            native_rate,
            shared: Arc::new(DeviceShared::default()),
        })
    }

    /// Queue mono samples returned by later reads, one entry per read
    pub fn push_frame(&self, samples: Vec<i16>) {
        self.shared.script.lock().unwrap().push_back(samples);
    }

    pub fn fail_input(&self, fail: bool) {
        self.shared.fail_input.store(fail, Ordering::SeqCst);
    }

    /// Make reads on open input streams fail
    pub fn fail_reads(&self, fail: bool) {
        self.shared.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_output(&self, fail: bool) {
        self.shared.fail_output.store(fail, Ordering::SeqCst);
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.shared.write_delay.lock().unwrap() = delay;
    }

    pub fn input_opens(&self) -> Vec<StreamParams> {
        self.shared.input_opens.lock().unwrap().clone()
    }

    pub fn output_opens(&self) -> Vec<StreamParams> {
        self.shared.output_opens.lock().unwrap().clone()
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.shared.written.lock().unwrap().clone()
    }

    pub fn reads(&self) -> usize {
        self.shared.reads.load(Ordering::SeqCst)
    }

    pub fn active_inputs(&self) -> usize {
        self.shared.active_inputs.load(Ordering::SeqCst)
    }

    pub fn max_active_inputs(&self) -> usize {
        self.shared.max_active_inputs.load(Ordering::SeqCst)
    }

    pub fn input_closes(&self) -> usize {
        self.shared.input_closes.load(Ordering::SeqCst)
    }

    pub fn output_closes(&self) -> usize {
        self.shared.output_closes.load(Ordering::SeqCst)
    }
}

impl AudioDevice for MockDevice {
    fn open_input(&self, params: StreamParams) -> Result<Arc<dyn InputStream>> {
        if self.shared.fail_input.load(Ordering::SeqCst) {
            return Err(Error::Audio("no input device".to_string()));
        }
        self.shared.input_opens.lock().unwrap().push(params);
        let active = self.shared.active_inputs.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .max_active_inputs
            .fetch_max(active, Ordering::SeqCst);

        Ok(Arc::new(MockInput {
            params,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }

    fn open_output(&self, params: StreamParams) -> Result<Arc<dyn OutputStream>> {
        if self.shared.fail_output.load(Ordering::SeqCst) {
            return Err(Error::Audio("no output device".to_string()));
        }
        self.shared.output_opens.lock().unwrap().push(params);
        Ok(Arc::new(MockOutput {
            params,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }

    fn native_input_rate(&self) -> Result<u32> {
        Ok(self.native_rate)
    }
}

struct MockInput {
    params: StreamParams,
    shared: Arc<DeviceShared>,
    closed: AtomicBool,
}

impl InputStream for MockInput {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn read(&self, samples: usize) -> Result<Vec<u8>> {
        std::thread::sleep(READ_PACE);
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Audio("input stream closed".to_string()));
        }
        if self.shared.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Audio("input overflow".to_string()));
        }
        self.shared.reads.fetch_add(1, Ordering::SeqCst);

        let channels = usize::from(self.params.channels);
        let mono = self
            .shared
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![0; samples]);
        let mut pcm = Vec::with_capacity(mono.len() * channels * 2);
        for sample in mono {
            for _ in 0..channels {
                pcm.extend_from_slice(&sample.to_le_bytes());
            }
        }
        Ok(pcm)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.active_inputs.fetch_sub(1, Ordering::SeqCst);
            self.shared.input_closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockOutput {
    params: StreamParams,
    shared: Arc<DeviceShared>,
    closed: AtomicBool,
}

impl OutputStream for MockOutput {
    fn params(&self) -> StreamParams {
        self.params
    }

    fn write(&self, pcm: &[u8]) -> Result<()> {
        let delay = *self.shared.write_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Audio("output stream closed".to_string()));
        }
        self.shared.written.lock().unwrap().push(pcm.to_vec());
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.output_closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Test side of one agent connection
pub struct AgentPeer {
    to_client: fmpsc::UnboundedSender<Result<WireMessage>>,
    from_client: fmpsc::UnboundedReceiver<WireMessage>,
}

impl AgentPeer {
    pub fn send_json(&self, value: &Value) {
        self.to_client
            .unbounded_send(Ok(WireMessage::Text(value.to_string())))
            .unwrap();
    }

    pub fn send_audio(&self, pcm: Vec<u8>) {
        self.to_client
            .unbounded_send(Ok(WireMessage::Binary(pcm)))
            .unwrap();
    }

    /// End the inbound stream, as a dropped connection would
    pub fn hang_up(&self) {
        self.to_client.close_channel();
    }

    /// Next frame from the client, if any arrives within [`WAIT`]
    pub async fn next_frame(&mut self) -> Option<WireMessage> {
        tokio::time::timeout(WAIT, self.from_client.next())
            .await
            .ok()
            .flatten()
    }

    /// Next JSON control message, skipping microphone audio
    pub async fn next_json(&mut self) -> Option<Value> {
        loop {
            match self.next_frame().await? {
                WireMessage::Text(text) => return serde_json::from_str(&text).ok(),
                WireMessage::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Wait for the client to send audio; returns the byte length
    pub async fn next_audio(&mut self) -> Option<usize> {
        loop {
            match self.next_frame().await? {
                WireMessage::Binary(pcm) => return Some(pcm.len()),
                WireMessage::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Drain frames until the client closes its side
    pub async fn drain_until_closed(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Some(frame) = self.next_frame().await {
            match frame {
                WireMessage::Text(text) => {
                    if let Ok(value) = serde_json::from_str(&text) {
                        messages.push(value);
                    }
                }
                WireMessage::Close(_) => break,
                _ => {}
            }
        }
        messages
    }

    /// Welcome plus settings handshake; returns the settings message
    pub async fn handshake(&mut self) -> Value {
        self.send_json(&serde_json::json!({ "type": "Welcome", "request_id": "test" }));
        let settings = self.next_json().await.unwrap();
        assert_eq!(settings["type"], "Settings");
        self.send_json(&serde_json::json!({ "type": "SettingsApplied" }));
        settings
    }
}

/// Agent transport over in-memory channels
///
/// Each successful `connect` hands an [`AgentPeer`] to the test.
pub struct ChannelConnector {
    peers: mpsc::UnboundedSender<AgentPeer>,
    refuse: AtomicBool,
    connects: AtomicUsize,
}

impl ChannelConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AgentPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                peers,
                refuse: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self) -> Result<Connection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection refused".to_string()));
        }

        let (to_client, inbound) = fmpsc::unbounded();
        let (outbound, from_client) = fmpsc::unbounded();
        self.peers
            .send(AgentPeer {
                to_client,
                from_client,
            })
            .map_err(|_| Error::Connection("test peer dropped".to_string()))?;

        Ok(Connection {
            sink: Box::pin(outbound.sink_map_err(|e| Error::Connection(e.to_string()))),
            stream: Box::pin(inbound),
        })
    }
}

/// Smart home trigger that records commands
#[derive(Default)]
pub struct RecordingTrigger {
    commands: Mutex<Vec<String>>,
    fail: AtomicBool,
    delay: Mutex<Duration>,
    started: AtomicUsize,
}

impl RecordingTrigger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let trigger = Self::default();
        trigger.fail.store(true, Ordering::SeqCst);
        Arc::new(trigger)
    }

    /// Trigger that takes `delay` before answering
    pub fn slow(delay: Duration) -> Arc<Self> {
        let trigger = Self::default();
        *trigger.delay.lock().unwrap() = delay;
        Arc::new(trigger)
    }

    /// Endpoints triggered so far
    pub fn endpoints(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Dispatches that have begun, finished or not
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SmartHomeTrigger for RecordingTrigger {
    async fn trigger(&self, command: &DeviceCommand) -> Result<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Tool("trigger returned 503".to_string()));
        }
        self.commands.lock().unwrap().push(command.endpoint());
        Ok(())
    }
}

/// Transcriber returning queued transcripts, then empty strings
#[derive(Default)]
pub struct StubTranscriber {
    transcripts: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl StubTranscriber {
    pub fn new(transcripts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            transcripts: Mutex::new(transcripts.iter().map(ToString::to_string).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for StubTranscriber {
    async fn transcribe(&self, _wav: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .transcripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

/// Detector that fires keyword 0 on any frame with a non-zero first sample
pub struct ScriptedDetector {
    keywords: Vec<String>,
    frame_length: usize,
    resets: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(frame_length: usize) -> (Box<Self>, Arc<AtomicUsize>) {
        let resets = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Self {
                keywords: vec!["marlene".to_string()],
                frame_length,
                resets: Arc::clone(&resets),
            }),
            resets,
        )
    }
}

#[async_trait]
impl KeywordDetector for ScriptedDetector {
    fn sample_rate(&self) -> u32 {
        16000
    }

    fn frame_length(&self) -> usize {
        self.frame_length
    }

    fn keywords(&self) -> &[String] {
        &self.keywords
    }

    async fn process(&mut self, frame: &[i16]) -> Result<Option<usize>> {
        Ok(frame.first().filter(|s| **s != 0).map(|_| 0))
    }

    fn reset(&mut self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loud square wave, `samples` long
pub fn loud(samples: usize) -> Vec<i16> {
    (0..samples)
        .map(|i| if i % 2 == 0 { 12_000 } else { -12_000 })
        .collect()
}

/// Poll `check` until it holds or [`WAIT`] elapses
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
