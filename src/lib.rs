//! Marlene - wake-word voice assistant core
//!
//! This library provides the concurrency core of a voice assistant:
//! - Wake word gating over a shared microphone
//! - Full-duplex voice sessions with a remote conversational agent
//! - Interruptible playback with barge-in
//! - Client-side functions (smart home control, persona switching)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Assistant                        │
//! │        WakeWordGate  ──wake event──▶  VoiceSession   │
//! └──────────┬───────────────────────────────┬──────────┘
//!            │                               │
//! ┌──────────▼──────────┐        ┌───────────▼──────────┐
//! │     AudioDevice      │        │  Connector (agent)   │
//! │  mic  │  speaker     │        │  SessionProtocol     │
//! └─────────────────────┘        │  ToolDispatcher      │
//!                                └──────────────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod error;
pub mod prompt;
pub mod session;
pub mod tools;
pub mod voice;

pub use assistant::Assistant;
pub use config::Config;
pub use error::{Error, Result};
pub use prompt::PersonaMode;
pub use session::{
    CloseReason, Connector, SessionSettings, SessionState, SessionSummary, VoiceSession,
};
pub use tools::{FunctionRegistry, ToolDispatcher, ToolOutput};
pub use voice::{AudioDevice, CpalDevice, KeywordDetector, PlaybackBuffer, WakeWordGate};
