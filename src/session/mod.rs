//! Voice agent sessions
//!
//! A session owns one agent connection plus the microphone and speaker for
//! its lifetime. The protocol machine interprets agent messages; the duplex
//! channel moves audio; the shutdown signal ends every loop together.

mod duplex;
mod machine;
pub mod protocol;
mod shutdown;
mod transport;
mod voice_session;

pub use duplex::DuplexAudioChannel;
pub use machine::{ProtocolCounters, ProtocolState, ProtocolStats, SessionProtocol, ThinkingFiller, Transition};
pub use protocol::{
    AgentSettings, AudioEncoding, AudioSettings, ClientMessage, FunctionCall, FunctionDefinition,
    Provider, ProviderBlock, SessionMessage, SettingsPayload, ThinkSettings,
};
pub use shutdown::{CloseReason, Shutdown};
pub use transport::{
    AgentSink, AgentStream, Connection, Connector, DeepgramConnector, Inbound, Outbound,
    WireMessage, decode,
};
pub use voice_session::{SessionSettings, SessionState, SessionSummary, VoiceSession};
