//! Agent connection: WebSocket connector and frame codec

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use super::protocol::{ClientMessage, SessionMessage};
use crate::{Error, Result};

/// WebSocket frame type used on the agent connection
pub type WireMessage = tokio_tungstenite::tungstenite::Message;

/// Write half of an agent connection
pub type AgentSink = Pin<Box<dyn Sink<WireMessage, Error = Error> + Send>>;

/// Read half of an agent connection
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<WireMessage>> + Send>>;

/// Live, split agent connection
pub struct Connection {
    pub sink: AgentSink,
    pub stream: AgentStream,
}

/// Opens connections to the remote agent
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish one connection
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the agent is unreachable or refuses
    async fn connect(&self) -> Result<Connection>;
}

/// Connects to the Deepgram voice agent endpoint
pub struct DeepgramConnector {
    url: String,
    api_key: SecretString,
}

impl DeepgramConnector {
    #[must_use]
    pub fn new(url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Connector for DeepgramConnector {
    async fn connect(&self) -> Result<Connection> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Connection(e.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key.expose_secret()))
            .map_err(|e| Error::Config(format!("invalid agent API key: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        tracing::debug!(url = %self.url, "connecting to agent");
        let (ws, response) = connect_async(request)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        tracing::info!(status = %response.status(), "connected to agent");

        let (sink, stream) = ws.split();
        Ok(Connection {
            sink: Box::pin(sink.sink_map_err(|e| Error::Connection(e.to_string()))),
            stream: Box::pin(stream.map(|r| r.map_err(|e| Error::Connection(e.to_string())))),
        })
    }
}

/// Frame queued for the connection's write loop
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Raw microphone PCM
    Audio(Vec<u8>),
    Message(ClientMessage),
}

impl Outbound {
    /// Encode as a WebSocket frame
    ///
    /// # Errors
    ///
    /// Returns error if a control message fails to serialize
    pub fn into_wire(self) -> Result<WireMessage> {
        Ok(match self {
            Self::Audio(pcm) => WireMessage::Binary(pcm),
            Self::Message(msg) => WireMessage::Text(msg.to_json()?),
        })
    }
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(SessionMessage),
    /// Peer sent a close frame
    Closed,
    /// Ping, pong and raw frames
    Ignored,
}

/// Classify one inbound WebSocket frame
#[must_use]
pub fn decode(frame: WireMessage) -> Inbound {
    match frame {
        WireMessage::Text(text) => Inbound::Message(SessionMessage::from_text(&text)),
        WireMessage::Binary(data) => Inbound::Message(SessionMessage::from_binary(data)),
        WireMessage::Close(_) => Inbound::Closed,
        _ => Inbound::Ignored,
    }
}
