//! Agent wire messages
//!
//! Inbound text frames are JSON objects tagged by `type`; binary frames are
//! always agent audio. Anything that is not valid JSON, or carries an unknown
//! `type`, becomes [`SessionMessage::Unrecognized`].

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Inbound event from the agent
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Welcome {
        request_id: Option<String>,
    },
    SettingsApplied,
    UserStartedSpeaking,
    AgentStartedSpeaking,
    ConversationText {
        role: String,
        content: String,
    },
    AgentAudioDone,
    AgentThinking {
        content: String,
    },
    FunctionCallRequest {
        functions: Vec<FunctionCall>,
    },
    Error {
        description: String,
        code: Option<String>,
    },
    Warning {
        description: String,
    },
    AudioChunk(Vec<u8>),
    Unrecognized(String),
}

impl SessionMessage {
    /// Parse a text frame
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Self::Unrecognized(text.to_string());
        };

        match serde_json::from_value::<Tagged>(value) {
            Ok(tagged) => tagged.into(),
            Err(e) => {
                tracing::trace!(error = %e, "unrecognized agent message");
                Self::Unrecognized(text.to_string())
            }
        }
    }

    /// Wrap a binary frame
    #[must_use]
    pub const fn from_binary(data: Vec<u8>) -> Self {
        Self::AudioChunk(data)
    }

    /// Short name for logging
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "Welcome",
            Self::SettingsApplied => "SettingsApplied",
            Self::UserStartedSpeaking => "UserStartedSpeaking",
            Self::AgentStartedSpeaking => "AgentStartedSpeaking",
            Self::ConversationText { .. } => "ConversationText",
            Self::AgentAudioDone => "AgentAudioDone",
            Self::AgentThinking { .. } => "AgentThinking",
            Self::FunctionCallRequest { .. } => "FunctionCallRequest",
            Self::Error { .. } => "Error",
            Self::Warning { .. } => "Warning",
            Self::AudioChunk(_) => "AudioChunk",
            Self::Unrecognized(_) => "Unrecognized",
        }
    }
}

/// One function the agent asks the client to run
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,

    /// JSON-encoded argument object
    #[serde(default = "empty_arguments", deserialize_with = "arguments_as_string")]
    pub arguments: String,

    #[serde(default)]
    pub client_side: Option<bool>,
}

impl FunctionCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            client_side: Some(true),
        }
    }

    /// Decode the argument object
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` if the arguments do not match `T`
    pub fn parse_arguments<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.arguments)
            .map_err(|e| Error::Tool(format!("invalid arguments for {}: {e}", self.name)))
    }
}

fn empty_arguments() -> String {
    "{}".to_string()
}

/// Accept arguments either as a JSON string or as an inline object
fn arguments_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => empty_arguments(),
        other => other.to_string(),
    })
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Tagged {
    Welcome {
        #[serde(default)]
        request_id: Option<String>,
    },
    SettingsApplied,
    UserStartedSpeaking,
    AgentStartedSpeaking,
    ConversationText {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: String,
    },
    AgentAudioDone,
    AgentThinking {
        #[serde(default)]
        content: String,
    },
    FunctionCallRequest(FunctionCallPayload),
    Error {
        #[serde(default, alias = "message")]
        description: String,
        #[serde(default)]
        code: Option<String>,
    },
    Warning {
        #[serde(default, alias = "message")]
        description: String,
    },
}

/// Current `functions` list, or the older single-call fields
#[derive(Deserialize)]
struct FunctionCallPayload {
    #[serde(default)]
    functions: Vec<FunctionCall>,
    #[serde(default)]
    function_name: Option<String>,
    #[serde(default)]
    function_call_id: Option<String>,
    #[serde(default)]
    input: Option<Value>,
}

impl FunctionCallPayload {
    fn into_calls(self) -> Vec<FunctionCall> {
        if !self.functions.is_empty() {
            return self.functions;
        }
        let Some(name) = self.function_name else {
            return Vec::new();
        };
        let arguments = match self.input {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => empty_arguments(),
            Some(other) => other.to_string(),
        };
        vec![FunctionCall {
            id: self.function_call_id.unwrap_or_default(),
            name,
            arguments,
            client_side: Some(true),
        }]
    }
}

impl From<Tagged> for SessionMessage {
    fn from(tagged: Tagged) -> Self {
        match tagged {
            Tagged::Welcome { request_id } => Self::Welcome { request_id },
            Tagged::SettingsApplied => Self::SettingsApplied,
            Tagged::UserStartedSpeaking => Self::UserStartedSpeaking,
            Tagged::AgentStartedSpeaking => Self::AgentStartedSpeaking,
            Tagged::ConversationText { role, content } => Self::ConversationText { role, content },
            Tagged::AgentAudioDone => Self::AgentAudioDone,
            Tagged::AgentThinking { content } => Self::AgentThinking { content },
            Tagged::FunctionCallRequest(payload) => Self::FunctionCallRequest {
                functions: payload.into_calls(),
            },
            Tagged::Error { description, code } => Self::Error { description, code },
            Tagged::Warning { description } => Self::Warning { description },
        }
    }
}

/// Outbound control message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Settings(Box<SettingsPayload>),
    FunctionCallResponse {
        id: String,
        name: String,
        content: String,
    },
    /// Make the agent speak `message` verbatim
    InjectAgentMessage { message: String },
    /// Replace the think prompt mid-session
    UpdatePrompt { prompt: String },
    KeepAlive,
}

impl ClientMessage {
    /// Serialize to a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Negotiated session settings, sent once after `Welcome`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsPayload {
    pub audio: AudioSettings,
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioSettings {
    pub input: AudioEncoding,
    pub output: AudioEncoding,
}

impl AudioSettings {
    /// Linear16 in both directions; output is raw (no container)
    #[must_use]
    pub fn linear16(input_rate: u32, output_rate: u32) -> Self {
        Self {
            input: AudioEncoding {
                encoding: "linear16".to_string(),
                sample_rate: input_rate,
                container: None,
            },
            output: AudioEncoding {
                encoding: "linear16".to_string(),
                sample_rate: output_rate,
                container: Some("none".to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioEncoding {
    pub encoding: String,
    pub sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSettings {
    pub language: String,
    pub listen: ProviderBlock,
    pub think: ThinkSettings,
    pub speak: ProviderBlock,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderBlock {
    pub provider: Provider,
}

impl ProviderBlock {
    #[must_use]
    pub fn new(kind: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: Provider {
                kind: kind.into(),
                model: model.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provider {
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinkSettings {
    pub provider: Provider,
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDefinition>,
}

/// Tool advertised to the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument object
    pub parameters: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            SessionMessage::from_text(r#"{"type":"Welcome","request_id":"r1"}"#),
            SessionMessage::Welcome {
                request_id: Some("r1".to_string())
            }
        );
        assert_eq!(
            SessionMessage::from_text(r#"{"type":"SettingsApplied"}"#),
            SessionMessage::SettingsApplied
        );
        assert_eq!(
            SessionMessage::from_text(
                r#"{"type":"AgentStartedSpeaking","total_latency":0.4,"tts_latency":0.1}"#
            ),
            SessionMessage::AgentStartedSpeaking
        );
        assert_eq!(
            SessionMessage::from_text(r#"{"type":"ConversationText","role":"agent","content":"hi"}"#),
            SessionMessage::ConversationText {
                role: "agent".to_string(),
                content: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_and_malformed_are_unrecognized() {
        let raw = r#"{"type":"History","items":[]}"#;
        assert_eq!(
            SessionMessage::from_text(raw),
            SessionMessage::Unrecognized(raw.to_string())
        );
        assert_eq!(
            SessionMessage::from_text("not json"),
            SessionMessage::Unrecognized("not json".to_string())
        );
        assert_eq!(
            SessionMessage::from_text("[1,2]"),
            SessionMessage::Unrecognized("[1,2]".to_string())
        );
    }

    #[test]
    fn test_binary_is_audio() {
        assert_eq!(
            SessionMessage::from_binary(vec![1, 2]),
            SessionMessage::AudioChunk(vec![1, 2])
        );
    }

    #[test]
    fn test_function_call_request_shapes() {
        let current = SessionMessage::from_text(
            r#"{"type":"FunctionCallRequest","functions":[
                {"id":"c1","name":"control_smart_home","arguments":"{\"device\":\"TV\",\"action\":\"on\"}","client_side":true}
            ]}"#,
        );
        let SessionMessage::FunctionCallRequest { functions } = current else {
            panic!("expected function call request");
        };
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].id, "c1");
        let args: Value = functions[0].parse_arguments().unwrap();
        assert_eq!(args, json!({"device": "TV", "action": "on"}));

        let legacy = SessionMessage::from_text(
            r#"{"type":"FunctionCallRequest","function_name":"switch_to_tech_mode","function_call_id":"c2","input":{}}"#,
        );
        assert_eq!(
            legacy,
            SessionMessage::FunctionCallRequest {
                functions: vec![FunctionCall::new("c2", "switch_to_tech_mode", "{}")]
            }
        );
    }

    #[test]
    fn test_settings_wire_shape() {
        let settings = SettingsPayload {
            audio: AudioSettings::linear16(44100, 16000),
            agent: AgentSettings {
                language: "en".to_string(),
                listen: ProviderBlock::new("deepgram", "nova-3"),
                think: ThinkSettings {
                    provider: Provider {
                        kind: "anthropic".to_string(),
                        model: "claude-3-5-haiku-latest".to_string(),
                    },
                    prompt: "be brief".to_string(),
                    functions: Vec::new(),
                },
                speak: ProviderBlock::new("deepgram", "aura-2-thalia-en"),
                greeting: None,
            },
        };

        let json: Value =
            serde_json::from_str(&ClientMessage::Settings(Box::new(settings)).to_json().unwrap())
                .unwrap();
        assert_eq!(json["type"], "Settings");
        assert_eq!(
            json["audio"],
            json!({
                "input": {"encoding": "linear16", "sample_rate": 44100},
                "output": {"encoding": "linear16", "sample_rate": 16000, "container": "none"}
            })
        );
        assert_eq!(json["agent"]["listen"]["provider"]["type"], "deepgram");
        assert!(json["agent"].get("greeting").is_none());
        assert!(json["agent"]["think"].get("functions").is_none());
    }

    #[test]
    fn test_function_call_response_wire_shape() {
        let msg = ClientMessage::FunctionCallResponse {
            id: "c1".to_string(),
            name: "control_smart_home".to_string(),
            content: r#"{"success":true}"#.to_string(),
        };
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!({
                "type": "FunctionCallResponse",
                "id": "c1",
                "name": "control_smart_home",
                "content": "{\"success\":true}"
            })
        );
    }
}
