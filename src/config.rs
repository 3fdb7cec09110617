//! Configuration management for the Marlene assistant
//!
//! Values come from an optional TOML file, then environment variables.
//! A `.env` file in the working directory is loaded before the environment
//! is read.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::prompt::PersonaMode;
use crate::{Error, Result};

/// Default Deepgram agent endpoint
pub const DEFAULT_AGENT_URL: &str = "wss://agent.deepgram.com/v1/agent/converse";

/// Default `VoiceMonkey` API base
pub const DEFAULT_TRIGGER_URL: &str = "https://api-v2.voicemonkey.io";

/// Assistant configuration
#[derive(Debug, Default)]
pub struct Config {
    pub audio: AudioConfig,
    pub wake: WakeConfig,
    pub session: SessionConfig,
    pub agent: AgentConfig,
    pub smart_home: SmartHomeConfig,

    /// API keys (never serialized)
    pub api_keys: ApiKeys,

    /// File the configuration was read from, if any
    pub source: Option<PathBuf>,
}

/// Audio stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Microphone channel count
    pub input_channels: u16,

    /// Capture frame length in milliseconds
    pub chunk_ms: u64,

    /// Agent output sample rate
    pub output_sample_rate: u32,

    pub output_channels: u16,

    /// Prefer devices whose name contains "usb"
    pub prefer_usb: bool,

    /// Maximum queued playback frames
    pub playback_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_channels: 1,
            chunk_ms: 50,
            output_sample_rate: 16000,
            output_channels: 1,
            prefer_usb: true,
            playback_capacity: 512,
        }
    }
}

impl AudioConfig {
    #[must_use]
    pub const fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_ms)
    }
}

/// Wake word configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    /// Phrases that open a session (matched case-insensitively)
    pub keywords: Vec<String>,

    /// Detector sensitivity in [0, 1]; higher triggers on quieter speech
    pub sensitivity: f32,

    /// STT model used to confirm the keyword
    pub stt_model: String,

    /// Sample rate the detector listens at
    pub sample_rate: u32,

    /// Samples per detector frame
    pub frame_length: usize,

    /// Sleep between checks while paused
    pub poll_interval_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            keywords: vec!["hey marlene".to_string(), "marlene".to_string()],
            sensitivity: 0.5,
            stt_model: "nova-3".to_string(),
            sample_rate: 16000,
            frame_length: 512,
            poll_interval_ms: 100,
        }
    }
}

impl WakeConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Voice session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Close the session after this long without an inbound message
    pub inactivity_timeout_secs: u64,

    /// Hard cap on a session's lifetime
    pub max_duration_secs: Option<u64>,

    /// Bound on joining session loops during teardown
    pub teardown_timeout_ms: u64,

    /// Inject the filler once the agent has been thinking this long
    pub thinking_grace_ms: Option<u64>,

    /// Filler utterance spoken while the agent thinks
    pub filler_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 30,
            max_duration_secs: None,
            teardown_timeout_ms: 2000,
            thinking_grace_ms: Some(2500),
            filler_message: "One moment.".to_string(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    #[must_use]
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub const fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    #[must_use]
    pub fn thinking_grace(&self) -> Option<Duration> {
        self.thinking_grace_ms.map(Duration::from_millis)
    }
}

/// Remote agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub url: String,
    pub language: String,
    pub listen_provider: String,
    pub listen_model: String,
    pub think_provider: String,
    pub think_model: String,
    pub speak_provider: String,
    pub speak_model: String,
    pub greeting: Option<String>,

    /// Persona the session starts in
    pub mode: PersonaMode,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_AGENT_URL.to_string(),
            language: "en".to_string(),
            listen_provider: "deepgram".to_string(),
            listen_model: "nova-3".to_string(),
            think_provider: "anthropic".to_string(),
            think_model: "claude-3-5-haiku-latest".to_string(),
            speak_provider: "deepgram".to_string(),
            speak_model: "aura-2-thalia-en".to_string(),
            greeting: Some("Hi, I'm Marlene. How can I help?".to_string()),
            mode: PersonaMode::Default,
        }
    }
}

/// Smart home trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartHomeConfig {
    pub base_url: String,
    pub timeout_secs: u64,

    /// Device names offered to the agent
    pub devices: Vec<String>,
}

impl Default for SmartHomeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TRIGGER_URL.to_string(),
            timeout_secs: 5,
            devices: [
                "Living Room Lights",
                "Kitchen Lights",
                "Bedroom Lights",
                "Kids' Room Lights",
                "Office Lamp",
                "TV",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl SmartHomeConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// API keys for external services
#[derive(Debug, Default)]
pub struct ApiKeys {
    /// `Deepgram` key for the agent and keyword transcription
    pub deepgram: Option<SecretString>,

    /// `VoiceMonkey` trigger token
    pub voicemonkey: Option<SecretString>,
}

/// On-disk shape of the config file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    audio: AudioConfig,
    wake: WakeConfig,
    session: SessionConfig,
    agent: AgentConfig,
    smart_home: SmartHomeConfig,
    keys: FileKeys,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileKeys {
    deepgram: Option<String>,
    voicemonkey: Option<String>,
}

/// Platform config file location (`~/.config/marlene/config.toml` on Linux)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "marlene", "marlene")
        .map(|d| d.config_dir().join("config.toml"))
}

impl Config {
    /// Load configuration from `path` (or the platform default) and the environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit file cannot be read, the file is not valid
    /// TOML, or the resolved values fail validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            tracing::warn!(error = %e, "failed to load .env file");
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    tracing::debug!("no config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML config file without consulting the environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let mut config = Self::from_toml_str(&content)?;
        config.source = Some(path.to_path_buf());
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Parse TOML config text
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid config TOML
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: FileConfig = toml::from_str(content)?;
        Ok(Self {
            audio: file.audio,
            wake: file.wake,
            session: file.session,
            agent: file.agent,
            smart_home: file.smart_home,
            api_keys: ApiKeys {
                deepgram: file.keys.deepgram.map(SecretString::from),
                voicemonkey: file.keys.voicemonkey.map(SecretString::from),
            },
            source: None,
        })
    }

    /// Override values from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if a numeric or enum variable cannot be parsed
    pub fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(key) = get("DEEPGRAM_API_KEY").filter(|k| !k.is_empty()) {
            self.api_keys.deepgram = Some(SecretString::from(key));
        }
        if let Some(token) = get("VOICEMONKEY_API_TOKEN").filter(|k| !k.is_empty()) {
            self.api_keys.voicemonkey = Some(SecretString::from(token));
        }

        if let Some(url) = get("MARLENE_AGENT_URL") {
            self.agent.url = url;
        }
        if let Some(mode) = get("MARLENE_PROMPT_MODE") {
            self.agent.mode = mode.parse()?;
        }
        if let Some(keywords) = get("MARLENE_WAKE_KEYWORDS") {
            self.wake.keywords = keywords
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(value) = get("MARLENE_WAKE_SENSITIVITY") {
            self.wake.sensitivity = parse_env("MARLENE_WAKE_SENSITIVITY", &value)?;
        }
        if let Some(value) = get("MARLENE_INACTIVITY_TIMEOUT") {
            self.session.inactivity_timeout_secs =
                parse_env("MARLENE_INACTIVITY_TIMEOUT", &value)?;
        }
        if let Some(value) = get("MARLENE_MAX_SESSION_SECS") {
            self.session.max_duration_secs = Some(parse_env("MARLENE_MAX_SESSION_SECS", &value)?);
        }
        if let Some(value) = get("MARLENE_PREFER_USB") {
            self.audio.prefer_usb = parse_env("MARLENE_PREFER_USB", &value)?;
        }

        Ok(())
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.wake.sensitivity) {
            return Err(Error::Config(format!(
                "wake.sensitivity must be within [0, 1], got {}",
                self.wake.sensitivity
            )));
        }
        if self.wake.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(Error::Config("wake.keywords must not be empty".to_string()));
        }
        if self.wake.frame_length == 0 || self.wake.sample_rate == 0 {
            return Err(Error::Config(
                "wake.frame_length and wake.sample_rate must be non-zero".to_string(),
            ));
        }
        if self.session.inactivity_timeout_secs == 0 {
            return Err(Error::Config(
                "session.inactivity_timeout_secs must be non-zero".to_string(),
            ));
        }
        if self.session.max_duration_secs == Some(0) {
            return Err(Error::Config(
                "session.max_duration_secs must be non-zero when set".to_string(),
            ));
        }
        if self.session.teardown_timeout_ms == 0 || self.smart_home.timeout_secs == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.audio.chunk_ms == 0 || self.audio.input_channels == 0 {
            return Err(Error::Config(
                "audio.chunk_ms and audio.input_channels must be non-zero".to_string(),
            ));
        }
        if self.audio.output_sample_rate == 0 || self.audio.output_channels == 0 {
            return Err(Error::Config(
                "audio output rate and channels must be non-zero".to_string(),
            ));
        }
        if self.audio.playback_capacity == 0 {
            return Err(Error::Config(
                "audio.playback_capacity must be non-zero".to_string(),
            ));
        }
        url::Url::parse(&self.agent.url)
            .map_err(|e| Error::Config(format!("invalid agent.url: {e}")))?;
        url::Url::parse(&self.smart_home.base_url)
            .map_err(|e| Error::Config(format!("invalid smart_home.base_url: {e}")))?;
        Ok(())
    }

    /// Render the resolved configuration with secrets redacted
    ///
    /// # Errors
    ///
    /// Returns error if a section cannot be serialized
    pub fn redacted(&self) -> Result<String> {
        #[derive(Serialize)]
        struct View<'a> {
            audio: &'a AudioConfig,
            wake: &'a WakeConfig,
            session: &'a SessionConfig,
            agent: &'a AgentConfig,
            smart_home: &'a SmartHomeConfig,
            keys: KeysView,
        }

        #[derive(Serialize)]
        struct KeysView {
            deepgram: &'static str,
            voicemonkey: &'static str,
        }

        const fn presence<T>(value: Option<&T>) -> &'static str {
            if value.is_some() { "set" } else { "missing" }
        }

        let view = View {
            audio: &self.audio,
            wake: &self.wake,
            session: &self.session,
            agent: &self.agent,
            smart_home: &self.smart_home,
            keys: KeysView {
                deepgram: presence(self.api_keys.deepgram.as_ref()),
                voicemonkey: presence(self.api_keys.voicemonkey.as_ref()),
            },
        };

        toml::to_string_pretty(&view).map_err(|e| Error::Config(e.to_string()))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid {key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.audio.output_sample_rate, 16000);
        assert_eq!(config.audio.chunk_duration(), Duration::from_millis(50));
        assert_eq!(config.agent.url, DEFAULT_AGENT_URL);
        assert_eq!(config.smart_home.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [session]
            inactivity_timeout_secs = 12

            [wake]
            keywords = ["computer"]

            [keys]
            deepgram = "dg-file"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.inactivity_timeout(), Duration::from_secs(12));
        assert_eq!(config.wake.keywords, vec!["computer"]);
        assert!((config.wake.sensitivity - 0.5).abs() < f32::EPSILON);
        assert_eq!(
            config.api_keys.deepgram.as_ref().unwrap().expose_secret(),
            "dg-file"
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::from_toml_str("[keys]\ndeepgram = \"dg-file\"\n").unwrap();
        config
            .apply_env(env(&[
                ("DEEPGRAM_API_KEY", "dg-env"),
                ("MARLENE_WAKE_KEYWORDS", "hey computer, jarvis ,"),
                ("MARLENE_INACTIVITY_TIMEOUT", "45"),
                ("MARLENE_PROMPT_MODE", "technical"),
            ]))
            .unwrap();

        assert_eq!(
            config.api_keys.deepgram.as_ref().unwrap().expose_secret(),
            "dg-env"
        );
        assert_eq!(config.wake.keywords, vec!["hey computer", "jarvis"]);
        assert_eq!(config.session.inactivity_timeout_secs, 45);
        assert_eq!(config.agent.mode, PersonaMode::Technical);
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("MARLENE_INACTIVITY_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation_rejects_out_of_range() {
        let mut config = Config::default();
        config.wake.sensitivity = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.wake.keywords = vec![" ".to_string()];
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.session.inactivity_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = Config::default();
        config.api_keys.deepgram = Some(SecretString::from("super-secret".to_string()));
        let rendered = config.redacted().unwrap();
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("deepgram = \"set\""));
        assert!(rendered.contains("voicemonkey = \"missing\""));
    }

    #[test]
    fn test_from_file_records_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio]\nprefer_usb = false\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert!(!config.audio.prefer_usb);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(matches!(
            Config::from_toml_str("[audio\n"),
            Err(Error::Toml(_))
        ));
    }
}
