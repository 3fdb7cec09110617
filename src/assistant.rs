//! Top-level assistant loop
//!
//! Alternates between the wake word gate and voice sessions: the gate owns
//! the microphone while idle, hands it over on a keyword, and resumes once
//! the session has released every stream.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::FusedFuture;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Config;
use crate::session::{
    AgentSettings, Connector, DeepgramConnector, Provider, ProviderBlock, SessionSettings,
    SessionSummary, ThinkSettings, ThinkingFiller, VoiceSession,
};
use crate::tools::{FunctionRegistry, SmartHomeTrigger, ToolDispatcher, VoiceMonkeyTrigger};
use crate::voice::{AudioDevice, CpalDevice, GateOptions, KeywordDetector, PlaybackConfig, WakeWordGate};
use crate::{Error, Result};

/// Wake word gate plus session factory
pub struct Assistant {
    device: Arc<dyn AudioDevice>,
    connector: Arc<dyn Connector>,
    tools: Arc<dyn ToolDispatcher>,
    settings: Arc<SessionSettings>,
    inactivity_timeout: Duration,
}

impl Assistant {
    #[must_use]
    pub fn new(
        device: Arc<dyn AudioDevice>,
        connector: Arc<dyn Connector>,
        tools: Arc<dyn ToolDispatcher>,
        settings: Arc<SessionSettings>,
        inactivity_timeout: Duration,
    ) -> Self {
        Self {
            device,
            connector,
            tools,
            settings,
            inactivity_timeout,
        }
    }

    /// Wire the real audio device, agent connection and smart home client
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the Deepgram key is missing or a client
    /// cannot be built
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = config
            .api_keys
            .deepgram
            .as_ref()
            .ok_or_else(|| Error::Config("DEEPGRAM_API_KEY is required".to_string()))?;
        let connector = DeepgramConnector::new(
            config.agent.url.clone(),
            SecretString::from(api_key.expose_secret().to_string()),
        );

        let trigger: Option<Arc<dyn SmartHomeTrigger>> = match &config.api_keys.voicemonkey {
            Some(token) => Some(Arc::new(VoiceMonkeyTrigger::new(
                &config.smart_home.base_url,
                SecretString::from(token.expose_secret().to_string()),
                config.smart_home.timeout(),
            )?)),
            None => None,
        };
        let tools = FunctionRegistry::new(config.smart_home.devices.clone(), trigger);
        let settings = session_settings(config, &tools);

        Ok(Self::new(
            Arc::new(CpalDevice::new(config.audio.prefer_usb)),
            Arc::new(connector),
            Arc::new(tools),
            Arc::new(settings),
            config.session.inactivity_timeout(),
        ))
    }

    #[must_use]
    pub fn device(&self) -> Arc<dyn AudioDevice> {
        Arc::clone(&self.device)
    }

    fn session(&self) -> VoiceSession {
        VoiceSession::new(
            Arc::clone(&self.device),
            Arc::clone(&self.connector),
            Arc::clone(&self.tools),
            Arc::clone(&self.settings),
        )
    }

    /// Run one session immediately, without waiting for a keyword
    ///
    /// # Errors
    ///
    /// Returns error if the session fails
    pub async fn talk(&self, shutdown: impl Future<Output = ()>) -> Result<SessionSummary> {
        let session = self.session();
        run_session(&session, self.inactivity_timeout, shutdown).await
    }

    /// Scan for keywords and run a session per detection until `shutdown`
    ///
    /// # Errors
    ///
    /// Returns error if the microphone cannot be opened at startup. Session
    /// failures are logged and the gate resumes.
    pub async fn run(
        &self,
        detector: Box<dyn KeywordDetector>,
        options: GateOptions,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let (gate, mut events) = WakeWordGate::start(Arc::clone(&self.device), detector, options)?;
        let shutdown = shutdown.fuse();
        tokio::pin!(shutdown);

        while !shutdown.is_terminated() {
            let event = tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                tracing::warn!("wake word gate stopped");
                break;
            };

            tracing::info!(keyword = event.keyword(), "wake word detected, starting session");
            let session = self.session();
            let result = run_session(&session, self.inactivity_timeout, &mut shutdown).await;
            match result {
                Ok(summary) => tracing::info!(
                    session_id = %summary.id,
                    reason = %summary.reason,
                    "session ended, listening for wake word"
                ),
                Err(e) => tracing::error!(error = %e, "session failed, listening for wake word"),
            }

            // Streams are released by now; the gate may reopen the microphone
            event.complete();
        }

        gate.stop().await;
        tracing::info!("assistant stopped");
        Ok(())
    }
}

/// Drive `session` to completion, closing it if `shutdown` resolves first
async fn run_session(
    session: &VoiceSession,
    inactivity_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<SessionSummary> {
    let listen = session.listen(inactivity_timeout);
    tokio::pin!(listen);
    tokio::pin!(shutdown);

    tokio::select! {
        result = &mut listen => result,
        () = &mut shutdown => {
            tracing::info!("shutdown requested, closing session");
            session.close();
            listen.await
        }
    }
}

/// Session settings derived from configuration and the advertised functions
#[must_use]
pub fn session_settings(config: &Config, tools: &dyn ToolDispatcher) -> SessionSettings {
    let agent = &config.agent;
    let filler = config.session.thinking_grace().map(|grace| ThinkingFiller {
        grace,
        message: config.session.filler_message.clone(),
    });

    SessionSettings {
        input_channels: config.audio.input_channels,
        chunk_duration: config.audio.chunk_duration(),
        output_sample_rate: config.audio.output_sample_rate,
        output_channels: config.audio.output_channels,
        playback: PlaybackConfig {
            capacity: config.audio.playback_capacity,
            ..PlaybackConfig::default()
        },
        agent: AgentSettings {
            language: agent.language.clone(),
            listen: ProviderBlock::new(&agent.listen_provider, &agent.listen_model),
            think: ThinkSettings {
                provider: Provider {
                    kind: agent.think_provider.clone(),
                    model: agent.think_model.clone(),
                },
                prompt: agent.mode.prompt_for_today(),
                functions: tools.definitions(),
            },
            speak: ProviderBlock::new(&agent.speak_provider, &agent.speak_model),
            greeting: agent.greeting.clone(),
        },
        filler,
        teardown_timeout: config.session.teardown_timeout(),
        max_duration: config.session.max_duration(),
    }
}
