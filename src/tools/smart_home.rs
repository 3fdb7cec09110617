//! Smart home device triggers

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::{Error, Result};

/// Convert a spoken device name to its trigger form
///
/// `"Kids' Room Lights"` becomes `"kids-room-lights"`.
#[must_use]
pub fn normalize_device_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "-").replace('\'', "")
}

/// Action requested on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DeviceAction {
    #[serde(rename = "on")]
    On,
    #[serde(rename = "off")]
    Off,
    #[serde(rename = "change color")]
    ChangeColor,
    #[serde(rename = "change brightness")]
    ChangeBrightness,
}

impl DeviceAction {
    pub const ALL: [Self; 4] = [Self::On, Self::Off, Self::ChangeColor, Self::ChangeBrightness];

    /// Wire name used in the function schema
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::ChangeColor => "change color",
            Self::ChangeBrightness => "change brightness",
        }
    }

    const fn suffix(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::ChangeColor => "color",
            Self::ChangeBrightness => "brightness",
        }
    }
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized device plus action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    device: String,
    action: DeviceAction,
}

impl DeviceCommand {
    /// # Errors
    ///
    /// Returns `Error::Tool` if the device name is empty after normalization
    pub fn new(device: &str, action: DeviceAction) -> Result<Self> {
        let device = normalize_device_name(device);
        if device.is_empty() {
            return Err(Error::Tool("device name is empty".to_string()));
        }
        Ok(Self { device, action })
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    #[must_use]
    pub const fn action(&self) -> DeviceAction {
        self.action
    }

    /// Trigger name, e.g. `living-room-lights-on`
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}-{}", self.device, self.action.suffix())
    }
}

/// Sends device commands to the home automation service
#[async_trait]
pub trait SmartHomeTrigger: Send + Sync {
    /// Fire one command with a bounded timeout
    ///
    /// # Errors
    ///
    /// Returns `Error::Tool` on timeout, transport failure or a non-success status
    async fn trigger(&self, command: &DeviceCommand) -> Result<()>;
}

/// `VoiceMonkey` trigger API client
pub struct VoiceMonkeyTrigger {
    client: reqwest::Client,
    base_url: Url,
    token: SecretString,
}

impl VoiceMonkeyTrigger {
    /// # Errors
    ///
    /// Returns error if `base_url` is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, token: SecretString, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| Error::Config(format!("invalid smart home base url: {e}")))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Full trigger URL for `command`
    ///
    /// # Errors
    ///
    /// Returns error if the URL cannot be built
    fn trigger_url(&self, command: &DeviceCommand) -> Result<Url> {
        let mut url = self
            .base_url
            .join("trigger")
            .map_err(|e| Error::Tool(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("token", self.token.expose_secret())
            .append_pair("device", &command.endpoint());
        Ok(url)
    }
}

#[async_trait]
impl SmartHomeTrigger for VoiceMonkeyTrigger {
    async fn trigger(&self, command: &DeviceCommand) -> Result<()> {
        let endpoint = command.endpoint();
        tracing::info!(endpoint = %endpoint, "triggering smart home device");

        // Strip URLs from errors: they carry the token
        let response = self
            .client
            .get(self.trigger_url(command)?)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Tool(format!("smart home trigger {endpoint} timed out"))
                } else {
                    Error::Tool(e.without_url().to_string())
                }
            })?;

        response
            .error_for_status()
            .map_err(|e| Error::Tool(e.without_url().to_string()))?;

        tracing::info!(endpoint = %endpoint, "smart home device triggered");
        Ok(())
    }
}
