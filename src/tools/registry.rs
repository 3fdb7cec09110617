//! Functions offered to the agent

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::smart_home::{DeviceAction, DeviceCommand, SmartHomeTrigger, normalize_device_name};
use super::{ToolDispatcher, ToolOutput};
use crate::prompt::PersonaMode;
use crate::session::{ClientMessage, FunctionCall, FunctionDefinition};
use crate::{Error, Result};

pub const CONTROL_SMART_HOME: &str = "control_smart_home";
pub const SWITCH_TO_TECH_MODE: &str = "switch_to_tech_mode";
pub const SWITCH_TO_PARENTING_MODE: &str = "switch_to_parenting_mode";

#[derive(Debug, Deserialize)]
struct SmartHomeArgs {
    device: String,
    action: DeviceAction,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    brightness: Option<Value>,
}

/// Smart home control plus persona switching
pub struct FunctionRegistry {
    devices: Vec<String>,
    trigger: Option<Arc<dyn SmartHomeTrigger>>,
}

impl FunctionRegistry {
    /// `devices` is the list offered to the agent; an empty list accepts any name.
    /// Without a trigger, smart home calls fail with a response.
    #[must_use]
    pub fn new(devices: Vec<String>, trigger: Option<Arc<dyn SmartHomeTrigger>>) -> Self {
        if trigger.is_none() {
            tracing::warn!("no smart home trigger configured, device control disabled");
        }
        Self { devices, trigger }
    }

    async fn control_smart_home(&self, call: &FunctionCall) -> Result<ToolOutput> {
        let args: SmartHomeArgs = call.parse_arguments()?;

        if !self.devices.is_empty() {
            let wanted = normalize_device_name(&args.device);
            if !self
                .devices
                .iter()
                .any(|d| normalize_device_name(d) == wanted)
            {
                return Err(Error::Tool(format!("unknown device: {}", args.device)));
            }
        }

        let trigger = self
            .trigger
            .as_ref()
            .ok_or_else(|| Error::Tool("smart home control is not configured".to_string()))?;

        let command = DeviceCommand::new(&args.device, args.action)?;
        if let Some(color) = &args.color {
            tracing::debug!(color, "color requested");
        }
        if let Some(brightness) = &args.brightness {
            tracing::debug!(%brightness, "brightness requested");
        }

        trigger.trigger(&command).await?;

        Ok(ToolOutput::success(&json!({
            "success": true,
            "device": args.device,
            "action": args.action.as_str(),
        })))
    }

    fn switch_mode(mode: PersonaMode) -> ToolOutput {
        tracing::info!(mode = %mode, "switching persona");
        ToolOutput::success(&json!({ "success": true, "mode": mode.as_str() })).with_follow_up(
            ClientMessage::UpdatePrompt {
                prompt: mode.prompt_for_today(),
            },
        )
    }
}

#[async_trait]
impl ToolDispatcher for FunctionRegistry {
    fn definitions(&self) -> Vec<FunctionDefinition> {
        let mut device = json!({
            "type": "string",
            "description": "The smart home device to control, e.g. 'bedroom light' or 'living room lamp'"
        });
        if !self.devices.is_empty() {
            device["enum"] = json!(self.devices);
        }
        let actions: Vec<&str> = DeviceAction::ALL.into_iter().map(DeviceAction::as_str).collect();

        vec![
            FunctionDefinition {
                name: SWITCH_TO_TECH_MODE.to_string(),
                description: "Call this whenever the user asks about AI, machine learning, \
                    programming, software, cryptocurrency, databases or other technical topics."
                    .to_string(),
                parameters: json!({ "type": "object", "properties": {}, "required": [] }),
            },
            FunctionDefinition {
                name: SWITCH_TO_PARENTING_MODE.to_string(),
                description: "Call this whenever the user asks about child development, \
                    parenting, children's health, or mentions their child."
                    .to_string(),
                parameters: json!({ "type": "object", "properties": {}, "required": [] }),
            },
            FunctionDefinition {
                name: CONTROL_SMART_HOME.to_string(),
                description: "Control smart home lights and lamps: turn them on or off, \
                    change their color or adjust brightness."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "device": device,
                        "action": {
                            "type": "string",
                            "description": "What to do with the device",
                            "enum": actions
                        }
                    },
                    "required": ["device", "action"]
                }),
            },
        ]
    }

    async fn dispatch(&self, call: &FunctionCall) -> Result<ToolOutput> {
        match call.name.as_str() {
            CONTROL_SMART_HOME => self.control_smart_home(call).await,
            SWITCH_TO_TECH_MODE => Ok(Self::switch_mode(PersonaMode::Technical)),
            SWITCH_TO_PARENTING_MODE => Ok(Self::switch_mode(PersonaMode::Parenting)),
            other => Err(Error::Tool(format!("unknown function: {other}"))),
        }
    }
}
