//! Client-side functions the agent can call
//!
//! Every call answers with a JSON string of the form `{"success":true,...}`
//! or `{"success":false,"error":"..."}`.

mod registry;
mod smart_home;

use async_trait::async_trait;
use serde_json::{Value, json};

pub use registry::{
    CONTROL_SMART_HOME, FunctionRegistry, SWITCH_TO_PARENTING_MODE, SWITCH_TO_TECH_MODE,
};
pub use smart_home::{
    DeviceAction, DeviceCommand, SmartHomeTrigger, VoiceMonkeyTrigger, normalize_device_name,
};

use crate::Result;
use crate::session::{ClientMessage, FunctionCall, FunctionDefinition};

/// Result of one function call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// `FunctionCallResponse` content
    pub content: String,
    /// Message sent right after the response
    pub follow_up: Option<ClientMessage>,
}

impl ToolOutput {
    /// Successful result carrying `body`, which should include `"success": true`
    #[must_use]
    pub fn success(body: &Value) -> Self {
        Self {
            content: body.to_string(),
            follow_up: None,
        }
    }

    /// Failed result reporting `error`
    #[must_use]
    pub fn failure(error: &str) -> Self {
        Self {
            content: json!({ "success": false, "error": error }).to_string(),
            follow_up: None,
        }
    }

    #[must_use]
    pub fn with_follow_up(mut self, message: ClientMessage) -> Self {
        self.follow_up = Some(message);
        self
    }
}

/// Executes agent function calls
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Functions advertised in the session settings
    fn definitions(&self) -> Vec<FunctionDefinition>;

    /// Run one call to completion
    ///
    /// # Errors
    ///
    /// Returns error if the call is unknown, malformed, or its side effect
    /// fails; the session still answers the agent with a failure response
    async fn dispatch(&self, call: &FunctionCall) -> Result<ToolOutput>;
}
