//! Persona prompts sent to the agent's think provider

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::Error;

const SPOKEN_FORMAT: &str = "\
Everything you say is played through text-to-speech. Never use markdown, \
asterisks, bullet points or numbered lists. Speak in plain flowing sentences \
and use spoken transitions such as \"first\" or \"also\" instead of list markers.";

const DEFAULT_PERSONA: &str = "\
You are Marlene, a warm and casual household voice assistant. You control the \
smart home lights and lamps and chat about anything from parenting to \
technology. After switching a device, confirm with a couple of words such as \
\"done\" or \"sure thing\" and stop; do not offer further help. When a \
conversation settles into parenting or technology, you may switch to the \
matching specialist mode.";

const PARENTING_PERSONA: &str = "\
You are Marlene, speaking as an experienced pediatrician and child development \
specialist. Give practical, evidence-based guidance on sleep, feeding, \
behaviour and milestones, acknowledge how tiring parenting can be, and suggest \
seeing the family doctor whenever symptoms sound urgent. Keep answers short \
enough to listen to comfortably.";

const TECHNICAL_PERSONA: &str = "\
You are Marlene, a technical specialist in software engineering, AI and \
emerging technology. Go deep when asked, explain trade-offs honestly, and \
prefer concrete examples over abstractions. Keep explanations conversational \
since they are heard, not read.";

/// Persona the agent speaks as
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaMode {
    #[default]
    Default,
    Parenting,
    Technical,
}

impl PersonaMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Parenting => "parenting",
            Self::Technical => "technical",
        }
    }

    /// Full think prompt for this persona, dated `today`
    #[must_use]
    pub fn prompt(self, today: NaiveDate) -> String {
        let persona = match self {
            Self::Default => DEFAULT_PERSONA,
            Self::Parenting => PARENTING_PERSONA,
            Self::Technical => TECHNICAL_PERSONA,
        };
        format!(
            "{persona}\n\n{SPOKEN_FORMAT}\n\nToday is {}.",
            today.format("%A, %B %d, %Y")
        )
    }

    /// Prompt dated with the local date
    #[must_use]
    pub fn prompt_for_today(self) -> String {
        self.prompt(chrono::Local::now().date_naive())
    }
}

impl fmt::Display for PersonaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonaMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "parenting" => Ok(Self::Parenting),
            "technical" | "tech" => Ok(Self::Technical),
            other => Err(Error::Config(format!("unknown persona mode: {other}"))),
        }
    }
}
