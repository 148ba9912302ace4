//! The recognized credential providers and their worker env-var mapping.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// An LLM credential provider recognized by the keystore.
///
/// The set is closed on the wire: [`Provider::from_str`] rejects unknown
/// tags with `InvalidProvider` instead of silently mapping to [`Provider::Other`].
/// `Other` is reserved for credentials the operator explicitly files as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// OpenAI API keys.
    Openai,
    /// Anthropic API keys.
    Anthropic,
    /// Google AI / Gemini API keys.
    Google,
    /// Mistral API keys.
    Mistral,
    /// Groq API keys.
    Groq,
    /// Anything else the operator wants to store.
    Other,
}

impl Provider {
    /// All recognized wire names, in declaration order.
    pub const ALL: [Provider; 6] = [
        Provider::Openai,
        Provider::Anthropic,
        Provider::Google,
        Provider::Mistral,
        Provider::Groq,
        Provider::Other,
    ];

    /// The wire name of this provider.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Mistral => "mistral",
            Provider::Groq => "groq",
            Provider::Other => "other",
        }
    }

    /// The environment variable a worker expects this credential under.
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Openai => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Google => "GOOGLE_API_KEY",
            Provider::Mistral => "MISTRAL_API_KEY",
            Provider::Groq => "GROQ_API_KEY",
            Provider::Other => "ARMORCLAW_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::Openai),
            "anthropic" => Ok(Provider::Anthropic),
            "google" => Ok(Provider::Google),
            "mistral" => Ok(Provider::Mistral),
            "groq" => Ok(Provider::Groq),
            "other" => Ok(Provider::Other),
            unknown => Err(BridgeError::InvalidProvider(unknown.to_string())),
        }
    }
}
