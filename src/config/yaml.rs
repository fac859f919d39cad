use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::errors::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override the ones loaded from the environment.
///
/// # Example YAML structure
/// ```yaml
/// agent:
///   id: "agent_123"
///   user_id: "user-42"
///
/// connection:
///   server_location: "eu-residency"
///   type: "webrtc"
///   text_only: false
///   api_key: "your-api-key"
///
/// audio:
///   mic_muted: false
///   volume: 0.8
///
/// events:
///   buffer: 256
///
/// dynamic_variables:
///   customer_name: "Ada"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub agent: Option<AgentYaml>,
    pub connection: Option<ConnectionYaml>,
    pub audio: Option<AudioYaml>,
    pub events: Option<EventsYaml>,
    pub dynamic_variables: HashMap<String, serde_json::Value>,
}

/// Agent selection from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentYaml {
    pub id: Option<String>,
    /// Pre-signed conversation URL; takes precedence over `id`
    pub signed_url: Option<String>,
    pub user_id: Option<String>,
}

/// Connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ConnectionYaml {
    pub server_location: Option<String>,
    #[serde(rename = "type")]
    pub connection_type: Option<String>,
    pub text_only: Option<bool>,
    pub api_key: Option<String>,
}

/// Initial controlled-field values from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub mic_muted: Option<bool>,
    pub volume: Option<f32>,
}

/// Event stream settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EventsYaml {
    pub buffer: Option<usize>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }

    /// Parse YAML configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }
}
