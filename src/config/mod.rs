//! Configuration module for conversation sessions
//!
//! Configuration comes from three places, highest priority first:
//!
//! 1. Per-call [`SessionOptions`] passed to `begin()`
//! 2. A YAML file ([`ConversationConfig::from_file`])
//! 3. Environment variables (`CONVAI_*`, with `.env` loaded by the binary)
//!
//! [`ConversationConfig::resolve`] merges the per-call options over the
//! configured defaults and derives the connection URL the session library
//! needs.
//!
//! # Example
//! ```rust,no_run
//! use waav_conversation::config::{ConversationConfig, SessionOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConversationConfig::from_env()?;
//! let resolved = config.resolve(&SessionOptions {
//!     agent_id: Some("agent_123".to_string()),
//!     ..Default::default()
//! })?;
//! println!("Connecting to {}", resolved.url);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

mod location;
mod yaml;

pub use location::{ConnectionType, ServerLocation};
pub use yaml::YamlConfig;

use crate::errors::{ConfigError, ConversationError};

/// Default capacity of the conversation event broadcast channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Path of the conversation endpoint relative to the API origin
pub const CONVERSATION_PATH: &str = "/v1/convai/conversation";

/// Defaults applied to every session a controller opens
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub agent_id: Option<String>,
    pub api_key: Option<String>,
    /// Pre-signed conversation URL; used verbatim when present
    pub signed_url: Option<String>,
    pub server_location: ServerLocation,
    pub connection_type: ConnectionType,
    /// Open text-only sessions (no audio devices)
    pub text_only: bool,
    pub user_id: Option<String>,
    /// Initial mic-muted value applied to every new session
    pub mic_muted: Option<bool>,
    /// Initial output volume applied to every new session (0.0 - 1.0)
    pub volume: Option<f32>,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
    pub dynamic_variables: HashMap<String, serde_json::Value>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            api_key: None,
            signed_url: None,
            server_location: ServerLocation::default(),
            connection_type: ConnectionType::default(),
            text_only: false,
            user_id: None,
            mic_muted: None,
            volume: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            dynamic_variables: HashMap::new(),
        }
    }
}

/// Per-call overrides for a single `begin()`
///
/// Every field left unset falls back to the controller's
/// [`ConversationConfig`]. Dynamic variables are merged key by key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub agent_id: Option<String>,
    pub signed_url: Option<String>,
    pub server_location: Option<ServerLocation>,
    pub connection_type: Option<ConnectionType>,
    pub text_only: Option<bool>,
    pub user_id: Option<String>,
    pub dynamic_variables: HashMap<String, serde_json::Value>,
}

/// Fully merged configuration handed to the session library
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSessionConfig {
    /// URL the session library connects to
    pub url: Url,
    pub agent_id: Option<String>,
    pub api_key: Option<String>,
    pub server_location: ServerLocation,
    pub connection_type: ConnectionType,
    pub text_only: bool,
    pub user_id: Option<String>,
    pub dynamic_variables: HashMap<String, serde_json::Value>,
}

impl ConversationConfig {
    /// Load configuration from environment variables
    ///
    /// Recognised variables: `CONVAI_AGENT_ID`, `CONVAI_API_KEY`,
    /// `CONVAI_SIGNED_URL`, `CONVAI_SERVER_LOCATION`, `CONVAI_CONNECTION_TYPE`,
    /// `CONVAI_TEXT_ONLY`, `CONVAI_USER_ID`, `CONVAI_MIC_MUTED`,
    /// `CONVAI_VOLUME`, `CONVAI_EVENT_BUFFER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            agent_id: env_string("CONVAI_AGENT_ID"),
            api_key: env_string("CONVAI_API_KEY"),
            signed_url: env_string("CONVAI_SIGNED_URL"),
            user_id: env_string("CONVAI_USER_ID"),
            ..Default::default()
        };

        if let Some(location) = env_string("CONVAI_SERVER_LOCATION") {
            config.server_location = location.parse()?;
        }
        if let Some(connection_type) = env_string("CONVAI_CONNECTION_TYPE") {
            config.connection_type = connection_type.parse()?;
        }
        if let Some(text_only) = env_parse::<bool>("CONVAI_TEXT_ONLY", "text_only")? {
            config.text_only = text_only;
        }
        config.mic_muted = env_parse("CONVAI_MIC_MUTED", "mic_muted")?;
        config.volume = env_parse("CONVAI_VOLUME", "volume")?;
        if let Some(buffer) = env_parse("CONVAI_EVENT_BUFFER", "event_buffer")? {
            config.event_buffer = buffer;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variables as the base
    ///
    /// Values present in the YAML file override the environment.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let mut config = Self::from_env()?;
        config.apply_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, yaml: YamlConfig) -> Result<(), ConfigError> {
        if let Some(agent) = yaml.agent {
            if agent.id.is_some() {
                self.agent_id = agent.id;
            }
            if agent.signed_url.is_some() {
                self.signed_url = agent.signed_url;
            }
            if agent.user_id.is_some() {
                self.user_id = agent.user_id;
            }
        }

        if let Some(connection) = yaml.connection {
            if let Some(location) = connection.server_location {
                self.server_location = location.parse()?;
            }
            if let Some(connection_type) = connection.connection_type {
                self.connection_type = connection_type.parse()?;
            }
            if let Some(text_only) = connection.text_only {
                self.text_only = text_only;
            }
            if connection.api_key.is_some() {
                self.api_key = connection.api_key;
            }
        }

        if let Some(audio) = yaml.audio {
            if audio.mic_muted.is_some() {
                self.mic_muted = audio.mic_muted;
            }
            if audio.volume.is_some() {
                self.volume = audio.volume;
            }
        }

        if let Some(buffer) = yaml.events.and_then(|events| events.buffer) {
            self.event_buffer = buffer;
        }

        self.dynamic_variables.extend(yaml.dynamic_variables);
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(volume) = self.volume
            && !(0.0..=1.0).contains(&volume)
        {
            return Err(ConfigError::invalid(
                "volume",
                format!("{} is outside 0.0..=1.0", volume),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::invalid("event_buffer", "must be greater than 0"));
        }
        Ok(())
    }

    /// Merge per-call options over these defaults and derive the connection URL
    ///
    /// A signed URL is used verbatim. Otherwise an agent id is required and the
    /// URL is derived from the server location and connection type.
    pub fn resolve(
        &self,
        options: &SessionOptions,
    ) -> Result<ResolvedSessionConfig, ConversationError> {
        let agent_id = options.agent_id.clone().or_else(|| self.agent_id.clone());
        let signed_url = options
            .signed_url
            .clone()
            .or_else(|| self.signed_url.clone());
        let server_location = options.server_location.unwrap_or(self.server_location);
        let connection_type = options.connection_type.unwrap_or(self.connection_type);

        let url = match (signed_url, agent_id.as_deref()) {
            (Some(signed), _) => Url::parse(&signed).map_err(|e| {
                ConversationError::InvalidConfiguration(format!(
                    "signed URL '{}' is not a valid URL: {}",
                    signed, e
                ))
            })?,
            (None, Some(agent)) => conversation_url(server_location, connection_type, agent)?,
            (None, None) => {
                return Err(ConversationError::InvalidConfiguration(
                    "either agent_id or signed_url must be provided".to_string(),
                ));
            }
        };

        let mut dynamic_variables = self.dynamic_variables.clone();
        dynamic_variables.extend(
            options
                .dynamic_variables
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        Ok(ResolvedSessionConfig {
            url,
            agent_id,
            api_key: self.api_key.clone(),
            server_location,
            connection_type,
            text_only: options.text_only.unwrap_or(self.text_only),
            user_id: options.user_id.clone().or_else(|| self.user_id.clone()),
            dynamic_variables,
        })
    }
}

/// Derive the connection URL for an agent
fn conversation_url(
    location: ServerLocation,
    connection_type: ConnectionType,
    agent_id: &str,
) -> Result<Url, ConversationError> {
    let invalid = |e: url::ParseError| {
        ConversationError::InvalidConfiguration(format!("failed to build session URL: {}", e))
    };

    match connection_type {
        ConnectionType::WebSocket => {
            let mut url = Url::parse(&location.api_origin())
                .and_then(|origin| origin.join(CONVERSATION_PATH))
                .map_err(invalid)?;
            url.query_pairs_mut().append_pair("agent_id", agent_id);
            Ok(url)
        }
        ConnectionType::WebRtc => Url::parse(&location.webrtc_origin()).map_err(invalid),
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str, field: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::invalid(field, format!("{} ({}={})", e, key, raw)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ENV_KEYS: [&str; 10] = [
        "CONVAI_AGENT_ID",
        "CONVAI_API_KEY",
        "CONVAI_SIGNED_URL",
        "CONVAI_SERVER_LOCATION",
        "CONVAI_CONNECTION_TYPE",
        "CONVAI_TEXT_ONLY",
        "CONVAI_USER_ID",
        "CONVAI_MIC_MUTED",
        "CONVAI_VOLUME",
        "CONVAI_EVENT_BUFFER",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            // SAFETY: tests touching the environment are serialized
            unsafe { env::remove_var(key) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: tests touching the environment are serialized
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_resolve_websocket_url() {
        let config = ConversationConfig {
            agent_id: Some("agent_123".to_string()),
            ..Default::default()
        };

        let resolved = config.resolve(&SessionOptions::default()).unwrap();
        assert_eq!(
            resolved.url.as_str(),
            "wss://api.elevenlabs.io/v1/convai/conversation?agent_id=agent_123"
        );
        assert_eq!(resolved.connection_type, ConnectionType::WebSocket);
    }

    #[test]
    fn test_resolve_options_override_defaults() {
        let config = ConversationConfig {
            agent_id: Some("default_agent".to_string()),
            user_id: Some("default_user".to_string()),
            ..Default::default()
        };
        let options = SessionOptions {
            agent_id: Some("override_agent".to_string()),
            server_location: Some(ServerLocation::EuResidency),
            text_only: Some(true),
            ..Default::default()
        };

        let resolved = config.resolve(&options).unwrap();
        assert_eq!(resolved.agent_id.as_deref(), Some("override_agent"));
        assert_eq!(resolved.user_id.as_deref(), Some("default_user"));
        assert!(resolved.text_only);
        assert_eq!(
            resolved.url.as_str(),
            "wss://api.eu.residency.elevenlabs.io/v1/convai/conversation?agent_id=override_agent"
        );
    }

    #[test]
    fn test_resolve_webrtc_url() {
        let config = ConversationConfig {
            agent_id: Some("agent_123".to_string()),
            server_location: ServerLocation::InResidency,
            connection_type: ConnectionType::WebRtc,
            ..Default::default()
        };

        let resolved = config.resolve(&SessionOptions::default()).unwrap();
        assert_eq!(
            resolved.url.as_str(),
            "wss://livekit.rtc.in.residency.elevenlabs.io/"
        );
    }

    #[test]
    fn test_resolve_signed_url_wins() {
        let config = ConversationConfig {
            agent_id: Some("agent_123".to_string()),
            ..Default::default()
        };
        let options = SessionOptions {
            signed_url: Some("wss://example.test/conversation?token=abc".to_string()),
            ..Default::default()
        };

        let resolved = config.resolve(&options).unwrap();
        assert_eq!(
            resolved.url.as_str(),
            "wss://example.test/conversation?token=abc"
        );
    }

    #[test]
    fn test_resolve_requires_agent_or_signed_url() {
        let result = ConversationConfig::default().resolve(&SessionOptions::default());
        assert!(matches!(
            result,
            Err(ConversationError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_malformed_signed_url() {
        let options = SessionOptions {
            signed_url: Some("not a url".to_string()),
            ..Default::default()
        };
        let result = ConversationConfig::default().resolve(&options);
        assert!(matches!(
            result,
            Err(ConversationError::InvalidConfiguration(msg)) if msg.contains("not a url")
        ));
    }

    #[test]
    fn test_resolve_merges_dynamic_variables() {
        let mut config = ConversationConfig {
            agent_id: Some("agent_123".to_string()),
            ..Default::default()
        };
        config
            .dynamic_variables
            .insert("tier".to_string(), serde_json::json!("free"));
        config
            .dynamic_variables
            .insert("locale".to_string(), serde_json::json!("en"));

        let mut options = SessionOptions::default();
        options
            .dynamic_variables
            .insert("tier".to_string(), serde_json::json!("pro"));

        let resolved = config.resolve(&options).unwrap();
        assert_eq!(resolved.dynamic_variables["tier"], "pro");
        assert_eq!(resolved.dynamic_variables["locale"], "en");
    }

    #[test]
    fn test_validate_volume_range() {
        let config = ConversationConfig {
            volume: Some(1.5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        set_env("CONVAI_AGENT_ID", "env_agent");
        set_env("CONVAI_SERVER_LOCATION", "eu-residency");
        set_env("CONVAI_CONNECTION_TYPE", "webrtc");
        set_env("CONVAI_MIC_MUTED", "true");
        set_env("CONVAI_VOLUME", "0.5");
        set_env("CONVAI_EVENT_BUFFER", "32");

        let config = ConversationConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.agent_id.as_deref(), Some("env_agent"));
        assert_eq!(config.server_location, ServerLocation::EuResidency);
        assert_eq!(config.connection_type, ConnectionType::WebRtc);
        assert_eq!(config.mic_muted, Some(true));
        assert_eq!(config.volume, Some(0.5));
        assert_eq!(config.event_buffer, 32);
        assert!(!config.text_only);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_volume() {
        clear_env();
        set_env("CONVAI_VOLUME", "loud");

        let result = ConversationConfig::from_env();
        clear_env();

        match result {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "volume"),
            other => panic!("Expected InvalidValue error, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_from_file_overrides_env() {
        clear_env();
        set_env("CONVAI_AGENT_ID", "env_agent");
        set_env("CONVAI_USER_ID", "env_user");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
agent:
  id: "yaml_agent"
connection:
  server_location: "in-residency"
audio:
  volume: 0.75
"#
        )
        .unwrap();

        let config = ConversationConfig::from_file(file.path()).unwrap();
        clear_env();

        assert_eq!(config.agent_id.as_deref(), Some("yaml_agent"));
        assert_eq!(config.user_id.as_deref(), Some("env_user"));
        assert_eq!(config.server_location, ServerLocation::InResidency);
        assert_eq!(config.volume, Some(0.75));
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_unknown_location() {
        clear_env();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "connection:\n  server_location: \"moon\"\n").unwrap();

        let result = ConversationConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
