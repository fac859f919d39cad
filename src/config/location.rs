//! Server location and connection type parsing.
//!
//! A server location selects the data-residency region a session is opened
//! in. Each location maps to a fixed API origin and a fixed WebRTC origin.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Data-residency region a session connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerLocation {
    #[default]
    Us,
    EuResidency,
    InResidency,
    Global,
}

impl ServerLocation {
    /// All supported locations.
    pub const ALL: [ServerLocation; 4] = [
        ServerLocation::Us,
        ServerLocation::EuResidency,
        ServerLocation::InResidency,
        ServerLocation::Global,
    ];

    /// Host-name prefix shared by the API and WebRTC origins.
    fn host_part(self) -> &'static str {
        match self {
            ServerLocation::Us | ServerLocation::Global => "",
            ServerLocation::EuResidency => "eu.residency.",
            ServerLocation::InResidency => "in.residency.",
        }
    }

    /// Secure websocket origin of the conversation API.
    pub fn api_origin(self) -> String {
        format!("wss://api.{}elevenlabs.io", self.host_part())
    }

    /// Origin of the WebRTC media server.
    pub fn webrtc_origin(self) -> String {
        format!("wss://livekit.rtc.{}elevenlabs.io", self.host_part())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServerLocation::Us => "us",
            ServerLocation::EuResidency => "eu-residency",
            ServerLocation::InResidency => "in-residency",
            ServerLocation::Global => "global",
        }
    }
}

impl fmt::Display for ServerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServerLocation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        ServerLocation::ALL
            .into_iter()
            .find(|location| location.as_str() == normalized)
            .ok_or_else(|| {
                ConfigError::invalid(
                    "server_location",
                    format!(
                        "unknown location '{}', expected one of: us, eu-residency, in-residency, global",
                        s
                    ),
                )
            })
    }
}

/// Transport used by the session library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    WebSocket,
    WebRtc,
}

impl ConnectionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionType::WebSocket => "websocket",
            ConnectionType::WebRtc => "webrtc",
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "websocket" | "ws" => Ok(ConnectionType::WebSocket),
            "webrtc" => Ok(ConnectionType::WebRtc),
            other => Err(ConfigError::invalid(
                "connection_type",
                format!("unknown connection type '{}', expected websocket or webrtc", other),
            )),
        }
    }
}
