//! Base traits for the external realtime session library.
//!
//! The controller never talks to the network itself. It asks a
//! [`SessionConnector`] for a new session and drives the returned
//! [`SessionHandle`]. Everything behind these traits (negotiation, audio
//! capture and playback, voice-activity detection, framing) belongs to the
//! library implementing them.
//!
//! # Contract
//!
//! - `start` either returns a fully open handle or fails; it never returns a
//!   half-open handle.
//! - `end` may be called more than once. The controller already guarantees
//!   it calls `end` at most once per handle, but implementations should still
//!   treat repeated calls as a no-op.
//! - `id` and `is_open` are plain accessors. The controller calls them while
//!   holding its slot lock, so they must not block or emit events.
//! - `set_mic_muted` and `set_volume` are fire-and-forget and must not block.
//! - Data events (transcripts, messages, mode changes, errors) and the
//!   `Disconnected` lifecycle event are pushed into the [`EventSink`] passed to
//!   `start`. `SessionStarted` is published by the controller once the handle
//!   is installed, so libraries should not emit it.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::ResolvedSessionConfig;
use crate::core::events::EventSink;
use crate::errors::{SessionError, SessionResult};

// =============================================================================
// Operation Payloads
// =============================================================================

/// Feedback on the most recent agent response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Like,
    Dislike,
}

/// Audio device selection for a device switch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Platform device identifier; `None` selects the system default
    #[serde(default)]
    pub device_id: Option<String>,
    /// Requested sample rate in Hz
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

// =============================================================================
// Session Traits
// =============================================================================

/// One open realtime conversation.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Identifier assigned by the service.
    fn id(&self) -> &str;

    /// Whether the session is still open. Must not emit events.
    fn is_open(&self) -> bool;

    /// Close the session.
    async fn end(&self) -> SessionResult<()>;

    // -------------------------------------------------------------------------
    // Controlled fields
    // -------------------------------------------------------------------------

    fn set_mic_muted(&self, muted: bool);

    /// Set the output volume (0.0 - 1.0).
    fn set_volume(&self, volume: f32);

    // -------------------------------------------------------------------------
    // Data plane
    // -------------------------------------------------------------------------

    /// Send a user text message to the agent.
    fn send_user_message(&self, text: &str) -> SessionResult<()>;

    /// Send background context that does not trigger a response.
    fn send_contextual_update(&self, text: &str) -> SessionResult<()>;

    /// Signal that the user is active, delaying agent turn-taking.
    fn send_user_activity(&self) -> SessionResult<()>;

    fn send_feedback(&self, feedback: Feedback) -> SessionResult<()>;

    /// Send a chunk of input audio.
    fn send_audio(&self, audio: Bytes) -> SessionResult<()>;

    /// Commit the pending transcript segment (manual commit mode).
    fn commit(&self) -> SessionResult<()>;

    // -------------------------------------------------------------------------
    // Informational
    // -------------------------------------------------------------------------

    /// Current input level (0.0 - 1.0).
    fn input_volume(&self) -> f32 {
        0.0
    }

    /// Current output level (0.0 - 1.0).
    fn output_volume(&self) -> f32 {
        0.0
    }

    // -------------------------------------------------------------------------
    // Devices
    // -------------------------------------------------------------------------

    /// Switch the capture device. Unsupported unless overridden.
    async fn change_input_device(&self, _device: DeviceConfig) -> SessionResult<()> {
        Err(SessionError::Unsupported(
            "input device switching".to_string(),
        ))
    }

    /// Switch the playback device. Unsupported unless overridden.
    async fn change_output_device(&self, _device: DeviceConfig) -> SessionResult<()> {
        Err(SessionError::Unsupported(
            "output device switching".to_string(),
        ))
    }
}

/// Opens new sessions.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Negotiate and open a session.
    ///
    /// Timeouts are the implementation's responsibility and surface as an
    /// ordinary error.
    async fn start(
        &self,
        config: ResolvedSessionConfig,
        events: EventSink,
    ) -> SessionResult<Box<dyn SessionHandle>>;
}
