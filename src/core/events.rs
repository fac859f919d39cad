//! Conversation event stream.
//!
//! Sessions report everything that happens on the conversation as a single
//! tagged [`ConversationEvent`] stream instead of one callback per event type.
//! A session pushes events into the [`EventSink`] it received at start; the
//! controller folds each event into the observable state and re-broadcasts it
//! to subscribers.

use std::fmt;
use std::sync::Weak;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

// =============================================================================
// Event Payloads
// =============================================================================

/// Connection status of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Disconnected => write!(f, "disconnected"),
            ConversationStatus::Connecting => write!(f, "connecting"),
            ConversationStatus::Connected => write!(f, "connected"),
            ConversationStatus::Disconnecting => write!(f, "disconnecting"),
            ConversationStatus::Error => write!(f, "error"),
        }
    }
}

/// Whether the agent is currently talking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationMode {
    #[default]
    Listening,
    Speaking,
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    User,
    Agent,
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSource::User => write!(f, "user"),
            MessageSource::Agent => write!(f, "agent"),
        }
    }
}

/// Timing of one word in a committed transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub text: String,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
}

/// Category of an error reported on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The session could not be established or was lost
    Connection,
    Authentication,
    QuotaExceeded,
    RateLimited,
    /// Malformed input (audio format, message payload)
    Input,
    /// Transcription backend failure
    Transcriber,
    Server,
    Unknown,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DisconnectReason {
    /// Ended by the local caller
    User,
    /// Ended by the remote agent
    Agent,
    /// Ended by a failure
    Error { message: String },
}

/// Everything observable about a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    SessionStarted {
        session_id: String,
    },
    StatusChange {
        status: ConversationStatus,
    },
    ModeChange {
        mode: ConversationMode,
    },
    PartialTranscript {
        text: String,
    },
    CommittedTranscript {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        words: Option<Vec<WordTiming>>,
    },
    Message {
        source: MessageSource,
        text: String,
    },
    CanSendFeedbackChange {
        can_send_feedback: bool,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Disconnected {
        reason: DisconnectReason,
    },
}

// =============================================================================
// Event Sink
// =============================================================================

/// Receiver side of an [`EventSink`] bound to a controller.
pub(crate) trait EventTarget: Send + Sync {
    /// Handle an event emitted by the session of `attempt`.
    fn dispatch(&self, attempt: u64, event: ConversationEvent);
}

#[derive(Clone)]
enum SinkTarget {
    Controller(Weak<dyn EventTarget>),
    Channel(mpsc::UnboundedSender<ConversationEvent>),
}

/// Where a session pushes its events.
///
/// A sink handed out by the controller is bound to one acquisition attempt.
/// Events from an attempt that was cancelled or already torn down are
/// dropped, and a sink outliving its controller silently discards events.
#[derive(Clone)]
pub struct EventSink {
    target: SinkTarget,
    attempt: u64,
}

impl EventSink {
    pub(crate) fn for_attempt(target: Weak<dyn EventTarget>, attempt: u64) -> Self {
        Self {
            target: SinkTarget::Controller(target),
            attempt,
        }
    }

    /// Create a sink that forwards every event into a channel.
    ///
    /// Useful for driving a session without a controller.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConversationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                target: SinkTarget::Channel(tx),
                attempt: 0,
            },
            rx,
        )
    }

    /// Push an event.
    pub fn emit(&self, event: ConversationEvent) {
        match &self.target {
            SinkTarget::Controller(target) => match target.upgrade() {
                Some(target) => target.dispatch(self.attempt, event),
                None => trace!(attempt = self.attempt, "Controller gone, dropping event"),
            },
            SinkTarget::Channel(tx) => {
                let _ = tx.send(event);
            }
        }
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            SinkTarget::Controller(_) => "controller",
            SinkTarget::Channel(_) => "channel",
        };
        f.debug_struct("EventSink")
            .field("target", &target)
            .field("attempt", &self.attempt)
            .finish()
    }
}
