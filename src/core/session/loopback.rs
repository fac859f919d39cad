//! In-process loopback session.
//!
//! [`LoopbackConnector`] opens sessions that never touch the network: user
//! messages are echoed back as agent replies and every chunk of input audio
//! grows a partial transcript until it is committed. It backs the CLI's
//! offline mode and exercises the controller without a live service.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::base::{DeviceConfig, Feedback, SessionConnector, SessionHandle};
use crate::config::ResolvedSessionConfig;
use crate::core::events::{
    ConversationEvent, ConversationMode, DisconnectReason, EventSink, MessageSource,
};
use crate::errors::{SessionError, SessionResult};

/// Opens [`LoopbackSession`]s.
#[derive(Debug, Default, Clone)]
pub struct LoopbackConnector {
    /// Reply prefix used for echoed messages
    reply_prefix: Option<String>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix agent replies with `prefix` instead of `"You said: "`.
    pub fn with_reply_prefix(prefix: impl Into<String>) -> Self {
        Self {
            reply_prefix: Some(prefix.into()),
        }
    }
}

#[async_trait]
impl SessionConnector for LoopbackConnector {
    async fn start(
        &self,
        config: ResolvedSessionConfig,
        events: EventSink,
    ) -> SessionResult<Box<dyn SessionHandle>> {
        let session = LoopbackSession::new(
            config,
            events,
            self.reply_prefix
                .clone()
                .unwrap_or_else(|| "You said: ".to_string()),
        );
        info!(session_id = %session.id, url = %session.config.url, "Loopback session opened");
        session.events.emit(ConversationEvent::ModeChange {
            mode: ConversationMode::Listening,
        });
        Ok(Box::new(session))
    }
}

/// A session that answers locally.
pub struct LoopbackSession {
    id: String,
    config: ResolvedSessionConfig,
    events: EventSink,
    reply_prefix: String,
    open: AtomicBool,
    mic_muted: AtomicBool,
    /// Output volume stored as `f32` bits
    volume: AtomicU32,
    partial: Mutex<String>,
}

impl LoopbackSession {
    fn new(config: ResolvedSessionConfig, events: EventSink, reply_prefix: String) -> Self {
        Self {
            id: format!("loopback_{}", Uuid::new_v4().simple()),
            config,
            events,
            reply_prefix,
            open: AtomicBool::new(true),
            mic_muted: AtomicBool::new(false),
            volume: AtomicU32::new(1.0f32.to_bits()),
            partial: Mutex::new(String::new()),
        }
    }

    fn mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::Acquire)
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Acquire))
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(SessionError::Closed)
        }
    }

    fn ensure_audio(&self, what: &str) -> SessionResult<()> {
        if self.config.text_only {
            Err(SessionError::Unsupported(format!(
                "{what} in a text-only session"
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionHandle for LoopbackSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn end(&self) -> SessionResult<()> {
        if self.open.swap(false, Ordering::AcqRel) {
            info!(session_id = %self.id, "Loopback session closed");
            self.events.emit(ConversationEvent::Disconnected {
                reason: DisconnectReason::User,
            });
        }
        Ok(())
    }

    fn set_mic_muted(&self, muted: bool) {
        self.mic_muted.store(muted, Ordering::Release);
    }

    fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Release);
    }

    fn send_user_message(&self, text: &str) -> SessionResult<()> {
        self.ensure_open()?;
        debug!(session_id = %self.id, "Echoing user message");

        self.events.emit(ConversationEvent::Message {
            source: MessageSource::User,
            text: text.to_string(),
        });
        self.events.emit(ConversationEvent::ModeChange {
            mode: ConversationMode::Speaking,
        });
        self.events.emit(ConversationEvent::Message {
            source: MessageSource::Agent,
            text: format!("{}{}", self.reply_prefix, text),
        });
        self.events.emit(ConversationEvent::ModeChange {
            mode: ConversationMode::Listening,
        });
        self.events.emit(ConversationEvent::CanSendFeedbackChange {
            can_send_feedback: true,
        });
        Ok(())
    }

    fn send_contextual_update(&self, text: &str) -> SessionResult<()> {
        self.ensure_open()?;
        debug!(session_id = %self.id, len = text.len(), "Contextual update ignored");
        Ok(())
    }

    fn send_user_activity(&self) -> SessionResult<()> {
        self.ensure_open()
    }

    fn send_feedback(&self, feedback: Feedback) -> SessionResult<()> {
        self.ensure_open()?;
        debug!(session_id = %self.id, ?feedback, "Feedback received");
        self.events.emit(ConversationEvent::CanSendFeedbackChange {
            can_send_feedback: false,
        });
        Ok(())
    }

    fn send_audio(&self, audio: Bytes) -> SessionResult<()> {
        self.ensure_open()?;
        self.ensure_audio("audio input")?;
        if self.mic_muted() {
            return Ok(());
        }

        let text = {
            let mut partial = self.partial.lock();
            if !partial.is_empty() {
                partial.push(' ');
            }
            partial.push_str(&format!("[{} bytes]", audio.len()));
            partial.clone()
        };
        self.events
            .emit(ConversationEvent::PartialTranscript { text });
        Ok(())
    }

    fn commit(&self) -> SessionResult<()> {
        self.ensure_open()?;
        let text = std::mem::take(&mut *self.partial.lock());
        if text.is_empty() {
            return Ok(());
        }
        self.events.emit(ConversationEvent::CommittedTranscript { text, words: None });
        Ok(())
    }

    fn output_volume(&self) -> f32 {
        if self.is_open() { self.volume() } else { 0.0 }
    }

    async fn change_input_device(&self, device: DeviceConfig) -> SessionResult<()> {
        self.ensure_open()?;
        self.ensure_audio("input device switching")?;
        debug!(session_id = %self.id, ?device, "Input device switched");
        Ok(())
    }

    async fn change_output_device(&self, device: DeviceConfig) -> SessionResult<()> {
        self.ensure_open()?;
        self.ensure_audio("output device switching")?;
        debug!(session_id = %self.id, ?device, "Output device switched");
        Ok(())
    }
}
