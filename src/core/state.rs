//! Observable conversation state.
//!
//! [`ConversationState`] is the snapshot subscribers watch. It is only ever
//! changed by folding a [`ConversationEvent`] into it with
//! [`ConversationState::apply`], one update per event.

use serde::Serialize;

use super::events::{
    ConversationEvent, ConversationMode, ConversationStatus, ErrorKind, MessageSource, WordTiming,
};

/// A committed piece of transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSegment {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTiming>>,
}

/// A message exchanged in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationMessage {
    pub source: MessageSource,
    pub text: String,
}

/// Most recent error reported on the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationFault {
    pub kind: ErrorKind,
    pub message: String,
}

/// Snapshot of everything observable about a conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    pub status: ConversationStatus,
    pub session_id: Option<String>,
    pub mode: ConversationMode,
    pub is_speaking: bool,
    pub can_send_feedback: bool,
    /// Text of the segment currently being transcribed
    pub partial_transcript: String,
    pub committed_transcripts: Vec<TranscriptSegment>,
    pub messages: Vec<ConversationMessage>,
    pub error: Option<ConversationFault>,
}

impl ConversationState {
    /// Fold one event into the state.
    pub fn apply(&mut self, event: &ConversationEvent) {
        match event {
            ConversationEvent::SessionStarted { session_id } => {
                self.session_id = Some(session_id.clone());
                self.status = ConversationStatus::Connected;
                self.error = None;
            }
            ConversationEvent::StatusChange { status } => {
                self.status = *status;
            }
            ConversationEvent::ModeChange { mode } => {
                self.mode = *mode;
                self.is_speaking = *mode == ConversationMode::Speaking;
            }
            ConversationEvent::PartialTranscript { text } => {
                self.partial_transcript.clone_from(text);
            }
            ConversationEvent::CommittedTranscript { text, words } => {
                self.committed_transcripts.push(TranscriptSegment {
                    text: text.clone(),
                    words: words.clone(),
                });
                self.partial_transcript.clear();
            }
            ConversationEvent::Message { source, text } => {
                self.messages.push(ConversationMessage {
                    source: *source,
                    text: text.clone(),
                });
            }
            ConversationEvent::CanSendFeedbackChange { can_send_feedback } => {
                self.can_send_feedback = *can_send_feedback;
            }
            ConversationEvent::Error { kind, message } => {
                self.error = Some(ConversationFault {
                    kind: *kind,
                    message: message.clone(),
                });
                self.status = ConversationStatus::Error;
            }
            ConversationEvent::Disconnected { .. } => {
                self.status = ConversationStatus::Disconnected;
                self.session_id = None;
                self.mode = ConversationMode::Listening;
                self.is_speaking = false;
                self.can_send_feedback = false;
            }
        }
    }

    /// Drop accumulated transcripts and messages.
    pub fn clear_transcripts(&mut self) {
        self.partial_transcript.clear();
        self.committed_transcripts.clear();
        self.messages.clear();
    }

    /// All committed transcript text joined with spaces.
    pub fn full_transcript(&self) -> String {
        self.committed_transcripts
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::DisconnectReason;

    #[test]
    fn test_default_state() {
        let state = ConversationState::default();
        assert_eq!(state.status, ConversationStatus::Disconnected);
        assert_eq!(state.mode, ConversationMode::Listening);
        assert!(state.session_id.is_none());
        assert!(state.committed_transcripts.is_empty());
    }

    #[test]
    fn test_session_started_clears_error() {
        let mut state = ConversationState::default();
        state.apply(&ConversationEvent::Error {
            kind: ErrorKind::Connection,
            message: "refused".to_string(),
        });
        assert_eq!(state.status, ConversationStatus::Error);

        state.apply(&ConversationEvent::SessionStarted {
            session_id: "abc".to_string(),
        });
        assert_eq!(state.status, ConversationStatus::Connected);
        assert_eq!(state.session_id.as_deref(), Some("abc"));
        assert!(state.error.is_none());
    }

    #[test]
    fn test_transcript_accumulation() {
        let mut state = ConversationState::default();
        state.apply(&ConversationEvent::PartialTranscript {
            text: "hel".to_string(),
        });
        state.apply(&ConversationEvent::PartialTranscript {
            text: "hello wor".to_string(),
        });
        assert_eq!(state.partial_transcript, "hello wor");

        state.apply(&ConversationEvent::CommittedTranscript {
            text: "hello world".to_string(),
            words: Some(vec![WordTiming {
                text: "hello".to_string(),
                start: 0.0,
                end: 0.4,
                speaker_id: None,
            }]),
        });
        state.apply(&ConversationEvent::CommittedTranscript {
            text: "again".to_string(),
            words: None,
        });

        assert!(state.partial_transcript.is_empty());
        assert_eq!(state.committed_transcripts.len(), 2);
        assert_eq!(state.full_transcript(), "hello world again");

        state.clear_transcripts();
        assert!(state.committed_transcripts.is_empty());
        assert_eq!(state.full_transcript(), "");
    }

    #[test]
    fn test_mode_tracks_speaking() {
        let mut state = ConversationState::default();
        state.apply(&ConversationEvent::ModeChange {
            mode: ConversationMode::Speaking,
        });
        assert!(state.is_speaking);

        state.apply(&ConversationEvent::ModeChange {
            mode: ConversationMode::Listening,
        });
        assert!(!state.is_speaking);
    }

    #[test]
    fn test_error_updates_field_and_status() {
        let mut state = ConversationState {
            status: ConversationStatus::Connected,
            ..Default::default()
        };
        state.apply(&ConversationEvent::Error {
            kind: ErrorKind::QuotaExceeded,
            message: "quota exceeded".to_string(),
        });

        assert_eq!(state.status, ConversationStatus::Error);
        assert_eq!(
            state.error,
            Some(ConversationFault {
                kind: ErrorKind::QuotaExceeded,
                message: "quota exceeded".to_string(),
            })
        );
    }

    #[test]
    fn test_disconnected_resets_session_fields() {
        let mut state = ConversationState::default();
        state.apply(&ConversationEvent::SessionStarted {
            session_id: "abc".to_string(),
        });
        state.apply(&ConversationEvent::ModeChange {
            mode: ConversationMode::Speaking,
        });
        state.apply(&ConversationEvent::Message {
            source: MessageSource::Agent,
            text: "hi".to_string(),
        });
        state.apply(&ConversationEvent::Disconnected {
            reason: DisconnectReason::Agent,
        });

        assert_eq!(state.status, ConversationStatus::Disconnected);
        assert!(state.session_id.is_none());
        assert!(!state.is_speaking);
        assert_eq!(state.messages.len(), 1);
    }
}
