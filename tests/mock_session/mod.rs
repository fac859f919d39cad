//! Scriptable session connector for controller tests.
//!
//! Two modes:
//! - `manual()`: every start request is handed to the test over a channel and
//!   settles only when the test replies, so tests control exactly when a
//!   handle arrives relative to other calls
//! - `auto()`: start requests succeed immediately with ids `session-1`,
//!   `session-2`, ...
//!
//! Every handle records the operations it receives in a shared [`SessionLog`].

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use waav_conversation::config::ResolvedSessionConfig;
use waav_conversation::core::{EventSink, Feedback, SessionConnector, SessionHandle};
use waav_conversation::errors::{SessionError, SessionResult};

/// Operation received by a mock handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    SetMicMuted(bool),
    SetVolume(f32),
    UserMessage(String),
    Audio(usize),
    End,
}

/// Shared record of everything the mock connector saw.
#[derive(Default)]
pub struct SessionLog {
    starts: AtomicUsize,
    ops: Mutex<HashMap<String, Vec<Op>>>,
    sinks: Mutex<HashMap<String, EventSink>>,
    /// Start requests and closes in the order they happened
    timeline: Mutex<Vec<String>>,
    open: Mutex<HashMap<String, Arc<AtomicBool>>>,
    arrive_closed: Mutex<HashSet<String>>,
}

impl SessionLog {
    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn ops(&self, session_id: &str) -> Vec<Op> {
        self.ops.lock().get(session_id).cloned().unwrap_or_default()
    }

    pub fn end_count(&self, session_id: &str) -> usize {
        self.ops(session_id)
            .iter()
            .filter(|op| **op == Op::End)
            .count()
    }

    /// Event sink the session `session_id` was started with.
    pub fn sink(&self, session_id: &str) -> EventSink {
        self.sinks
            .lock()
            .get(session_id)
            .cloned()
            .expect("no session with that id was started")
    }

    pub fn timeline(&self) -> Vec<String> {
        self.timeline.lock().clone()
    }

    /// Make `session_id` report closed without emitting any event, as a
    /// library that lost its connection silently would.
    pub fn drop_connection(&self, session_id: &str) {
        if let Some(open) = self.open.lock().get(session_id) {
            open.store(false, Ordering::SeqCst);
        }
    }

    /// Hand out `session_id` already closed when it is started.
    pub fn arrive_closed(&self, session_id: &str) {
        self.arrive_closed.lock().insert(session_id.to_string());
    }

    fn record(&self, session_id: &str, op: Op) {
        self.ops
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .push(op);
    }
}

/// A start request waiting for the test to settle it.
pub struct StartRequest {
    pub config: ResolvedSessionConfig,
    pub events: EventSink,
    reply: oneshot::Sender<SessionResult<String>>,
}

impl StartRequest {
    pub fn succeed(self, session_id: &str) {
        let _ = self.reply.send(Ok(session_id.to_string()));
    }

    pub fn fail(self, error: SessionError) {
        let _ = self.reply.send(Err(error));
    }
}

enum Mode {
    Manual(mpsc::UnboundedSender<StartRequest>),
    Auto(AtomicUsize),
}

#[derive(Clone)]
pub struct MockConnector {
    mode: Arc<Mode>,
    pub log: Arc<SessionLog>,
}

impl MockConnector {
    pub fn manual() -> (Self, mpsc::UnboundedReceiver<StartRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                mode: Arc::new(Mode::Manual(tx)),
                log: Arc::new(SessionLog::default()),
            },
            rx,
        )
    }

    pub fn auto() -> Self {
        Self {
            mode: Arc::new(Mode::Auto(AtomicUsize::new(0))),
            log: Arc::new(SessionLog::default()),
        }
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn start(
        &self,
        config: ResolvedSessionConfig,
        events: EventSink,
    ) -> SessionResult<Box<dyn SessionHandle>> {
        self.log.starts.fetch_add(1, Ordering::SeqCst);
        self.log.timeline.lock().push("start".to_string());

        let session_id = match self.mode.as_ref() {
            Mode::Manual(requests) => {
                let (reply, settled) = oneshot::channel();
                requests
                    .send(StartRequest {
                        config,
                        events: events.clone(),
                        reply,
                    })
                    .map_err(|_| SessionError::Internal("test harness gone".to_string()))?;
                settled.await.map_err(|_| {
                    SessionError::ConnectionFailed("start request dropped".to_string())
                })??
            }
            Mode::Auto(counter) => {
                format!("session-{}", counter.fetch_add(1, Ordering::SeqCst) + 1)
            }
        };

        self.log.sinks.lock().insert(session_id.clone(), events);
        self.log.ops.lock().entry(session_id.clone()).or_default();
        let open = Arc::new(AtomicBool::new(
            !self.log.arrive_closed.lock().contains(&session_id),
        ));
        self.log
            .open
            .lock()
            .insert(session_id.clone(), Arc::clone(&open));

        Ok(Box::new(MockHandle {
            id: session_id,
            log: Arc::clone(&self.log),
            open,
        }))
    }
}

/// Handle that records every call and supports no device switching.
pub struct MockHandle {
    id: String,
    log: Arc<SessionLog>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl SessionHandle for MockHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn end(&self) -> SessionResult<()> {
        self.log.record(&self.id, Op::End);
        self.log.timeline.lock().push(format!("end {}", self.id));
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn set_mic_muted(&self, muted: bool) {
        self.log.record(&self.id, Op::SetMicMuted(muted));
    }

    fn set_volume(&self, volume: f32) {
        self.log.record(&self.id, Op::SetVolume(volume));
    }

    fn send_user_message(&self, text: &str) -> SessionResult<()> {
        self.log.record(&self.id, Op::UserMessage(text.to_string()));
        Ok(())
    }

    fn send_contextual_update(&self, _text: &str) -> SessionResult<()> {
        Ok(())
    }

    fn send_user_activity(&self) -> SessionResult<()> {
        Ok(())
    }

    fn send_feedback(&self, _feedback: Feedback) -> SessionResult<()> {
        Ok(())
    }

    fn send_audio(&self, audio: Bytes) -> SessionResult<()> {
        self.log.record(&self.id, Op::Audio(audio.len()));
        Ok(())
    }

    fn commit(&self) -> SessionResult<()> {
        Err(SessionError::Unsupported("manual commit".to_string()))
    }
}
