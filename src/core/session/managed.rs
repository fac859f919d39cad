//! Close-once wrapper around an acquired session handle.

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::base::SessionHandle;

/// A session handle owned by the controller.
///
/// Several paths may try to close the same handle (the acquisition that sees
/// it was cancelled, a teardown, the owner being dropped). `close` runs the
/// handle's `end` exactly once; every other caller waits for that call to
/// finish.
pub(crate) struct ManagedSession {
    attempt: u64,
    handle: Box<dyn SessionHandle>,
    closed: OnceCell<()>,
}

impl ManagedSession {
    pub(crate) fn new(attempt: u64, handle: Box<dyn SessionHandle>) -> Self {
        Self {
            attempt,
            handle,
            closed: OnceCell::new(),
        }
    }

    /// Acquisition attempt this session came from.
    pub(crate) fn attempt(&self) -> u64 {
        self.attempt
    }

    pub(crate) fn id(&self) -> &str {
        self.handle.id()
    }

    pub(crate) fn handle(&self) -> &dyn SessionHandle {
        self.handle.as_ref()
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.closed.initialized() && self.handle.is_open()
    }

    /// Close the handle. Errors are logged, never returned.
    pub(crate) async fn close(&self) {
        self.closed
            .get_or_init(|| async {
                debug!(session_id = %self.id(), attempt = self.attempt, "Closing session");
                if let Err(e) = self.handle.end().await {
                    warn!(session_id = %self.id(), "Failed to close session: {}", e);
                }
            })
            .await;
    }

    /// Record that the library closed the session on its own.
    pub(crate) fn mark_closed(&self) {
        let _ = self.closed.set(());
    }
}

impl std::fmt::Debug for ManagedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedSession")
            .field("attempt", &self.attempt)
            .field("id", &self.id())
            .field("closed", &self.closed.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConversationConfig, SessionOptions};
    use crate::core::events::{ConversationEvent, EventSink};
    use crate::core::session::{LoopbackConnector, SessionConnector};

    async fn session() -> (
        ManagedSession,
        tokio::sync::mpsc::UnboundedReceiver<ConversationEvent>,
    ) {
        let config = ConversationConfig {
            agent_id: Some("agent_test".to_string()),
            ..Default::default()
        }
        .resolve(&SessionOptions::default())
        .unwrap();
        let (sink, mut rx) = EventSink::channel();
        let handle = LoopbackConnector::new().start(config, sink).await.unwrap();
        let _ = rx.recv().await;
        (ManagedSession::new(3, handle), rx)
    }

    #[tokio::test]
    async fn test_close_runs_end_once() {
        let (session, mut rx) = session().await;
        assert!(session.is_open());
        assert_eq!(session.attempt(), 3);

        tokio::join!(session.close(), session.close());
        session.close().await;

        assert!(!session.is_open());
        assert!(matches!(
            rx.try_recv(),
            Ok(ConversationEvent::Disconnected { .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mark_closed_skips_end() {
        let (session, mut rx) = session().await;

        session.mark_closed();
        session.close().await;

        assert!(!session.is_open());
        assert!(session.handle().is_open());
        assert!(rx.try_recv().is_err());
    }
}
