//! Session lifecycle controller.
//!
//! [`SessionController`] owns a single session slot and arbitrates between
//! `begin()` and `end()` calls that may arrive concurrently, including the
//! implicit teardown when the controller is dropped.
//!
//! # Guarantees
//!
//! - Concurrent `begin()` calls collapse into one start request; every caller
//!   receives the same session id.
//! - An `end()` issued while a start request is in flight cancels that
//!   attempt. When the start request settles, the new handle is closed before
//!   any caller can see it and `begin()` fails with
//!   [`ConversationError::SessionCancelled`].
//! - A handle is closed exactly once, whichever path gets there first.
//! - `end()` resolves only once the slot is empty and every handle it
//!   captured is closed. Concurrent `end()` calls share that wait.
//!
//! # Locking
//!
//! Slot, pending marker and teardown live behind one `parking_lot` mutex that
//! is never held across an `.await`; each critical section is the
//! "synchronous prologue" of an operation. Controlled fields use a second
//! mutex, always taken before the slot mutex. The only handle methods called
//! with the slot mutex held are `id()` and `is_open()`, which must not emit
//! events; every other handle method runs outside it, so a session emitting
//! events from inside those methods cannot deadlock.
//!
//! Acquisitions and teardowns run as spawned tokio tasks shared by all
//! waiters, so dropping a caller's future neither stalls other waiters nor
//! leaves a handle unclosed.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use waav_conversation::config::{ConversationConfig, SessionOptions};
//! use waav_conversation::core::{LoopbackConnector, SessionController};
//!
//! let controller = SessionController::new(Arc::new(LoopbackConnector::new()), config);
//! let session_id = controller.begin(SessionOptions::default()).await?;
//! controller.send_user_message("hello")?;
//! controller.end().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::events::{
    ConversationEvent, ConversationStatus, DisconnectReason, ErrorKind, EventSink, EventTarget,
};
use super::session::{DeviceConfig, Feedback, ManagedSession, SessionConnector, SessionHandle};
use super::state::ConversationState;
use crate::config::{ConversationConfig, ResolvedSessionConfig, SessionOptions};
use crate::errors::{ConversationError, ConversationResult, SessionError};

type AcquireOutcome = Result<Arc<ManagedSession>, ConversationError>;
type SharedAcquisition = Shared<BoxFuture<'static, AcquireOutcome>>;
type SharedTeardown = Shared<BoxFuture<'static, ()>>;

// =============================================================================
// Internal State
// =============================================================================

/// An issued start request that has not settled yet.
struct PendingAcquisition {
    attempt: u64,
    /// Cancellation flag of this attempt only
    cancel: CancellationToken,
    outcome: SharedAcquisition,
}

/// A close sequence started by `end()`, `dispose()` or drop.
struct Teardown {
    id: u64,
    done: SharedTeardown,
}

/// Last requested values for the controlled fields.
#[derive(Debug, Clone, Copy, Default)]
struct ControlledFields {
    mic_muted: Option<bool>,
    volume: Option<f32>,
}

impl ControlledFields {
    /// Apply mute first, then volume.
    fn apply_to(&self, handle: &dyn SessionHandle) {
        if let Some(muted) = self.mic_muted {
            handle.set_mic_muted(muted);
        }
        if let Some(volume) = self.volume {
            handle.set_volume(volume);
        }
    }
}

#[derive(Default)]
struct SlotState {
    slot: Option<Arc<ManagedSession>>,
    pending: Option<PendingAcquisition>,
    teardown: Option<Teardown>,
    disposed: bool,
}

/// How an acquisition that obtained a handle settled.
enum Settlement {
    Installed,
    Cancelled,
    /// The handle was already closed when it arrived
    Closed,
}

/// What `begin()` has to do after its prologue.
enum Join {
    Ready(String),
    Waiting(SharedAcquisition),
}

struct Inner {
    connector: Arc<dyn SessionConnector>,
    config: ConversationConfig,
    controls: Mutex<ControlledFields>,
    state: Mutex<SlotState>,
    next_id: AtomicU64,
    events: broadcast::Sender<ConversationEvent>,
    observed: watch::Sender<ConversationState>,
}

// =============================================================================
// Controller
// =============================================================================

/// Owns one conversation session and arbitrates `begin()` / `end()`.
///
/// Create one controller per logical conversation. Call [`dispose`] when the
/// owner goes away; dropping the controller performs the same teardown on a
/// best-effort basis.
///
/// [`dispose`]: SessionController::dispose
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Create a controller with an empty slot.
    pub fn new(connector: Arc<dyn SessionConnector>, config: ConversationConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (observed, _) = watch::channel(ConversationState::default());
        let controls = ControlledFields {
            mic_muted: config.mic_muted,
            volume: config
                .volume
                .filter(|v| v.is_finite())
                .map(|v| v.clamp(0.0, 1.0)),
        };

        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                controls: Mutex::new(controls),
                state: Mutex::new(SlotState::default()),
                next_id: AtomicU64::new(0),
                events,
                observed,
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open a session, or return the one already open or being opened.
    ///
    /// Returns the session id.
    ///
    /// # Errors
    ///
    /// - [`ConversationError::SessionCancelled`] if an `end()` ran before the
    ///   start request settled
    /// - [`ConversationError::SessionStartFailed`] if the start request failed
    /// - [`ConversationError::InvalidConfiguration`] if the options cannot be
    ///   resolved
    /// - [`ConversationError::Disposed`] after [`dispose`](Self::dispose)
    pub async fn begin(&self, options: SessionOptions) -> ConversationResult<String> {
        match self.inner.acquire_or_join(&options)? {
            Join::Ready(session_id) => Ok(session_id),
            Join::Waiting(outcome) => outcome.await.map(|session| session.id().to_string()),
        }
    }

    /// Close the current session and cancel any start request in flight.
    ///
    /// Never fails. Resolves once the slot is empty and every captured handle
    /// is closed.
    pub async fn end(&self) {
        if let Some(done) = self.inner.capture_teardown(false) {
            done.await;
        }
    }

    /// End the conversation and refuse further `begin()` calls.
    pub async fn dispose(&self) {
        if let Some(done) = self.inner.capture_teardown(true) {
            done.await;
        }
    }

    // -------------------------------------------------------------------------
    // Controlled fields
    // -------------------------------------------------------------------------

    /// Mute or unmute the microphone, now and for every future session.
    pub fn set_mic_muted(&self, muted: bool) {
        let mut controls = self.inner.controls.lock();
        controls.mic_muted = Some(muted);
        if let Some(session) = self.inner.installed() {
            session.handle().set_mic_muted(muted);
        }
    }

    /// Set the output volume, now and for every future session.
    ///
    /// Values are clamped to `0.0..=1.0`; non-finite values are ignored.
    pub fn set_volume(&self, volume: f32) {
        if !volume.is_finite() {
            warn!(volume, "Ignoring non-finite volume");
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        let mut controls = self.inner.controls.lock();
        controls.volume = Some(volume);
        if let Some(session) = self.inner.installed() {
            session.handle().set_volume(volume);
        }
    }

    pub fn mic_muted(&self) -> Option<bool> {
        self.inner.controls.lock().mic_muted
    }

    pub fn volume(&self) -> Option<f32> {
        self.inner.controls.lock().volume
    }

    // -------------------------------------------------------------------------
    // Data plane
    // -------------------------------------------------------------------------

    pub fn send_user_message(&self, text: &str) -> ConversationResult<()> {
        self.active()?.handle().send_user_message(text)?;
        Ok(())
    }

    pub fn send_contextual_update(&self, text: &str) -> ConversationResult<()> {
        self.active()?.handle().send_contextual_update(text)?;
        Ok(())
    }

    pub fn send_user_activity(&self) -> ConversationResult<()> {
        self.active()?.handle().send_user_activity()?;
        Ok(())
    }

    pub fn send_feedback(&self, feedback: Feedback) -> ConversationResult<()> {
        self.active()?.handle().send_feedback(feedback)?;
        Ok(())
    }

    pub fn send_audio(&self, audio: Bytes) -> ConversationResult<()> {
        self.active()?.handle().send_audio(audio)?;
        Ok(())
    }

    /// Commit the transcript segment currently being recognised.
    pub fn commit(&self) -> ConversationResult<()> {
        self.active()?.handle().commit()?;
        Ok(())
    }

    pub async fn change_input_device(&self, device: DeviceConfig) -> ConversationResult<()> {
        let session = self.active()?;
        session
            .handle()
            .change_input_device(device)
            .await
            .map_err(device_error)
    }

    pub async fn change_output_device(&self, device: DeviceConfig) -> ConversationResult<()> {
        let session = self.active()?;
        session
            .handle()
            .change_output_device(device)
            .await
            .map_err(device_error)
    }

    // -------------------------------------------------------------------------
    // Informational
    // -------------------------------------------------------------------------

    /// Id of the open session, if any.
    pub fn session_id(&self) -> Option<String> {
        self.inner.installed().map(|session| session.id().to_string())
    }

    pub fn is_open(&self) -> bool {
        self.inner.installed().is_some()
    }

    pub fn input_volume(&self) -> f32 {
        self.inner
            .installed()
            .map(|session| session.handle().input_volume())
            .unwrap_or(0.0)
    }

    pub fn output_volume(&self) -> f32 {
        self.inner
            .installed()
            .map(|session| session.handle().output_volume())
            .unwrap_or(0.0)
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.inner.events.subscribe()
    }

    /// Watch the conversation state.
    pub fn state(&self) -> watch::Receiver<ConversationState> {
        self.inner.observed.subscribe()
    }

    /// Current conversation state.
    pub fn snapshot(&self) -> ConversationState {
        self.inner.observed.borrow().clone()
    }

    pub fn clear_transcripts(&self) {
        self.inner
            .observed
            .send_modify(|state| state.clear_transcripts());
    }

    fn active(&self) -> ConversationResult<Arc<ManagedSession>> {
        self.inner.installed().ok_or(ConversationError::NotConnected)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            let _ = self.inner.capture_teardown(true);
        } else {
            self.inner.abandon();
        }
    }
}

fn device_error(error: SessionError) -> ConversationError {
    match error {
        SessionError::Unsupported(what) => ConversationError::DeviceSwitchUnsupported(what),
        other => ConversationError::Session(other),
    }
}

// =============================================================================
// Acquisition and Teardown
// =============================================================================

impl Inner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fold an event into the observed state and broadcast it.
    fn publish(&self, event: ConversationEvent) {
        self.observed.send_modify(|state| state.apply(&event));
        let _ = self.events.send(event);
    }

    /// The installed session, if it is still open.
    fn installed(&self) -> Option<Arc<ManagedSession>> {
        self.state
            .lock()
            .slot
            .as_ref()
            .filter(|session| session.is_open())
            .cloned()
    }

    /// Prologue of `begin()`.
    fn acquire_or_join(self: &Arc<Self>, options: &SessionOptions) -> ConversationResult<Join> {
        let mut state = self.state.lock();

        if state.disposed {
            return Err(ConversationError::Disposed);
        }

        if let Some(session) = &state.slot
            && session.is_open()
        {
            debug!(session_id = %session.id(), "Session already open");
            return Ok(Join::Ready(session.id().to_string()));
        }

        if let Some(pending) = &state.pending {
            debug!(attempt = pending.attempt, "Joining in-flight session acquisition");
            return Ok(Join::Waiting(pending.outcome.clone()));
        }

        let config = self.config.resolve(options)?;

        let stale = state.slot.take();
        if let Some(stale) = &stale {
            info!(session_id = %stale.id(), "Replacing closed session");
        }
        let previous = state.teardown.as_ref().map(|teardown| teardown.done.clone());

        let attempt = self.next_id();
        let cancel = CancellationToken::new();
        info!(attempt, url = %config.url, "Starting session acquisition");
        self.publish(ConversationEvent::StatusChange {
            status: ConversationStatus::Connecting,
        });

        let task = tokio::spawn(Arc::clone(self).run_acquisition(
            attempt,
            cancel.clone(),
            config,
            previous,
            stale,
        ));
        let inner = Arc::clone(self);
        let outcome = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(attempt, "Session acquisition task failed: {}", e);
                    inner.finish_pending(attempt);
                    Err(ConversationError::Internal(format!(
                        "session acquisition task failed: {e}"
                    )))
                }
            }
        }
        .boxed()
        .shared();

        state.pending = Some(PendingAcquisition {
            attempt,
            cancel,
            outcome: outcome.clone(),
        });

        Ok(Join::Waiting(outcome))
    }

    async fn run_acquisition(
        self: Arc<Self>,
        attempt: u64,
        cancel: CancellationToken,
        config: ResolvedSessionConfig,
        previous: Option<SharedTeardown>,
        stale: Option<Arc<ManagedSession>>,
    ) -> AcquireOutcome {
        // Never open a new session while an older one is still closing.
        if let Some(previous) = previous {
            previous.await;
        }
        if let Some(stale) = stale {
            stale.close().await;
        }

        if cancel.is_cancelled() {
            debug!(attempt, "Acquisition cancelled before start request");
            self.finish_pending(attempt);
            return Err(ConversationError::SessionCancelled);
        }

        let target: Arc<dyn EventTarget> = self.clone();
        let sink = EventSink::for_attempt(Arc::downgrade(&target), attempt);

        let handle = match self.connector.start(config, sink).await {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail_pending(attempt, &cancel, e)),
        };

        let session = Arc::new(ManagedSession::new(attempt, handle));
        match self.settle(&session, &cancel) {
            Settlement::Installed => {
                info!(session_id = %session.id(), attempt, "Session started");
                Ok(session)
            }
            Settlement::Cancelled => {
                info!(
                    session_id = %session.id(),
                    attempt,
                    "Session cancelled during connection, closing"
                );
                session.close().await;
                Err(ConversationError::SessionCancelled)
            }
            Settlement::Closed => {
                warn!(session_id = %session.id(), attempt, "Session closed before it was installed");
                session.close().await;
                Err(self.fail_pending(attempt, &cancel, SessionError::Closed))
            }
        }
    }

    /// Clear the pending marker of `attempt`, then install the session unless
    /// the attempt was cancelled.
    fn settle(&self, session: &Arc<ManagedSession>, cancel: &CancellationToken) -> Settlement {
        let controls = self.controls.lock();
        {
            let mut state = self.state.lock();
            if state
                .pending
                .as_ref()
                .is_some_and(|pending| pending.attempt == session.attempt())
            {
                state.pending = None;
            }

            if cancel.is_cancelled() {
                return Settlement::Cancelled;
            }
            if !session.is_open() {
                return Settlement::Closed;
            }

            state.slot = Some(Arc::clone(session));
            self.publish(ConversationEvent::SessionStarted {
                session_id: session.id().to_string(),
            });
        }

        controls.apply_to(session.handle());
        Settlement::Installed
    }

    /// Clear the pending marker after a failed start and pick the error the
    /// callers see.
    fn fail_pending(
        &self,
        attempt: u64,
        cancel: &CancellationToken,
        error: SessionError,
    ) -> ConversationError {
        let mut state = self.state.lock();
        if state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.attempt == attempt)
        {
            state.pending = None;
        }

        if cancel.is_cancelled() {
            debug!(attempt, "Start failed after cancellation: {}", error);
            return ConversationError::SessionCancelled;
        }

        warn!(attempt, "Failed to start session: {}", error);
        self.publish(ConversationEvent::Error {
            kind: error_kind(&error),
            message: error.to_string(),
        });
        ConversationError::SessionStartFailed(error)
    }

    fn finish_pending(&self, attempt: u64) {
        let mut state = self.state.lock();
        if state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.attempt == attempt)
        {
            state.pending = None;
        }
    }

    /// Prologue of `end()` / `dispose()` / drop.
    ///
    /// Seizes whatever is pending or installed and starts closing it. Returns
    /// the teardown to wait on, which is the in-progress one when there is
    /// nothing new to capture.
    fn capture_teardown(self: &Arc<Self>, dispose: bool) -> Option<SharedTeardown> {
        let mut state = self.state.lock();
        if dispose {
            state.disposed = true;
        }

        let pending = state.pending.take();
        let installed = state.slot.take();
        if pending.is_none() && installed.is_none() {
            return state.teardown.as_ref().map(|teardown| teardown.done.clone());
        }

        if let Some(pending) = &pending {
            info!(attempt = pending.attempt, "Cancelling in-flight session acquisition");
            pending.cancel.cancel();
        }
        if let Some(session) = &installed {
            info!(session_id = %session.id(), "Ending session");
        }

        let id = self.next_id();
        let previous = state.teardown.as_ref().map(|teardown| teardown.done.clone());
        self.publish(ConversationEvent::StatusChange {
            status: ConversationStatus::Disconnecting,
        });

        let task = tokio::spawn(Arc::clone(self).run_teardown(
            id,
            previous,
            pending.map(|pending| pending.outcome),
            installed,
        ));
        let inner = Arc::clone(self);
        let done = async move {
            if let Err(e) = task.await {
                warn!("Session teardown task failed: {}", e);
                inner.finish_teardown(id);
            }
        }
        .boxed()
        .shared();

        state.teardown = Some(Teardown {
            id,
            done: done.clone(),
        });
        Some(done)
    }

    async fn run_teardown(
        self: Arc<Self>,
        id: u64,
        previous: Option<SharedTeardown>,
        pending: Option<SharedAcquisition>,
        installed: Option<Arc<ManagedSession>>,
    ) {
        if let Some(previous) = previous {
            previous.await;
        }

        // The acquisition closes its own handle once it sees the cancellation;
        // closing again here is a no-op.
        if let Some(outcome) = pending
            && let Ok(session) = outcome.await
        {
            session.close().await;
        }

        if let Some(session) = installed {
            session.close().await;
        }

        self.finish_teardown(id);
    }

    fn finish_teardown(&self, id: u64) {
        let mut state = self.state.lock();
        if state
            .teardown
            .as_ref()
            .is_some_and(|teardown| teardown.id == id)
        {
            state.teardown = None;
        }

        // A newer teardown still closing publishes its own Disconnected.
        if state.pending.is_none() && state.slot.is_none() && state.teardown.is_none() {
            debug!(teardown = id, "Session teardown complete");
            self.publish(ConversationEvent::Disconnected {
                reason: DisconnectReason::User,
            });
        }
    }

    /// Drop-time teardown without a runtime: nothing can be awaited or
    /// spawned, so cancel and release.
    fn abandon(&self) {
        let mut state = self.state.lock();
        state.disposed = true;
        if let Some(pending) = state.pending.take() {
            pending.cancel.cancel();
        }
        if let Some(session) = state.slot.take() {
            warn!(
                session_id = %session.id(),
                "No tokio runtime available, session dropped without closing"
            );
        }
    }
}

impl EventTarget for Inner {
    fn dispatch(&self, attempt: u64, event: ConversationEvent) {
        let mut state = self.state.lock();

        let pending = state
            .pending
            .as_ref()
            .is_some_and(|pending| pending.attempt == attempt);
        let installed = state
            .slot
            .as_ref()
            .filter(|session| session.attempt() == attempt)
            .cloned();

        if !pending && installed.is_none() {
            trace!(attempt, "Dropping event from discarded session");
            return;
        }

        if let ConversationEvent::Disconnected { reason } = &event
            && let Some(session) = installed
        {
            info!(session_id = %session.id(), ?reason, "Session closed by the service");
            session.mark_closed();
            state.slot = None;
        }

        self.publish(event);
    }
}

fn error_kind(error: &SessionError) -> ErrorKind {
    match error {
        SessionError::AuthenticationFailed(_) => ErrorKind::Authentication,
        SessionError::ConnectionFailed(_) | SessionError::Timeout(_) | SessionError::Closed => {
            ErrorKind::Connection
        }
        SessionError::Unsupported(_) | SessionError::SendFailed(_) => ErrorKind::Input,
        SessionError::Internal(_) => ErrorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_mapping() {
        let err = device_error(SessionError::Unsupported("input device switching".to_string()));
        assert!(matches!(err, ConversationError::DeviceSwitchUnsupported(_)));

        let err = device_error(SessionError::Closed);
        assert!(matches!(err, ConversationError::Session(SessionError::Closed)));
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            error_kind(&SessionError::AuthenticationFailed("bad key".to_string())),
            ErrorKind::Authentication
        );
        assert_eq!(
            error_kind(&SessionError::Timeout("10s".to_string())),
            ErrorKind::Connection
        );
    }

    #[test]
    fn test_controlled_fields_skip_unset_values() {
        let fields = ControlledFields::default();
        assert!(fields.mic_muted.is_none());
        assert!(fields.volume.is_none());
    }

    #[tokio::test]
    async fn test_end_without_session_is_noop() {
        let controller = SessionController::new(
            Arc::new(crate::core::session::LoopbackConnector::new()),
            ConversationConfig::default(),
        );

        controller.end().await;
        assert!(!controller.is_open());
        assert_eq!(controller.snapshot().status, ConversationStatus::Disconnected);
    }

    #[test]
    fn test_drop_without_runtime_does_not_panic() {
        let controller = SessionController::new(
            Arc::new(crate::core::session::LoopbackConnector::new()),
            ConversationConfig::default(),
        );
        drop(controller);
    }
}
