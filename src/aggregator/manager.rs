//! Session aggregator
//!
//! [`SessionAggregator`] owns the local view of every watched session. It
//! drives the [`StreamSubscriber`], folds notices into [`TrackedSession`]s,
//! schedules fixed-delay reconnects and publishes board snapshots.
//!
//! Execution is single-owner: every mutation happens inside a `&mut self`
//! call, one notice or timer at a time.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_stream::StreamMap;
use tracing::{debug, info, warn};

use super::board::{BoardEvent, BoardSession, PendingOp, SessionBoard};
use super::state::TrackedSession;
use crate::client::SharedService;
use crate::config::StreamSettings;
use crate::directory::PersonaDirectory;
use crate::error::{Error, Result};
use crate::protocol::{
    CreateSessionRequest, Pagination, PersonaInfo, Session, SessionFilters, SessionListResponse,
    StreamEvent,
};
use crate::stream::{EventTransport, StreamNotice, StreamSubscriber};

const EVENT_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────
// Reconnect Policy
// ─────────────────────────────────────────────────────────────────

/// When and how often a dropped stream is retried
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Fixed delay before each attempt
    pub interval: Duration,

    /// Maximum consecutive attempts (0 = infinite)
    pub max_attempts: u32,

    /// Attempts after which observers are warned
    pub escalate_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 0, // Infinite
            escalate_after: 3,
        }
    }
}

impl From<&StreamSettings> for ReconnectPolicy {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            interval: settings.reconnect_interval(),
            max_attempts: settings.max_reconnect_attempts,
            escalate_after: settings.escalate_after_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Whether attempt number `attempt` (1-based) may run
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts == 0 || attempt <= self.max_attempts
    }
}

/// What one [`SessionAggregator::pump`] call handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    /// A stream notice was applied
    Notice { session_id: String },
    /// A reconnect timer fired
    Reconnect { session_id: String },
}

impl Activity {
    pub fn session_id(&self) -> &str {
        match self {
            Activity::Notice { session_id } | Activity::Reconnect { session_id } => session_id,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Aggregator
// ─────────────────────────────────────────────────────────────────

/// Owner of every watched session and its stream
pub struct SessionAggregator {
    service: SharedService,
    directory: Arc<dyn PersonaDirectory>,
    subscriber: StreamSubscriber,
    sessions: HashMap<String, TrackedSession>,
    pending: HashMap<String, PendingOp>,
    creating: usize,
    timers: StreamMap<String, BoxStream<'static, ()>>,
    policy: ReconnectPolicy,
    delay: Constant,
    board: watch::Sender<SessionBoard>,
    events: broadcast::Sender<BoardEvent>,
}

impl SessionAggregator {
    /// Create an aggregator with nothing watched
    pub fn new(
        service: SharedService,
        transport: Arc<dyn EventTransport>,
        directory: Arc<dyn PersonaDirectory>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (board, _) = watch::channel(SessionBoard::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            service,
            directory,
            subscriber: StreamSubscriber::new(transport),
            sessions: HashMap::new(),
            pending: HashMap::new(),
            creating: 0,
            timers: StreamMap::new(),
            delay: Constant::new(policy.interval),
            policy,
            board,
            events,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Observers
    // ─────────────────────────────────────────────────────────────

    /// Receiver of board snapshots
    pub fn watch_board(&self) -> watch::Receiver<SessionBoard> {
        self.board.subscribe()
    }

    /// Receiver of discrete notifications
    pub fn events(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    /// Latest board snapshot
    pub fn board(&self) -> SessionBoard {
        self.board.borrow().clone()
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id).map(|t| &t.session)
    }

    pub fn tracked(&self, session_id: &str) -> Option<&TrackedSession> {
        self.sessions.get(session_id)
    }

    pub fn service(&self) -> &SharedService {
        &self.service
    }

    /// Whether a live channel is open for `session_id`
    pub fn is_streaming(&self, session_id: &str) -> bool {
        self.subscriber.is_subscribed(session_id)
    }

    /// Number of live channels
    pub fn live_streams(&self) -> usize {
        self.subscriber.live_count()
    }

    /// Whether a reconnect is scheduled for `session_id`
    pub fn reconnect_scheduled(&self, session_id: &str) -> bool {
        self.timers.contains_key(session_id)
    }

    /// Nothing left to deliver and no timer armed
    pub fn is_idle(&self) -> bool {
        self.subscriber.is_idle() && self.timers.is_empty()
    }

    // ─────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────

    /// Create a session and start watching it
    ///
    /// The request is validated before any network call.
    pub async fn create(&mut self, request: CreateSessionRequest) -> Result<Session> {
        let request = request.validate()?;

        self.creating += 1;
        self.publish();
        let result = self.service.create(request.clone()).await;
        self.creating = self.creating.saturating_sub(1);

        let created = match result {
            Ok(created) => created,
            Err(e) => {
                self.fail_op(None, PendingOp::Creating, &e);
                return Err(e);
            }
        };

        info!(
            session_id = %created.session_id,
            prospects = created.total_prospects,
            eta_secs = created.estimated_completion_time,
            "Session created"
        );

        let tracked = TrackedSession::from_created(&created, &request);
        let session = tracked.session.clone();
        self.sessions.insert(created.session_id.clone(), tracked);
        self.attach_if_needed(&created.session_id);
        self.notify(BoardEvent::Updated {
            session_id: created.session_id,
        });
        Ok(session)
    }

    /// Fetch detail, seed or reconcile local state, then attach a stream
    pub async fn observe(&mut self, session_id: &str) -> Result<Session> {
        self.set_pending(session_id, PendingOp::Loading);
        let result = self.service.detail(session_id).await;
        self.pending.remove(session_id);

        match result {
            Ok(detail) => {
                self.seed(detail);
                self.attach_if_needed(session_id);
                self.notify(BoardEvent::Updated {
                    session_id: session_id.to_string(),
                });
                self.session(session_id)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("session {} vanished while loading", session_id)))
            }
            Err(e) => {
                self.fail_op(Some(session_id), PendingOp::Loading, &e);
                Err(e)
            }
        }
    }

    /// Load one page of history and attach streams for its active sessions
    pub async fn load_history(
        &mut self,
        filters: &SessionFilters,
        pagination: &Pagination,
    ) -> Result<SessionListResponse> {
        let page = match self.service.list(filters, pagination).await {
            Ok(page) => page,
            Err(e) => {
                self.fail_op(None, PendingOp::Loading, &e);
                return Err(e);
            }
        };

        debug!(
            count = page.sessions.len(),
            total = page.total_count,
            page = page.page,
            "Loaded session history"
        );

        let mut hydrate = Vec::new();
        for entry in &page.sessions {
            let session_id = entry.session_id.clone();
            self.seed(entry.clone());

            let needs_stream = self
                .sessions
                .get(&session_id)
                .map_or(false, |t| t.wants_stream())
                && !self.subscriber.is_subscribed(&session_id)
                && !self.timers.contains_key(&session_id);
            if needs_stream {
                hydrate.push(session_id);
            }
        }
        self.publish();

        // list entries are partial; hydrate before attaching
        for session_id in hydrate {
            self.set_pending(&session_id, PendingOp::Loading);
            let result = self.service.detail(&session_id).await;
            self.pending.remove(&session_id);

            match result {
                Ok(detail) => {
                    self.seed(detail);
                    self.attach_if_needed(&session_id);
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Failed to hydrate session");
                    self.on_disconnect(&session_id, &e);
                }
            }
        }

        self.publish();
        Ok(page)
    }

    /// Stop a session
    ///
    /// Terminal sessions are left untouched. Otherwise the session turns
    /// failed and its stream closes before the server is asked; a server
    /// failure is reported but never reopens the stream.
    pub async fn cancel(&mut self, session_id: &str) -> Result<()> {
        if let Some(tracked) = self.sessions.get_mut(session_id) {
            if !tracked.begin_cancel() {
                debug!(session_id, status = %tracked.status(), "Cancel ignored for terminal session");
                return Ok(());
            }
        }

        self.subscriber.unsubscribe(session_id);
        self.timers.remove(session_id);
        self.set_pending(session_id, PendingOp::Cancelling);

        let result = self.service.cancel(session_id).await;
        self.pending.remove(session_id);

        match result {
            Ok(reply) => {
                if let Some(tracked) = self.sessions.get_mut(session_id) {
                    tracked.confirm_cancel(&reply);
                }
                info!(session_id, server_status = %reply.status, "Session cancelled");
                self.notify(BoardEvent::Updated {
                    session_id: session_id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                if let Some(tracked) = self.sessions.get_mut(session_id) {
                    tracked.cancel_unconfirmed(e.to_string());
                }
                self.fail_op(Some(session_id), PendingOp::Cancelling, &e);
                Err(e)
            }
        }
    }

    /// Delete a session on the server and forget it locally
    pub async fn delete(&mut self, session_id: &str) -> Result<()> {
        self.set_pending(session_id, PendingOp::Deleting);
        let result = self.service.delete(session_id).await;
        self.pending.remove(session_id);

        match result {
            Ok(()) | Err(Error::SessionNotFound { .. }) => {
                self.forget(session_id);
                info!(session_id, "Session deleted");
                self.notify(BoardEvent::Removed {
                    session_id: session_id.to_string(),
                });
                Ok(())
            }
            Err(e) => {
                self.fail_op(Some(session_id), PendingOp::Deleting, &e);
                Err(e)
            }
        }
    }

    /// Stop watching a session without touching the server
    pub fn evict(&mut self, session_id: &str) -> bool {
        let known = self.sessions.contains_key(session_id);
        self.forget(session_id);
        if known {
            debug!(session_id, "Session evicted");
            self.publish();
        }
        known
    }

    /// Close every channel and cancel every timer
    pub fn shutdown(&mut self) {
        self.subscriber.close_all();
        self.timers.clear();
        self.publish();
    }

    // ─────────────────────────────────────────────────────────────
    // Event Loop
    // ─────────────────────────────────────────────────────────────

    /// Apply the next stream notice or fire the next due reconnect
    ///
    /// Returns `None` once nothing is streaming and no timer is armed.
    pub async fn pump(&mut self) -> Option<Activity> {
        tokio::select! {
            Some((session_id, notice)) = self.subscriber.next(), if !self.subscriber.is_idle() => {
                self.apply_notice(&session_id, notice).await;
                Some(Activity::Notice { session_id })
            }
            Some((session_id, ())) = self.timers.next(), if !self.timers.is_empty() => {
                self.reconnect(&session_id).await;
                Some(Activity::Reconnect { session_id })
            }
            else => None,
        }
    }

    async fn apply_notice(&mut self, session_id: &str, notice: StreamNotice) {
        if !self.sessions.contains_key(session_id) {
            debug!(session_id, "Notice for untracked session, closing stream");
            self.subscriber.unsubscribe(session_id);
            return;
        }

        match notice {
            StreamNotice::Event(StreamEvent::ResponseReceived { response, progress }) => {
                let lead_id = response.persona.lead_id.clone();
                let cached = self
                    .sessions
                    .get(session_id)
                    .map_or(true, |t| t.persona(&lead_id).is_some());
                let resolved = if cached {
                    None
                } else {
                    Some(self.resolve_persona(&response.persona).await)
                };

                let mut changed = false;
                if let Some(tracked) = self.sessions.get_mut(session_id) {
                    if let Some(persona) = resolved {
                        tracked.cache_persona(persona);
                    }
                    tracked.reconnect_attempts = 0;
                    let outcome = tracked.apply_response(response, progress);
                    debug!(
                        session_id,
                        lead_id = %lead_id,
                        outcome = ?outcome,
                        responded = tracked.session.total_responded,
                        expected = tracked.session.total_expected,
                        "Applied response"
                    );
                    changed = outcome.changed();
                }
                if changed {
                    self.notify(BoardEvent::Updated {
                        session_id: session_id.to_string(),
                    });
                }
            }
            StreamNotice::Event(StreamEvent::SessionCompleted { summary }) => {
                self.timers.remove(session_id);
                let changed = self
                    .sessions
                    .get_mut(session_id)
                    .map_or(false, |t| t.apply_completion(summary).changed());
                if changed {
                    info!(session_id, "Session completed");
                    self.notify(BoardEvent::Updated {
                        session_id: session_id.to_string(),
                    });
                }
            }
            StreamNotice::Event(StreamEvent::Error { message }) => {
                self.subscriber.unsubscribe(session_id);
                self.timers.remove(session_id);
                let changed = self
                    .sessions
                    .get_mut(session_id)
                    .map_or(false, |t| t.apply_failure(message.clone()).changed());
                if changed {
                    warn!(session_id, error = %message, "Session failed");
                    self.notify(BoardEvent::Updated {
                        session_id: session_id.to_string(),
                    });
                }
            }
            StreamNotice::Event(StreamEvent::Unknown { name }) => {
                debug!(session_id, event = %name, "Ignoring unknown event");
            }
            StreamNotice::Completed => {
                debug!(session_id, "Stream closed after completion");
                self.publish();
            }
            StreamNotice::Disconnected(err) => self.on_disconnect(session_id, &err),
        }
    }

    /// Directory metadata for a persona, falling back to what the server sent
    async fn resolve_persona(&self, persona: &PersonaInfo) -> PersonaInfo {
        match self.directory.lookup(&persona.lead_id).await {
            Ok(Some(found)) => found,
            Ok(None) => persona.clone(),
            Err(e) => {
                debug!(lead_id = %persona.lead_id, error = %e, "Persona lookup failed");
                persona.clone()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Reconnect
    // ─────────────────────────────────────────────────────────────

    fn on_disconnect(&mut self, session_id: &str, err: &Error) {
        let attempts = match self.sessions.get_mut(session_id) {
            Some(tracked) if tracked.wants_stream() => {
                tracked.reconnect_attempts += 1;
                tracked.last_error = Some(err.to_string());
                tracked.reconnect_attempts
            }
            _ => return,
        };

        if !self.policy.allows(attempts) {
            warn!(session_id, attempts, error = %err, "Giving up on session stream");
            self.notify(BoardEvent::ConnectionLost {
                session_id: session_id.to_string(),
                attempts,
            });
            return;
        }

        if attempts == self.policy.escalate_after {
            warn!(session_id, attempts, "Session stream keeps dropping");
            self.notify(BoardEvent::ConnectionDegraded {
                session_id: session_id.to_string(),
                attempts,
            });
        }

        let delay = self.delay.next_backoff().unwrap_or(self.policy.interval);
        info!(
            session_id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Scheduling stream reconnect"
        );
        self.timers.insert(
            session_id.to_string(),
            stream::once(tokio::time::sleep(delay)).boxed(),
        );
        self.publish();
    }

    /// Reconcile through `detail`, then re-attach if still active
    async fn reconnect(&mut self, session_id: &str) {
        self.timers.remove(session_id);
        let wants = self
            .sessions
            .get(session_id)
            .map_or(false, |t| t.wants_stream());
        if !wants {
            return;
        }

        debug!(session_id, "Reconnecting session stream");
        self.set_pending(session_id, PendingOp::Loading);
        let result = self.service.detail(session_id).await;
        self.pending.remove(session_id);

        match result {
            Ok(detail) => {
                self.seed(detail);
                self.attach_if_needed(session_id);
                let reattached = self.subscriber.is_subscribed(session_id);
                if let Some(tracked) = self.sessions.get_mut(session_id) {
                    if reattached {
                        tracked.reconnect_attempts = 0;
                    }
                }
                self.notify(BoardEvent::Updated {
                    session_id: session_id.to_string(),
                });
            }
            Err(Error::SessionNotFound { .. }) => {
                info!(session_id, "Session no longer exists on server");
                self.forget(session_id);
                self.notify(BoardEvent::Removed {
                    session_id: session_id.to_string(),
                });
            }
            Err(e) => self.on_disconnect(session_id, &e),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────

    /// Insert a snapshot, or reconcile it into what is already known
    fn seed(&mut self, snapshot: Session) {
        match self.sessions.get_mut(&snapshot.session_id) {
            Some(tracked) => {
                tracked.reconcile(snapshot);
            }
            None => {
                self.sessions
                    .insert(snapshot.session_id.clone(), TrackedSession::new(snapshot));
            }
        }
    }

    /// Open or close the stream to match the session's status
    fn attach_if_needed(&mut self, session_id: &str) {
        let wants = self
            .sessions
            .get(session_id)
            .map_or(false, |t| t.wants_stream());
        if wants {
            if !self.subscriber.is_subscribed(session_id) && !self.timers.contains_key(session_id) {
                self.subscriber.subscribe(session_id);
            }
        } else {
            self.subscriber.unsubscribe(session_id);
            self.timers.remove(session_id);
        }
    }

    fn forget(&mut self, session_id: &str) {
        self.subscriber.unsubscribe(session_id);
        self.timers.remove(session_id);
        self.sessions.remove(session_id);
        self.pending.remove(session_id);
    }

    fn set_pending(&mut self, session_id: &str, op: PendingOp) {
        self.pending.insert(session_id.to_string(), op);
        self.publish();
    }

    fn fail_op(&mut self, session_id: Option<&str>, operation: PendingOp, err: &Error) {
        warn!(
            session_id = session_id.unwrap_or("-"),
            operation = %operation,
            error = %err,
            "Session operation failed"
        );
        self.notify(BoardEvent::OperationFailed {
            session_id: session_id.map(str::to_string),
            operation,
            message: err.to_string(),
        });
    }

    fn notify(&self, event: BoardEvent) {
        self.publish();
        // no receivers is fine
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let rows = self
            .sessions
            .values()
            .map(|tracked| BoardSession {
                session: tracked.session.clone(),
                progress_percent: tracked.session.progress_percent(),
                pending: self.pending.get(tracked.session_id()).copied(),
                streaming: self.subscriber.is_subscribed(tracked.session_id()),
                reconnect_attempts: tracked.reconnect_attempts,
                last_error: tracked.last_error.clone(),
            })
            .collect();
        let mut board = SessionBoard::from_rows(rows, self.creating);
        board.loading = self
            .pending
            .iter()
            .filter(|(id, op)| **op == PendingOp::Loading && !self.sessions.contains_key(*id))
            .map(|(id, _)| id.clone())
            .collect();
        board.loading.sort();
        self.board.send_replace(board);
    }
}

impl Drop for SessionAggregator {
    fn drop(&mut self) {
        self.subscriber.close_all();
        self.timers.clear();
    }
}
