//! Observer-facing snapshots and notifications

use serde::Serialize;

use crate::protocol::{Session, SessionStatus};

/// Operation in flight for a session, separate from the session's own status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    Creating,
    Loading,
    Cancelling,
    Deleting,
}

impl PendingOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingOp::Creating => "creating",
            PendingOp::Loading => "loading",
            PendingOp::Cancelling => "cancelling",
            PendingOp::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for PendingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoardSession {
    pub session: Session,
    pub progress_percent: f64,
    pub pending: Option<PendingOp>,
    pub streaming: bool,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

impl BoardSession {
    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }
}

/// Snapshot of every watched session, newest first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionBoard {
    pub sessions: Vec<BoardSession>,
    /// Creates awaiting a session id
    pub creating: usize,
    /// Sessions being fetched that have no row yet
    pub loading: Vec<String>,
    pub active_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
}

impl SessionBoard {
    /// Build a snapshot from unordered rows
    pub fn from_rows(mut sessions: Vec<BoardSession>, creating: usize) -> Self {
        sessions.sort_by(|a, b| {
            b.session
                .created_at
                .cmp(&a.session.created_at)
                .then_with(|| a.session.session_id.cmp(&b.session.session_id))
        });
        let count = |status: SessionStatus| sessions.iter().filter(|s| s.status() == status).count();
        let completed_count = count(SessionStatus::Completed);
        let failed_count = count(SessionStatus::Failed);
        let active_count = sessions.len() - completed_count - failed_count;
        Self {
            sessions,
            creating,
            loading: Vec::new(),
            active_count,
            completed_count,
            failed_count,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&BoardSession> {
        self.sessions.iter().find(|s| s.session_id() == session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Whether any session is still collecting answers
    pub fn has_active(&self) -> bool {
        self.active_count > 0
    }
}

/// Discrete notification for views
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    /// Session state changed
    Updated { session_id: String },
    /// Session deleted; views showing it should close
    Removed { session_id: String },
    /// Stream keeps dropping; still retrying
    ConnectionDegraded { session_id: String, attempts: u32 },
    /// Retry cap exceeded; no further attempts
    ConnectionLost { session_id: String, attempts: u32 },
    /// A user-initiated operation failed
    OperationFailed {
        session_id: Option<String>,
        operation: PendingOp,
        message: String,
    },
}

impl BoardEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            BoardEvent::Updated { session_id }
            | BoardEvent::Removed { session_id }
            | BoardEvent::ConnectionDegraded { session_id, .. }
            | BoardEvent::ConnectionLost { session_id, .. } => Some(session_id),
            BoardEvent::OperationFailed { session_id, .. } => session_id.as_deref(),
        }
    }
}
