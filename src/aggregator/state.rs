//! Tracked session state
//!
//! Folds stream deltas and detail snapshots into one local [`Session`].
//! Every rule here is idempotent and never moves status backwards.

use std::collections::HashMap;

use chrono::Utc;

use crate::protocol::{
    CancelSessionResponse, CreateSessionRequest, CreateSessionResponse, PersonaInfo, Progress,
    Session, SessionResponse, SessionStatus, SessionSummary,
};

// ─────────────────────────────────────────────────────────────────
// Merge Outcome
// ─────────────────────────────────────────────────────────────────

/// What applying a delta did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Local state changed
    Applied,
    /// Already known; nothing new
    Duplicate,
    /// Rejected because the session no longer accepts deltas
    Ignored,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, MergeOutcome::Applied)
    }
}

// ─────────────────────────────────────────────────────────────────
// Tracked Session
// ─────────────────────────────────────────────────────────────────

/// A session being watched, plus what the aggregator knows about it
#[derive(Debug, Clone)]
pub struct TrackedSession {
    /// Current folded view
    pub session: Session,

    /// Display metadata per lead id
    personas: HashMap<String, PersonaInfo>,

    /// Consecutive failed reconnects since the last received event
    pub reconnect_attempts: u32,

    /// Cancel issued locally; late deltas are dropped
    pub cancel_requested: bool,

    /// Most recent failure message, for display
    pub last_error: Option<String>,
}

impl TrackedSession {
    /// Track a session from a detail or list snapshot
    pub fn new(session: Session) -> Self {
        let personas = session
            .responses
            .iter()
            .map(|r| (r.persona.lead_id.clone(), r.persona.clone()))
            .collect();
        let mut tracked = Self {
            session,
            personas,
            reconnect_attempts: 0,
            cancel_requested: false,
            last_error: None,
        };
        tracked.clamp_responded();
        tracked
    }

    /// Local record of a just-created session, before the first event
    pub fn from_created(created: &CreateSessionResponse, request: &CreateSessionRequest) -> Self {
        Self::new(Session {
            session_id: created.session_id.clone(),
            question: request.question.clone(),
            status: created.status,
            created_at: created.created_at,
            completed_at: None,
            responses: Vec::new(),
            summary: None,
            total_expected: created.total_prospects,
            total_responded: 0,
            image_url: None,
            prospect_ids: request.prospect_ids.clone(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status
    }

    /// Whether stream deltas may still change this session
    pub fn accepts_deltas(&self) -> bool {
        self.session.status.is_active() && !self.cancel_requested
    }

    /// Whether a live stream should be attached
    pub fn wants_stream(&self) -> bool {
        self.accepts_deltas()
    }

    pub fn persona(&self, lead_id: &str) -> Option<&PersonaInfo> {
        self.personas.get(lead_id)
    }

    pub fn cache_persona(&mut self, persona: PersonaInfo) {
        self.personas.insert(persona.lead_id.clone(), persona);
    }

    // ─────────────────────────────────────────────────────────────
    // Stream Deltas
    // ─────────────────────────────────────────────────────────────

    /// Fold one `response_received` delta
    pub fn apply_response(&mut self, mut response: SessionResponse, progress: Option<Progress>) -> MergeOutcome {
        if !self.accepts_deltas() {
            return MergeOutcome::Ignored;
        }

        let mut outcome = MergeOutcome::Duplicate;
        if !self.session.has_response_from(&response.persona.lead_id) {
            if let Some(known) = self.personas.get(&response.persona.lead_id) {
                response.persona = known.clone();
            }
            self.session.responses.push(response);
            outcome = MergeOutcome::Applied;
        }

        let reported = progress
            .map(|p| p.total_responded)
            .unwrap_or(self.session.responses.len() as u32);
        if self.merge_responded(reported) {
            outcome = MergeOutcome::Applied;
        }
        if self.session.status.advance_to(SessionStatus::InProgress) {
            outcome = MergeOutcome::Applied;
        }

        outcome
    }

    /// Fold `session_completed`
    pub fn apply_completion(&mut self, summary: Option<SessionSummary>) -> MergeOutcome {
        if !self.accepts_deltas() {
            return MergeOutcome::Ignored;
        }
        if self.session.summary.is_none() {
            self.session.summary = summary;
        }
        self.session.status.advance_to(SessionStatus::Completed);
        self.session.completed_at = Some(Utc::now());
        self.reconnect_attempts = 0;
        MergeOutcome::Applied
    }

    /// Fold an in-band `error`; collected responses stay
    pub fn apply_failure(&mut self, message: impl Into<String>) -> MergeOutcome {
        if self.session.status.is_terminal() {
            return MergeOutcome::Ignored;
        }
        self.session.status.advance_to(SessionStatus::Failed);
        self.session.completed_at = Some(Utc::now());
        self.last_error = Some(message.into());
        MergeOutcome::Applied
    }

    // ─────────────────────────────────────────────────────────────
    // Cancel
    // ─────────────────────────────────────────────────────────────

    /// Tentative phase of a cancel. Returns false when already terminal.
    pub fn begin_cancel(&mut self) -> bool {
        if self.session.status.is_terminal() {
            return false;
        }
        self.cancel_requested = true;
        self.session.status.advance_to(SessionStatus::Failed);
        self.session.completed_at = Some(Utc::now());
        true
    }

    /// Server acknowledged the cancel
    pub fn confirm_cancel(&mut self, reply: &CancelSessionResponse) {
        self.session.completed_at = Some(reply.cancelled_at);
        self.last_error = None;
    }

    /// Server refused the cancel; the session stays failed locally
    pub fn cancel_unconfirmed(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    // ─────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────

    /// Merge an authoritative snapshot (after a dropped stream or a list load)
    pub fn reconcile(&mut self, server: Session) -> MergeOutcome {
        if self.cancel_requested || self.session.status.is_terminal() {
            return MergeOutcome::Ignored;
        }

        let mut changed = false;
        for response in server.responses {
            if !self.session.has_response_from(&response.persona.lead_id) {
                self.personas
                    .entry(response.persona.lead_id.clone())
                    .or_insert_with(|| response.persona.clone());
                self.session.responses.push(response);
                changed = true;
            }
        }

        let reported = server.total_responded.max(self.session.responses.len() as u32);
        changed |= self.merge_responded(reported);
        changed |= self.session.status.advance_to(server.status);

        if self.session.summary.is_none() && server.summary.is_some() {
            self.session.summary = server.summary;
            changed = true;
        }
        if self.session.completed_at.is_none() && server.completed_at.is_some() {
            self.session.completed_at = server.completed_at;
            changed = true;
        }
        if self.session.status.is_terminal() && self.session.completed_at.is_none() {
            self.session.completed_at = Some(Utc::now());
        }
        if self.session.prospect_ids.is_empty() && !server.prospect_ids.is_empty() {
            self.session.prospect_ids = server.prospect_ids;
            changed = true;
        }
        if self.session.image_url.is_none() && server.image_url.is_some() {
            self.session.image_url = server.image_url;
            changed = true;
        }

        if changed {
            MergeOutcome::Applied
        } else {
            MergeOutcome::Duplicate
        }
    }

    /// `total_responded = max(local, reported)`, never above `total_expected`
    fn merge_responded(&mut self, reported: u32) -> bool {
        let merged = self
            .session
            .total_responded
            .max(reported)
            .min(self.session.total_expected);
        if merged != self.session.total_responded {
            self.session.total_responded = merged;
            true
        } else {
            false
        }
    }

    fn clamp_responded(&mut self) {
        self.session.total_responded = self.session.total_responded.min(self.session.total_expected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LeadClassification, SentimentDistribution};
    use chrono::TimeZone;

    fn session(expected: u32) -> Session {
        Session {
            session_id: "s-1".to_string(),
            question: "Would you renew?".to_string(),
            status: SessionStatus::Pending,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            completed_at: None,
            responses: vec![],
            summary: None,
            total_expected: expected,
            total_responded: 0,
            image_url: None,
            prospect_ids: vec![],
        }
    }

    fn response(lead_id: &str) -> SessionResponse {
        SessionResponse {
            persona: PersonaInfo::new(lead_id, "", LeadClassification::Unknown),
            answer: format!("answer from {}", lead_id),
            answered_at: Utc::now(),
            confidence_score: None,
        }
    }

    fn summary() -> SessionSummary {
        SessionSummary {
            summary_text: "Mostly positive".to_string(),
            key_insights: vec!["price matters".to_string()],
            sentiment_distribution: SentimentDistribution {
                positive: 0.6,
                neutral: 0.4,
                negative: None,
            },
        }
    }

    #[test]
    fn test_duplicate_delivery_is_idempotent() {
        let mut tracked = TrackedSession::new(session(3));
        let p1 = Some(Progress::new(1, 3));

        assert_eq!(tracked.apply_response(response("A"), p1), MergeOutcome::Applied);
        assert_eq!(tracked.apply_response(response("A"), p1), MergeOutcome::Duplicate);

        assert_eq!(tracked.session.responses.len(), 1);
        assert_eq!(tracked.session.total_responded, 1);
        assert_eq!(tracked.status(), SessionStatus::InProgress);
    }

    #[test]
    fn test_responded_uses_server_snapshot_and_clamps() {
        let mut tracked = TrackedSession::new(session(2));
        tracked.apply_response(response("A"), Some(Progress::new(2, 2)));
        assert_eq!(tracked.session.total_responded, 2);

        // out-of-order snapshot never lowers the count
        tracked.apply_response(response("B"), Some(Progress::new(1, 2)));
        assert_eq!(tracked.session.total_responded, 2);

        tracked.apply_response(response("C"), Some(Progress::new(9, 2)));
        assert_eq!(tracked.session.total_responded, 2);
    }

    #[test]
    fn test_cached_persona_fills_display_metadata() {
        let mut tracked = TrackedSession::new(session(1));
        tracked.cache_persona(PersonaInfo::new("A", "Ann Lee", LeadClassification::Hot));
        tracked.apply_response(response("A"), None);

        let persona = &tracked.session.responses[0].persona;
        assert_eq!(persona.full_name, "Ann Lee");
        assert_eq!(persona.lead_classification, LeadClassification::Hot);
    }

    #[test]
    fn test_completion_is_terminal() {
        let mut tracked = TrackedSession::new(session(1));
        tracked.apply_response(response("A"), Some(Progress::new(1, 1)));
        assert_eq!(tracked.apply_completion(Some(summary())), MergeOutcome::Applied);

        assert_eq!(tracked.status(), SessionStatus::Completed);
        assert!(tracked.session.completed_at.is_some());
        assert!(tracked.session.summary.is_some());

        assert_eq!(tracked.apply_response(response("B"), None), MergeOutcome::Ignored);
        assert_eq!(tracked.apply_failure("late"), MergeOutcome::Ignored);
        assert_eq!(tracked.status(), SessionStatus::Completed);
    }

    #[test]
    fn test_failure_keeps_partial_responses() {
        let mut tracked = TrackedSession::new(session(3));
        tracked.apply_response(response("A"), Some(Progress::new(1, 3)));
        tracked.apply_failure("model offline");

        assert_eq!(tracked.status(), SessionStatus::Failed);
        assert_eq!(tracked.session.responses.len(), 1);
        assert_eq!(tracked.last_error.as_deref(), Some("model offline"));
    }

    #[test]
    fn test_cancel_drops_late_events() {
        let mut tracked = TrackedSession::new(session(3));
        tracked.apply_response(response("A"), None);

        assert!(tracked.begin_cancel());
        assert_eq!(tracked.status(), SessionStatus::Failed);
        assert_eq!(tracked.apply_response(response("B"), None), MergeOutcome::Ignored);
        assert_eq!(tracked.session.responses.len(), 1);
    }

    #[test]
    fn test_cancel_on_completed_is_refused() {
        let mut tracked = TrackedSession::new(session(1));
        tracked.apply_completion(None);
        let before = tracked.session.clone();

        assert!(!tracked.begin_cancel());
        assert!(!tracked.cancel_requested);
        assert_eq!(tracked.session, before);
    }

    #[test]
    fn test_reconcile_appends_missing_and_advances() {
        let mut tracked = TrackedSession::new(session(2));
        tracked.apply_response(response("A"), Some(Progress::new(1, 2)));

        let mut server = session(2);
        server.status = SessionStatus::Completed;
        server.responses = vec![response("A"), response("B")];
        server.total_responded = 2;
        server.summary = Some(summary());
        server.prospect_ids = vec!["A".to_string(), "B".to_string()];

        assert_eq!(tracked.reconcile(server.clone()), MergeOutcome::Applied);
        assert_eq!(tracked.session.responses.len(), 2);
        assert_eq!(tracked.status(), SessionStatus::Completed);
        assert!(tracked.session.completed_at.is_some());
        assert_eq!(tracked.session.prospect_ids.len(), 2);

        assert_eq!(tracked.reconcile(server), MergeOutcome::Ignored);
    }

    #[test]
    fn test_reconcile_never_moves_backwards() {
        let mut tracked = TrackedSession::new(session(2));
        tracked.apply_response(response("A"), Some(Progress::new(1, 2)));

        let stale = session(2);
        assert_eq!(tracked.reconcile(stale), MergeOutcome::Duplicate);
        assert_eq!(tracked.status(), SessionStatus::InProgress);
        assert_eq!(tracked.session.total_responded, 1);
    }
}
