//! Simulated session service
//!
//! Offline stand-in for the real service. Sessions live in memory and every
//! prospect answers on a fixed cadence measured from session creation, so
//! `detail`, `list` and the live stream all observe the same progress.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::directory::StaticDirectory;
use crate::error::{Error, Result};
use crate::protocol::{
    CancelSessionResponse, CreateSessionRequest, CreateSessionResponse, LeadClassification,
    Pagination, PersonaInfo, Progress, SentimentDistribution, Session, SessionFilters,
    SessionListResponse, SessionResponse, SessionStatus, SessionSummary, SortField, SortOrder,
    StreamEvent,
};
use crate::stream::sse::encode_frame;
use crate::stream::{decode_sse, EventStream, EventTransport};

use super::SessionService;

const SIMULATED_URL: &str = "simulated://sessions";

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Configuration for simulated service behavior
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Delay between consecutive answers of one session
    pub response_delay: Duration,

    /// Whether to fail on certain operations
    pub fail_create: bool,
    pub fail_detail: bool,
    pub fail_cancel: bool,
    pub fail_delete: bool,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            response_delay: Duration::from_millis(1500),
            fail_create: false,
            fail_detail: false,
            fail_cancel: false,
            fail_delete: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Simulated Sessions
// ─────────────────────────────────────────────────────────────────

struct SimSession {
    session: Session,
    started: Instant,
}

impl SimSession {
    /// Materialize every answer due by `now`
    fn advance(&mut self, now: Instant, delay: Duration, directory: &StaticDirectory) {
        if self.session.status.is_terminal() {
            return;
        }

        let expected = self.session.prospect_ids.len();
        let due = if delay.is_zero() {
            expected
        } else {
            let elapsed = now.saturating_duration_since(self.started);
            ((elapsed.as_nanos() / delay.as_nanos()) as usize).min(expected)
        };

        while self.session.responses.len() < due {
            let lead_id = self.session.prospect_ids[self.session.responses.len()].clone();
            let persona = directory
                .get(&lead_id)
                .cloned()
                .unwrap_or_else(|| PersonaInfo::new(lead_id.clone(), lead_id.clone(), LeadClassification::Unknown));
            let response = synthesize_response(&self.session, persona);
            self.session.responses.push(response);
        }

        self.session.total_responded = self.session.responses.len() as u32;
        if self.session.total_responded > 0 {
            self.session.status.advance_to(SessionStatus::InProgress);
        }
        if self.session.responses.len() == expected {
            self.session.summary = Some(synthesize_summary(&self.session));
            self.session.status.advance_to(SessionStatus::Completed);
            self.session.completed_at = Some(Utc::now());
            debug!(session_id = %self.session.session_id, "Simulated session completed");
        }
    }

    /// When the next answer becomes due
    fn next_due(&self, delay: Duration) -> Instant {
        let next = self.session.responses.len() as u32 + 1;
        self.started + delay * next
    }
}

/// Score in `0.60..=0.98` derived from the session and lead ids
fn confidence_for(session_id: &str, lead_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b":");
    hasher.update(lead_id.as_bytes());
    let hash = hasher.finalize();
    let raw = u16::from_be_bytes([hash[0], hash[1]]) as f64 / u16::MAX as f64;
    ((0.60 + raw * 0.38) * 100.0).round() / 100.0
}

fn synthesize_response(session: &Session, persona: PersonaInfo) -> SessionResponse {
    let answer = match persona.lead_classification {
        LeadClassification::Hot => format!(
            "This is exactly the kind of thing I have been looking for. On \"{}\", I would move forward quickly.",
            session.question
        ),
        LeadClassification::Warm => format!(
            "It is interesting. Regarding \"{}\", I would want to compare options before deciding.",
            session.question
        ),
        LeadClassification::Cold => format!(
            "I am not convinced. \"{}\" is not a priority for me right now.",
            session.question
        ),
        LeadClassification::Unknown => format!("I do not have a strong opinion on \"{}\".", session.question),
    };

    SessionResponse {
        confidence_score: Some(confidence_for(&session.session_id, &persona.lead_id)),
        persona,
        answer,
        answered_at: Utc::now(),
    }
}

fn synthesize_summary(session: &Session) -> SessionSummary {
    let mut hot = 0u32;
    let mut warm = 0u32;
    let mut cold = 0u32;
    let mut other = 0u32;
    for response in &session.responses {
        match response.persona.lead_classification {
            LeadClassification::Hot => hot += 1,
            LeadClassification::Warm => warm += 1,
            LeadClassification::Cold => cold += 1,
            LeadClassification::Unknown => other += 1,
        }
    }

    let total = session.responses.len().max(1) as f64;
    let sentiment_distribution = SentimentDistribution {
        positive: f64::from(hot) / total,
        neutral: f64::from(warm + other) / total,
        negative: Some(f64::from(cold) / total),
    };

    let mut key_insights = Vec::new();
    if hot > 0 {
        key_insights.push(format!("{} hot lead(s) are ready to move forward", hot));
    }
    if warm > 0 {
        key_insights.push(format!("{} warm lead(s) want to compare options first", warm));
    }
    if cold > 0 {
        key_insights.push(format!("{} cold lead(s) see no immediate need", cold));
    }

    SessionSummary {
        summary_text: format!(
            "{} of {} prospects answered \"{}\".",
            session.responses.len(),
            session.total_expected,
            session.question
        ),
        key_insights,
        sentiment_distribution,
    }
}

// ─────────────────────────────────────────────────────────────────
// Simulated Service
// ─────────────────────────────────────────────────────────────────

/// Track method call counts for verification
#[derive(Debug, Default)]
struct CallCounts {
    create: u32,
    list: u32,
    detail: u32,
    cancel: u32,
    delete: u32,
    open: u32,
}

/// In-memory [`SessionService`] and [`EventTransport`]
#[derive(Clone)]
pub struct SimulatedSessionClient {
    config: SimulatedConfig,
    directory: Arc<StaticDirectory>,
    sessions: Arc<Mutex<HashMap<String, SimSession>>>,
    call_counts: Arc<RwLock<CallCounts>>,
}

impl SimulatedSessionClient {
    /// Create a simulated service with default configuration
    pub fn new(directory: StaticDirectory) -> Self {
        Self::with_config(directory, SimulatedConfig::default())
    }

    /// Create a simulated service with custom configuration
    pub fn with_config(directory: StaticDirectory, config: SimulatedConfig) -> Self {
        info!(
            personas = directory.len(),
            delay_ms = config.response_delay.as_millis() as u64,
            "Simulated session service created"
        );
        Self {
            config,
            directory: Arc::new(directory),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            call_counts: Arc::new(RwLock::new(CallCounts::default())),
        }
    }

    /// Get the number of times a method was called
    pub fn call_count(&self, method: &str) -> u32 {
        let counts = self.call_counts.read();
        match method {
            "create" => counts.create,
            "list" => counts.list,
            "detail" => counts.detail,
            "cancel" => counts.cancel,
            "delete" => counts.delete,
            "open" => counts.open,
            _ => 0,
        }
    }

    /// Sessions currently held
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    fn injected(operation: &str) -> Error {
        Error::transport(SIMULATED_URL, format!("simulated {} failure", operation))
    }

    fn snapshot(&self, session_id: &str) -> Result<Session> {
        let mut sessions = self.sessions.lock();
        let sim = sessions.get_mut(session_id).ok_or_else(|| Error::SessionNotFound {
            session_id: session_id.to_string(),
        })?;
        sim.advance(Instant::now(), self.config.response_delay, &self.directory);
        Ok(sim.session.clone())
    }
}

fn compare_sessions(a: &Session, b: &Session, field: SortField) -> std::cmp::Ordering {
    match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::CompletedAt => a.completed_at.cmp(&b.completed_at),
        SortField::Status => a.status.as_str().cmp(b.status.as_str()),
    }
}

#[async_trait]
impl SessionService for SimulatedSessionClient {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn create(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        self.call_counts.write().create += 1;
        let request = request.validate()?;
        if self.config.fail_create {
            return Err(Self::injected("create"));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let total = request.prospect_ids.len() as u32;

        let session = Session {
            session_id: session_id.clone(),
            question: request.question,
            status: SessionStatus::Pending,
            created_at,
            completed_at: None,
            responses: Vec::new(),
            summary: None,
            total_expected: total,
            total_responded: 0,
            image_url: None,
            prospect_ids: request.prospect_ids,
        };
        self.sessions.lock().insert(
            session_id.clone(),
            SimSession {
                session,
                started: Instant::now(),
            },
        );

        info!(session_id = %session_id, total_prospects = total, "Simulated session created");

        Ok(CreateSessionResponse {
            session_id,
            status: SessionStatus::Pending,
            message: "Session created".to_string(),
            created_at,
            total_prospects: total,
            estimated_completion_time: self.config.response_delay.as_secs_f64() * f64::from(total),
        })
    }

    async fn list(
        &self,
        filters: &SessionFilters,
        pagination: &Pagination,
    ) -> Result<SessionListResponse> {
        self.call_counts.write().list += 1;
        let now = Instant::now();

        let mut matching: Vec<Session> = {
            let mut sessions = self.sessions.lock();
            sessions
                .values_mut()
                .map(|sim| {
                    sim.advance(now, self.config.response_delay, &self.directory);
                    sim.session.clone()
                })
                .filter(|s| filters.matches(s))
                .collect()
        };

        matching.sort_by(|a, b| {
            let ord = compare_sessions(a, b, pagination.sort_by);
            match pagination.sort_order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let total_count = matching.len() as u32;
        let active = matching.iter().filter(|s| s.status.is_active()).count() as u32;
        let completed = matching
            .iter()
            .filter(|s| s.status == SessionStatus::Completed)
            .count() as u32;

        let sessions = matching
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.page_size as usize)
            .collect();

        Ok(SessionListResponse {
            sessions,
            total_count,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages: pagination.total_pages(total_count),
            active_sessions_count: active,
            completed_sessions_count: completed,
        })
    }

    async fn detail(&self, session_id: &str) -> Result<Session> {
        self.call_counts.write().detail += 1;
        if self.config.fail_detail {
            return Err(Self::injected("detail"));
        }
        self.snapshot(session_id)
    }

    async fn cancel(&self, session_id: &str) -> Result<CancelSessionResponse> {
        self.call_counts.write().cancel += 1;
        if self.config.fail_cancel {
            return Err(Self::injected("cancel"));
        }

        let mut sessions = self.sessions.lock();
        let sim = sessions.get_mut(session_id).ok_or_else(|| Error::SessionNotFound {
            session_id: session_id.to_string(),
        })?;
        sim.advance(Instant::now(), self.config.response_delay, &self.directory);

        let now = Utc::now();
        let message = if sim.session.status.is_terminal() {
            format!("Session already {}", sim.session.status)
        } else {
            sim.session.status.advance_to(SessionStatus::Failed);
            sim.session.completed_at = Some(now);
            info!(session_id, "Simulated session cancelled");
            "Session cancelled".to_string()
        };

        Ok(CancelSessionResponse {
            session_id: session_id.to_string(),
            status: sim.session.status,
            message,
            cancelled_at: sim.session.completed_at.unwrap_or(now),
        })
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.call_counts.write().delete += 1;
        if self.config.fail_delete {
            return Err(Self::injected("delete"));
        }
        match self.sessions.lock().remove(session_id) {
            Some(_) => Ok(()),
            None => Err(Error::SessionNotFound {
                session_id: session_id.to_string(),
            }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Simulated Stream
// ─────────────────────────────────────────────────────────────────

enum Step {
    Emit(StreamEvent),
    Finish(StreamEvent),
    Wait(Instant),
    Gone,
}

struct SimStream {
    service: SimulatedSessionClient,
    session_id: String,
    delivered: usize,
    finished: bool,
}

impl SimStream {
    fn step(&mut self) -> Step {
        let delay = self.service.config.response_delay;
        let mut sessions = self.service.sessions.lock();
        let Some(sim) = sessions.get_mut(&self.session_id) else {
            return Step::Gone;
        };
        sim.advance(Instant::now(), delay, &self.service.directory);
        let session = &sim.session;

        if let Some(response) = session.responses.get(self.delivered) {
            self.delivered += 1;
            return Step::Emit(StreamEvent::ResponseReceived {
                response: response.clone(),
                progress: Some(Progress::new(self.delivered as u32, session.total_expected)),
            });
        }

        match session.status {
            SessionStatus::Completed => Step::Finish(StreamEvent::SessionCompleted {
                summary: session.summary.clone(),
            }),
            SessionStatus::Failed => Step::Finish(StreamEvent::Error {
                message: "Session cancelled".to_string(),
            }),
            _ => Step::Wait(sim.next_due(delay)),
        }
    }
}

impl EventTransport for SimulatedSessionClient {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(&self, session_id: &str) -> EventStream {
        self.call_counts.write().open += 1;
        let state = SimStream {
            service: self.clone(),
            session_id: session_id.to_string(),
            delivered: 0,
            finished: false,
        };

        let events = stream::unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }
            loop {
                match st.step() {
                    Step::Emit(event) => return Some((event, st)),
                    Step::Finish(event) => {
                        st.finished = true;
                        return Some((event, st));
                    }
                    Step::Wait(at) => tokio::time::sleep_until(at).await,
                    Step::Gone => return None,
                }
            }
        });

        // same wire path as the HTTP stream
        let body = events.map(|event| {
            event
                .encode_data()
                .map(|data| encode_frame(event.name(), &data).into_bytes())
        });
        decode_sse(session_id.to_string(), body).boxed()
    }
}
