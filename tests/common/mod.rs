//! Common test utilities and fixtures
//!
//! Shared by the integration tests: fixture paths plus builders for a
//! session stack wired to scripted streams.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use twin_qa::aggregator::{ReconnectPolicy, SessionAggregator};
use twin_qa::client::{SessionService, SimulatedConfig, SimulatedSessionClient};
use twin_qa::directory::StaticDirectory;
use twin_qa::error::Result;
use twin_qa::protocol::{
    CancelSessionResponse, CreateSessionRequest, CreateSessionResponse, LeadClassification,
    Pagination, PersonaInfo, Progress, SentimentDistribution, Session, SessionFilters,
    SessionListResponse, SessionResponse, SessionSummary, StreamEvent,
};
use twin_qa::stream::ScriptedTransport;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

/// Get the valid config fixture path
pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

/// Get the invalid config fixture path
pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

// ─────────────────────────────────────────────────────────────────
// Session Stack
// ─────────────────────────────────────────────────────────────────

/// Aggregator over a simulated service whose streams are scripted by the test
pub struct Harness {
    pub service: SimulatedSessionClient,
    pub transport: Arc<ScriptedTransport>,
    pub aggregator: SessionAggregator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_service(SimulatedConfig {
            // the simulation never answers on its own within a test
            response_delay: Duration::from_secs(24 * 3600),
            ..Default::default()
        })
    }

    pub fn with_service(config: SimulatedConfig) -> Self {
        Self::build(config, None)
    }

    /// Every service call takes `latency` before it is answered
    pub fn with_latency(latency: Duration) -> Self {
        Self::build(
            SimulatedConfig {
                response_delay: Duration::from_secs(24 * 3600),
                ..Default::default()
            },
            Some(latency),
        )
    }

    fn build(config: SimulatedConfig, latency: Option<Duration>) -> Self {
        let directory = StaticDirectory::demo(10);
        let service = SimulatedSessionClient::with_config(directory.clone(), config);
        let shared: Arc<dyn SessionService> = match latency {
            Some(latency) => Arc::new(SlowService {
                inner: service.clone(),
                latency,
            }),
            None => Arc::new(service.clone()),
        };
        let transport = Arc::new(ScriptedTransport::new());
        let aggregator = SessionAggregator::new(
            shared,
            transport.clone(),
            Arc::new(directory),
            ReconnectPolicy::default(),
        );
        Self {
            service,
            transport,
            aggregator,
        }
    }
}

/// Simulated service that sleeps before answering
pub struct SlowService {
    inner: SimulatedSessionClient,
    latency: Duration,
}

#[async_trait]
impl SessionService for SlowService {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn create(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        tokio::time::sleep(self.latency).await;
        self.inner.create(request).await
    }

    async fn list(
        &self,
        filters: &SessionFilters,
        pagination: &Pagination,
    ) -> Result<SessionListResponse> {
        tokio::time::sleep(self.latency).await;
        self.inner.list(filters, pagination).await
    }

    async fn detail(&self, session_id: &str) -> Result<Session> {
        tokio::time::sleep(self.latency).await;
        self.inner.detail(session_id).await
    }

    async fn cancel(&self, session_id: &str) -> Result<CancelSessionResponse> {
        tokio::time::sleep(self.latency).await;
        self.inner.cancel(session_id).await
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        tokio::time::sleep(self.latency).await;
        self.inner.delete(session_id).await
    }
}

/// `response_received` for `lead_id` with a progress snapshot
pub fn response_event(lead_id: &str, responded: u32, expected: u32) -> StreamEvent {
    StreamEvent::ResponseReceived {
        response: SessionResponse {
            persona: PersonaInfo::new(lead_id, "", LeadClassification::Unknown),
            answer: format!("{} thinks it is worth it", lead_id),
            answered_at: Utc::now(),
            confidence_score: Some(0.8),
        },
        progress: Some(Progress::new(responded, expected)),
    }
}

/// `session_completed` carrying a summary
pub fn completed_event() -> StreamEvent {
    StreamEvent::SessionCompleted {
        summary: Some(SessionSummary {
            summary_text: "Broadly positive".to_string(),
            key_insights: vec!["Price is the main concern".to_string()],
            sentiment_distribution: SentimentDistribution {
                positive: 0.67,
                neutral: 0.33,
                negative: None,
            },
        }),
    }
}
