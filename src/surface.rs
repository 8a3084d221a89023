//! Session orchestration surface
//!
//! [`QaSurface`] is what the rest of an application calls: submit a question,
//! load history, drill into a session, cancel or delete it, and observe the
//! board while [`QaSurface::pump`] drives the streams.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::aggregator::{Activity, BoardEvent, ReconnectPolicy, SessionAggregator, SessionBoard};
use crate::client::{HttpSessionClient, SharedService, SimulatedConfig, SimulatedSessionClient};
use crate::config::QaConfig;
use crate::directory::{HttpPersonaDirectory, PersonaDirectory, StaticDirectory};
use crate::error::{ErrorKind, Result};
use crate::protocol::{
    CreateSessionRequest, ImageAttachment, Pagination, PersonaInfo, Session, SessionFilters,
    SessionListResponse,
};
use crate::stream::EventTransport;

/// Entry point for driving Q&A sessions
pub struct QaSurface {
    aggregator: SessionAggregator,
    directory: Arc<dyn PersonaDirectory>,
}

impl QaSurface {
    /// Assemble a surface from its collaborators
    pub fn new(
        service: SharedService,
        transport: Arc<dyn EventTransport>,
        directory: Arc<dyn PersonaDirectory>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            aggregator: SessionAggregator::new(service, transport, directory.clone(), policy),
            directory,
        }
    }

    /// Build the HTTP or simulated stack described by `config`
    pub fn from_config(config: &QaConfig) -> Result<Self> {
        let policy = ReconnectPolicy::from(&config.stream);

        if config.demo.enabled {
            let directory = StaticDirectory::demo(config.demo.persona_count);
            let client = Arc::new(SimulatedSessionClient::with_config(
                directory.clone(),
                SimulatedConfig {
                    response_delay: config.demo.response_delay(),
                    ..Default::default()
                },
            ));
            info!(personas = directory.len(), "Using simulated session service");
            return Ok(Self::new(client.clone(), client, Arc::new(directory), policy));
        }

        let client = Arc::new(HttpSessionClient::new(&config.api)?);
        let directory = HttpPersonaDirectory::new(&config.api.base_url, config.api.timeout())?;
        info!(url = %config.service_url(), "Using HTTP session service");
        Ok(Self::new(client.clone(), client, Arc::new(directory), policy))
    }

    /// Name of the backing service ("http" or "simulated")
    pub fn mode(&self) -> &'static str {
        self.aggregator.service().name()
    }

    // ─────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────

    /// Ask `question` of every prospect in `prospect_ids`
    pub async fn submit(
        &mut self,
        question: &str,
        prospect_ids: &[String],
        image: Option<&ImageAttachment>,
    ) -> Result<Session> {
        let request = CreateSessionRequest::new(question, prospect_ids.iter().cloned(), image);
        self.aggregator.create(request).await
    }

    /// Load a page of past sessions; active ones start streaming
    pub async fn load_history(
        &mut self,
        filters: &SessionFilters,
        pagination: &Pagination,
    ) -> Result<SessionListResponse> {
        self.aggregator.load_history(filters, pagination).await
    }

    /// Fetch one session in full and watch it while active
    ///
    /// When the service is unreachable the locally known copy is returned.
    pub async fn open_session(&mut self, session_id: &str) -> Result<Session> {
        match self.aggregator.observe(session_id).await {
            Ok(session) => Ok(session),
            Err(e) if e.kind() == ErrorKind::Transport && e.is_retryable() => {
                match self.aggregator.session(session_id) {
                    Some(local) => {
                        warn!(session_id, error = %e, "Detail unavailable, showing local copy");
                        Ok(local.clone())
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Stop a running session. No-op for finished ones.
    pub async fn cancel(&mut self, session_id: &str) -> Result<()> {
        self.aggregator.cancel(session_id).await
    }

    /// Delete a session everywhere
    pub async fn delete(&mut self, session_id: &str) -> Result<()> {
        self.aggregator.delete(session_id).await
    }

    /// Stop watching a session locally
    pub fn close_session(&mut self, session_id: &str) -> bool {
        self.aggregator.evict(session_id)
    }

    /// Every persona the directory knows
    pub async fn personas(&self) -> Result<Vec<PersonaInfo>> {
        self.directory.list().await
    }

    // ─────────────────────────────────────────────────────────────
    // Driving & Observing
    // ─────────────────────────────────────────────────────────────

    /// Handle the next notice or reconnect; `None` when nothing is pending
    pub async fn pump(&mut self) -> Option<Activity> {
        self.aggregator.pump().await
    }

    /// Pump until `done` accepts the board or there is nothing left to do.
    /// Returns whether `done` was satisfied.
    pub async fn run_until<F>(&mut self, mut done: F) -> bool
    where
        F: FnMut(&SessionBoard) -> bool,
    {
        loop {
            if done(&self.aggregator.board()) {
                return true;
            }
            if self.aggregator.pump().await.is_none() {
                return done(&self.aggregator.board());
            }
        }
    }

    pub fn board(&self) -> SessionBoard {
        self.aggregator.board()
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.aggregator.session(session_id)
    }

    pub fn watch_board(&self) -> watch::Receiver<SessionBoard> {
        self.aggregator.watch_board()
    }

    pub fn events(&self) -> broadcast::Receiver<BoardEvent> {
        self.aggregator.events()
    }

    pub fn aggregator(&self) -> &SessionAggregator {
        &self.aggregator
    }

    /// Close every stream and timer
    pub fn shutdown(&mut self) {
        info!(streams = self.aggregator.live_streams(), "Shutting down session surface");
        self.aggregator.shutdown();
    }
}
