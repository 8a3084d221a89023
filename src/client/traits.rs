//! Session service trait definitions

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::protocol::{
    CancelSessionResponse, CreateSessionRequest, CreateSessionResponse, Pagination, Session,
    SessionFilters, SessionListResponse,
};

// ─────────────────────────────────────────────────────────────────
// SessionService Trait
// ─────────────────────────────────────────────────────────────────

/// Request/response operations against a session service
///
/// Implementations are stateless from the caller's point of view: every call
/// stands alone and failures come back as typed errors. `create` validates
/// its request before any I/O. The trait is object-safe.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Implementation name (e.g., "http", "simulated")
    fn name(&self) -> &'static str;

    /// Start a session for a question and its prospects
    async fn create(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse>;

    /// One page of sessions plus aggregate counts
    async fn list(
        &self,
        filters: &SessionFilters,
        pagination: &Pagination,
    ) -> Result<SessionListResponse>;

    /// Full session including every response gathered so far
    async fn detail(&self, session_id: &str) -> Result<Session>;

    /// Stop a session. Succeeds without change on terminal sessions.
    async fn cancel(&self, session_id: &str) -> Result<CancelSessionResponse>;

    /// Remove the server-side record
    async fn delete(&self, session_id: &str) -> Result<()>;
}

/// Type alias for a shared service reference
pub type SharedService = Arc<dyn SessionService>;
