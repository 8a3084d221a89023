//! Session, response and summary shapes
//!
//! Everything here mirrors the JSON exchanged with the session service.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, no answer yet
    Pending,
    /// At least one answer collected
    InProgress,
    /// All answers collected and summarized
    Completed,
    /// Failed in-band or cancelled
    Failed,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Pending
    }
}

impl SessionStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    /// `completed` or `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// `pending` or `in_progress`
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    fn rank(&self) -> u8 {
        match self {
            SessionStatus::Pending => 0,
            SessionStatus::InProgress => 1,
            SessionStatus::Completed | SessionStatus::Failed => 2,
        }
    }

    /// Whether `next` is a legal forward transition from `self`
    pub fn can_advance_to(&self, next: SessionStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Move forward to `next` if legal. Returns whether the status changed.
    pub fn advance_to(&mut self, next: SessionStatus) -> bool {
        if self.can_advance_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(SessionStatus::Pending),
            "in_progress" | "in-progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            other => Err(Error::validation("status", format!("unknown status '{}'", other))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Target Entities
// ─────────────────────────────────────────────────────────────────

/// Sales-lead temperature of a persona
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadClassification {
    Hot,
    Warm,
    Cold,
    #[serde(other)]
    Unknown,
}

impl Default for LeadClassification {
    fn default() -> Self {
        LeadClassification::Unknown
    }
}

/// Minimal persona metadata needed to render a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaInfo {
    pub lead_id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub lead_classification: LeadClassification,
}

impl PersonaInfo {
    /// Create a persona reference
    pub fn new(
        lead_id: impl Into<String>,
        full_name: impl Into<String>,
        lead_classification: LeadClassification,
    ) -> Self {
        Self {
            lead_id: lead_id.into(),
            full_name: full_name.into(),
            lead_classification,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Responses & Summary
// ─────────────────────────────────────────────────────────────────

/// One prospect's answer within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub persona: PersonaInfo,
    pub answer: String,
    pub answered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

/// Proportions of answers per sentiment bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentDistribution {
    pub positive: f64,
    pub neutral: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative: Option<f64>,
}

impl SentimentDistribution {
    /// Sum of all buckets
    pub fn total(&self) -> f64 {
        self.positive + self.neutral + self.negative.unwrap_or(0.0)
    }

    /// Every bucket in `0..=1` and the sum at most 1
    pub fn is_valid(&self) -> bool {
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        in_range(self.positive)
            && in_range(self.neutral)
            && self.negative.map_or(true, in_range)
            && self.total() <= 1.0 + 1e-6
    }
}

/// Terminal synthesis of a completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub summary_text: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub sentiment_distribution: SentimentDistribution,
}

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

/// One question fanned out to a fixed set of prospects
///
/// The detail endpoint returns this shape with `prospect_ids` filled in;
/// list entries usually leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub question: String,
    #[serde(default)]
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub responses: Vec<SessionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
    pub total_expected: u32,
    #[serde(default)]
    pub total_responded: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prospect_ids: Vec<String>,
}

impl Session {
    /// Whether a response from `lead_id` is already recorded
    pub fn has_response_from(&self, lead_id: &str) -> bool {
        self.responses.iter().any(|r| r.persona.lead_id == lead_id)
    }

    /// Completion percentage in `0..=100`
    pub fn progress_percent(&self) -> f64 {
        if self.total_expected == 0 {
            return 0.0;
        }
        f64::from(self.total_responded.min(self.total_expected)) * 100.0
            / f64::from(self.total_expected)
    }
}

// ─────────────────────────────────────────────────────────────────
// Create
// ─────────────────────────────────────────────────────────────────

/// Binary image attached to a question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageAttachment {
    /// Create an attachment
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Guess the MIME type from a file extension
    pub fn mime_type_for_path(path: &std::path::Path) -> Option<&'static str> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "gif" => Some("image/gif"),
            "webp" => Some("image/webp"),
            "bmp" => Some("image/bmp"),
            "svg" => Some("image/svg+xml"),
            _ => None,
        }
    }

    /// Read an image file from disk
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let mime_type = Self::mime_type_for_path(path).ok_or_else(|| {
            Error::validation("image", format!("{} is not a supported image file", path.display()))
        })?;
        let bytes = std::fs::read(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::new(bytes, mime_type))
    }

    /// Standard base64 without a data-URL prefix
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Body of `POST /sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub question: String,
    pub prospect_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_mime_type: Option<String>,
}

impl CreateSessionRequest {
    /// Build a request, optionally carrying an image
    pub fn new<I, S>(question: impl Into<String>, prospect_ids: I, image: Option<&ImageAttachment>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            question: question.into(),
            prospect_ids: prospect_ids.into_iter().map(Into::into).collect(),
            image_base64: image.map(ImageAttachment::to_base64),
            image_mime_type: image.map(|i| i.mime_type.clone()),
        }
    }

    /// Reject requests the service would refuse, and normalize the rest.
    ///
    /// The question is trimmed and duplicate prospect ids are dropped,
    /// keeping first occurrence order.
    pub fn validate(mut self) -> Result<Self> {
        self.question = self.question.trim().to_string();
        if self.question.is_empty() {
            return Err(Error::validation("question", "must not be empty"));
        }

        let mut seen = std::collections::HashSet::new();
        self.prospect_ids = std::mem::take(&mut self.prospect_ids)
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if self.prospect_ids.is_empty() {
            return Err(Error::validation("prospect_ids", "select at least one prospect"));
        }

        match (&self.image_base64, &self.image_mime_type) {
            (Some(_), None) => {
                return Err(Error::validation("image_mime_type", "required when an image is attached"))
            }
            (Some(_), Some(mime)) if !mime.starts_with("image/") => {
                return Err(Error::validation("image_mime_type", format!("'{}' is not an image type", mime)))
            }
            _ => {}
        }

        Ok(self)
    }
}

/// Reply to `POST /sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub total_prospects: u32,
    #[serde(default)]
    pub estimated_completion_time: f64,
}

/// Reply to `GET /sessions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<Session>,
    pub total_count: u32,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    #[serde(default)]
    pub active_sessions_count: u32,
    #[serde(default)]
    pub completed_sessions_count: u32,
}

/// Reply to `POST /sessions/{id}/cancel`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub message: String,
    pub cancelled_at: DateTime<Utc>,
}
