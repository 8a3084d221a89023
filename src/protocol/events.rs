//! Named events pushed on a session stream
//!
//! The stream carries `response_received`, `session_completed` and `error`
//! frames with JSON payloads. Names this version does not know decode to
//! [`StreamEvent::Unknown`] so newer servers never break older clients.

use serde::{Deserialize, Serialize};

use super::session::{SessionResponse, SessionSummary};
use crate::error::{Error, Result};

pub const RESPONSE_RECEIVED: &str = "response_received";
pub const SESSION_COMPLETED: &str = "session_completed";
pub const ERROR: &str = "error";

/// Server-side progress snapshot, authoritative for `total_responded`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total_expected: u32,
    pub total_responded: u32,
    #[serde(default)]
    pub percentage: f64,
}

impl Progress {
    /// Build a snapshot with the percentage filled in
    pub fn new(total_responded: u32, total_expected: u32) -> Self {
        let percentage = if total_expected == 0 {
            0.0
        } else {
            f64::from(total_responded) * 100.0 / f64::from(total_expected)
        };
        Self {
            total_expected,
            total_responded,
            percentage,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ResponseReceivedPayload {
    new_response: SessionResponse,
    #[serde(default)]
    progress: Option<Progress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionCompletedPayload {
    #[serde(default)]
    summary: Option<SessionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorPayload {
    #[serde(default, alias = "message")]
    error: Option<String>,
}

/// Decoded stream event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// One prospect answered
    ResponseReceived {
        response: SessionResponse,
        progress: Option<Progress>,
    },
    /// All answers collected; carries the summary when the server made one
    SessionCompleted { summary: Option<SessionSummary> },
    /// In-band session failure
    Error { message: String },
    /// Event name this client does not understand
    Unknown { name: String },
}

impl StreamEvent {
    /// Decode one frame given its event name and data payload
    pub fn decode(name: &str, data: &str) -> Result<Self> {
        let parse_err = |e: serde_json::Error| {
            Error::malformed(format!("invalid '{}' payload: {}", name, e))
        };

        match name {
            RESPONSE_RECEIVED => {
                let payload: ResponseReceivedPayload = serde_json::from_str(data).map_err(parse_err)?;
                Ok(StreamEvent::ResponseReceived {
                    response: payload.new_response,
                    progress: payload.progress,
                })
            }
            SESSION_COMPLETED => {
                let payload: SessionCompletedPayload = if data.trim().is_empty() {
                    SessionCompletedPayload { summary: None }
                } else {
                    serde_json::from_str(data).map_err(parse_err)?
                };
                Ok(StreamEvent::SessionCompleted { summary: payload.summary })
            }
            ERROR => {
                let payload: ErrorPayload = serde_json::from_str(data).map_err(parse_err)?;
                Ok(StreamEvent::Error {
                    message: payload.error.unwrap_or_else(|| "session failed".to_string()),
                })
            }
            other => Ok(StreamEvent::Unknown { name: other.to_string() }),
        }
    }

    /// Event name on the wire
    pub fn name(&self) -> &str {
        match self {
            StreamEvent::ResponseReceived { .. } => RESPONSE_RECEIVED,
            StreamEvent::SessionCompleted { .. } => SESSION_COMPLETED,
            StreamEvent::Error { .. } => ERROR,
            StreamEvent::Unknown { name } => name,
        }
    }

    /// JSON data payload as the server would send it
    pub fn encode_data(&self) -> Result<String> {
        let json = match self {
            StreamEvent::ResponseReceived { response, progress } => {
                serde_json::to_string(&ResponseReceivedPayload {
                    new_response: response.clone(),
                    progress: *progress,
                })
            }
            StreamEvent::SessionCompleted { summary } => {
                serde_json::to_string(&SessionCompletedPayload { summary: summary.clone() })
            }
            StreamEvent::Error { message } => serde_json::to_string(&ErrorPayload {
                error: Some(message.clone()),
            }),
            StreamEvent::Unknown { .. } => Ok("{}".to_string()),
        };
        json.map_err(|e| Error::malformed(e.to_string()))
    }

    /// Whether this event ends the stream
    pub fn is_completion(&self) -> bool {
        matches!(self, StreamEvent::SessionCompleted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "new_response": {
            "persona": {"lead_id": "LEAD-1000", "full_name": "Person 1", "lead_classification": "hot"},
            "answer": "Sounds great",
            "answered_at": "2024-05-01T10:00:05Z",
            "confidence_score": 0.82
        },
        "progress": {"total_expected": 3, "total_responded": 1, "percentage": 33.3}
    }"#;

    #[test]
    fn test_decode_response_received() {
        match StreamEvent::decode(RESPONSE_RECEIVED, RESPONSE).unwrap() {
            StreamEvent::ResponseReceived { response, progress } => {
                assert_eq!(response.persona.lead_id, "LEAD-1000");
                assert_eq!(progress.unwrap().total_responded, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_decode_completed_without_summary() {
        let event = StreamEvent::decode(SESSION_COMPLETED, "{}").unwrap();
        assert_eq!(event, StreamEvent::SessionCompleted { summary: None });
        assert!(event.is_completion());
    }

    #[test]
    fn test_decode_error_accepts_message_alias() {
        let event = StreamEvent::decode(ERROR, r#"{"message":"model offline"}"#).unwrap();
        assert_eq!(event, StreamEvent::Error { message: "model offline".to_string() });
    }

    #[test]
    fn test_unknown_event_is_not_fatal() {
        let event = StreamEvent::decode("heartbeat", "not even json").unwrap();
        assert_eq!(event, StreamEvent::Unknown { name: "heartbeat".to_string() });
    }

    #[test]
    fn test_malformed_known_event_is_an_error() {
        let err = StreamEvent::decode(RESPONSE_RECEIVED, "{\"new_response\": 3}").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }

    #[test]
    fn test_progress_percentage() {
        let p = Progress::new(2, 4);
        assert_eq!(p.percentage, 50.0);
        assert_eq!(Progress::new(0, 0).percentage, 0.0);
    }
}
