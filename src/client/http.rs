//! HTTP session service client
//!
//! Talks JSON to the Q&A endpoints and opens `text/event-stream` channels
//! for live sessions. Request/response calls carry the configured timeout;
//! streams do not.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::config::ApiSettings;
use crate::error::{Error, Result};
use crate::protocol::{
    list_query, CancelSessionResponse, CreateSessionRequest, CreateSessionResponse, Pagination,
    Session, SessionFilters, SessionListResponse,
};
use crate::stream::{decode_sse, EventStream, EventTransport};
use crate::version::build_info;

use super::SessionService;

/// reqwest-backed [`SessionService`] and [`EventTransport`]
#[derive(Clone)]
pub struct HttpSessionClient {
    base: Url,
    client: Client,
    stream_client: Client,
}

impl HttpSessionClient {
    /// Create a client for the configured service
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        let raw = format!(
            "{}{}",
            settings.base_url.trim_end_matches('/'),
            settings.api_prefix.trim_end_matches('/')
        );
        let base = Url::parse(&raw)
            .map_err(|e| Error::config_field_invalid("api.base_url", format!("'{}': {}", raw, e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::config_field_invalid("api.base_url", format!("'{}' cannot be a base URL", raw)));
        }

        let user_agent = build_info().user_agent();
        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;
        let stream_client = Client::builder()
            .connect_timeout(settings.timeout())
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        info!(base_url = %base, "HTTP session client created");

        Ok(Self {
            base,
            client,
            stream_client,
        })
    }

    /// Endpoint URL with percent-encoded path segments
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Internal(format!("'{}' cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, url: &Url, request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::from_reqwest(url.as_str(), e))?;
        check_status(url, response).await
    }

    async fn read_json<T: serde::de::DeserializeOwned>(url: &Url, response: Response) -> Result<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| Error::from_reqwest(url.as_str(), e))
    }
}

/// Pass 2xx responses through; turn anything else into `HttpStatus`
async fn check_status(url: &Url, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    debug!(url = %url, status = status.as_u16(), %message, "Request rejected");
    Err(Error::HttpStatus {
        url: url.to_string(),
        status: status.as_u16(),
        message,
    })
}

/// Pull a human message out of an error body (`detail` or `message`)
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let field = value.get("detail").or_else(|| value.get("message"))?;
    match field {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn not_found_as(session_id: &str) -> impl FnOnce(Error) -> Error + '_ {
    move |err| match err {
        Error::HttpStatus { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            Error::SessionNotFound {
                session_id: session_id.to_string(),
            }
        }
        other => other,
    }
}

#[async_trait]
impl SessionService for HttpSessionClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse> {
        let request = request.validate()?;
        let url = self.endpoint(&["sessions"])?;
        debug!(url = %url, prospects = request.prospect_ids.len(), "Creating session");

        let response = self.send(&url, self.client.post(url.clone()).json(&request)).await?;
        let created: CreateSessionResponse = Self::read_json(&url, response).await?;

        info!(
            session_id = %created.session_id,
            total_prospects = created.total_prospects,
            "Session created"
        );
        Ok(created)
    }

    async fn list(
        &self,
        filters: &SessionFilters,
        pagination: &Pagination,
    ) -> Result<SessionListResponse> {
        let url = self.endpoint(&["sessions"])?;
        let query = list_query(filters, pagination);
        let response = self.send(&url, self.client.get(url.clone()).query(&query)).await?;
        Self::read_json(&url, response).await
    }

    async fn detail(&self, session_id: &str) -> Result<Session> {
        let url = self.endpoint(&["sessions", session_id])?;
        let response = self
            .send(&url, self.client.get(url.clone()))
            .await
            .map_err(not_found_as(session_id))?;
        Self::read_json(&url, response).await
    }

    async fn cancel(&self, session_id: &str) -> Result<CancelSessionResponse> {
        let url = self.endpoint(&["sessions", session_id, "cancel"])?;
        let response = self
            .send(&url, self.client.post(url.clone()))
            .await
            .map_err(not_found_as(session_id))?;
        let cancelled: CancelSessionResponse = Self::read_json(&url, response).await?;
        info!(session_id, status = %cancelled.status, "Session cancel acknowledged");
        Ok(cancelled)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let url = self.endpoint(&["sessions", session_id])?;
        self.send(&url, self.client.delete(url.clone()))
            .await
            .map_err(not_found_as(session_id))?;
        info!(session_id, "Session deleted");
        Ok(())
    }
}

impl EventTransport for HttpSessionClient {
    fn name(&self) -> &str {
        "http"
    }

    fn open(&self, session_id: &str) -> EventStream {
        let client = self.stream_client.clone();
        let url = self.endpoint(&["sessions", session_id, "stream"]);
        let session_id = session_id.to_string();

        stream::once(async move {
            let url = url?;
            debug!(url = %url, "Opening session stream");
            let response = client
                .get(url.clone())
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
                .map_err(|e| Error::stream_disconnect(session_id.clone(), e.to_string()))?;
            let response = check_status(&url, response).await?;
            Ok::<_, Error>(decode_sse(session_id, response.bytes_stream()))
        })
        .try_flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{SessionStatus, SortOrder, StreamEvent};
    use crate::stream::sse::encode_frame;
    use mockito::{Matcher, Server};

    fn client_for(server: &Server) -> HttpSessionClient {
        let settings = ApiSettings {
            base_url: server.url(),
            ..Default::default()
        };
        HttpSessionClient::new(&settings).unwrap()
    }

    const SESSION_JSON: &str = r#"{
        "session_id": "s-1",
        "question": "Would you buy this?",
        "status": "in_progress",
        "created_at": "2024-05-01T10:00:00Z",
        "total_expected": 2,
        "total_responded": 1,
        "responses": [{
            "persona": {"lead_id": "LEAD-1000", "full_name": "Person 1", "lead_classification": "hot"},
            "answer": "Yes",
            "answered_at": "2024-05-01T10:00:03Z"
        }]
    }"#;

    #[test]
    fn test_endpoint_encodes_segments() {
        let client = HttpSessionClient::new(&ApiSettings::default()).unwrap();
        let url = client.endpoint(&["sessions", "a b/c", "cancel"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/v1/qa/sessions/a%20b%2Fc/cancel");
    }

    #[test]
    fn test_error_message_prefers_detail() {
        assert_eq!(error_message(r#"{"detail":"nope","message":"x"}"#).as_deref(), Some("nope"));
        assert_eq!(error_message(r#"{"message":"busy"}"#).as_deref(), Some("busy"));
        assert_eq!(error_message("<html>"), None);
    }

    #[tokio::test]
    async fn test_create_posts_validated_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/qa/sessions")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "question": "Would you buy this?",
                "prospect_ids": ["LEAD-1000", "LEAD-1001"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"session_id":"s-1","status":"pending","message":"ok",
                    "created_at":"2024-05-01T10:00:00Z","total_prospects":2,
                    "estimated_completion_time":12.5}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let request = CreateSessionRequest::new(
            " Would you buy this? ",
            ["LEAD-1000", "LEAD-1001", "LEAD-1000"],
            None,
        );
        let created = client.create(request).await.unwrap();

        assert_eq!(created.session_id, "s-1");
        assert_eq!(created.total_prospects, 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_rejects_before_network() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/qa/sessions")
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .create(CreateSessionRequest::new("", ["LEAD-1000"], None))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_forwards_pagination_explicitly() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/qa/sessions")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "2".into()),
                Matcher::UrlEncoded("page_size".into(), "10".into()),
                Matcher::UrlEncoded("sort_by".into(), "created_at".into()),
                Matcher::UrlEncoded("sort_order".into(), "asc".into()),
                Matcher::UrlEncoded("status_filter".into(), "pending,completed".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{"sessions":[{}],"total_count":11,"page":2,"page_size":10,"total_pages":2,
                    "active_sessions_count":1,"completed_sessions_count":0}}"#,
                SESSION_JSON
            ))
            .create_async()
            .await;

        let client = client_for(&server);
        let filters = SessionFilters {
            status_filter: vec![SessionStatus::Pending, SessionStatus::Completed],
            ..Default::default()
        };
        let pagination = Pagination {
            page: 2,
            page_size: 10,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let page = client.list(&filters, &pagination).await.unwrap();

        assert_eq!(page.sessions.len(), 1);
        assert_eq!(page.total_pages, 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_detail_not_found_maps_to_session_not_found() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/qa/sessions/missing")
            .with_status(404)
            .with_body(r#"{"detail":"Session not found"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.detail("missing").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound { ref session_id } if session_id == "missing"));
    }

    #[tokio::test]
    async fn test_server_error_keeps_detail_message() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/api/v1/qa/sessions/s-1/cancel")
            .with_status(503)
            .with_body(r#"{"message":"worker pool exhausted"}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.cancel("s-1").await.unwrap_err();
        match err {
            Error::HttpStatus { status, ref message, .. } => {
                assert_eq!(status, 503);
                assert_eq!(message, "worker pool exhausted");
            }
            ref other => panic!("unexpected error {:?}", other),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_delete_succeeds_on_empty_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("DELETE", "/api/v1/qa/sessions/s-1")
            .with_status(204)
            .create_async()
            .await;

        client_for(&server).delete("s-1").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let settings = ApiSettings {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let client = HttpSessionClient::new(&settings).unwrap();
        let err = client.detail("s-1").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_stream_decodes_events_then_ends() {
        let mut server = Server::new_async().await;
        let body = format!(
            "{}{}",
            encode_frame("heartbeat", "{}"),
            encode_frame("error", r#"{"error":"model offline"}"#)
        );
        server
            .mock("GET", "/api/v1/qa/sessions/s-1/stream")
            .match_header("accept", "text/event-stream")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = client_for(&server);
        let events: Vec<_> = client.open("s-1").collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(StreamEvent::Unknown { .. })));
        assert!(matches!(events[1], Ok(StreamEvent::Error { ref message }) if message == "model offline"));
    }

    #[tokio::test]
    async fn test_stream_rejected_is_single_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/api/v1/qa/sessions/gone/stream")
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server);
        let events: Vec<_> = client.open("gone").collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_err());
    }
}
