//! Authenticated inbound endpoint for the WhatsApp bridge.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use noor_agent::{InboundMessage, Orchestrator};
use noor_core::domain::session::{Language, SenderId};
use noor_core::errors::InterfaceError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

pub const SECRET_HEADER: &str = "x-noor-webhook-secret";

/// Largest text the WhatsApp sender accepts in one message.
pub const MAX_CHUNK_BYTES: usize = 3_500;

#[derive(Clone)]
pub struct WebhookState {
    orchestrator: Arc<Orchestrator>,
    shared_secret: SecretString,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InboundRequest {
    pub sender_id: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language_hint: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundResponse {
    pub reply_text: String,
    pub chunks: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookError {
    pub error: String,
    pub correlation_id: String,
}

/// Compares the header against the configured secret in constant time.
fn secret_matches(provided: Option<&str>, expected: &SecretString) -> bool {
    provided.is_some_and(|provided| {
        bool::from(provided.as_bytes().ct_eq(expected.expose_secret().as_bytes()))
    })
}

pub fn router(orchestrator: Arc<Orchestrator>, shared_secret: SecretString) -> Router {
    Router::new()
        .route("/v1/inbound", post(inbound))
        .with_state(WebhookState { orchestrator, shared_secret })
}

pub async fn inbound(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    Json(request): Json<InboundRequest>,
) -> Result<Json<InboundResponse>, (StatusCode, Json<WebhookError>)> {
    let correlation_id = format!("req-{}", Uuid::new_v4());

    let provided = headers.get(SECRET_HEADER).and_then(|value| value.to_str().ok());
    if !secret_matches(provided, &state.shared_secret) {
        warn!(
            event_name = "webhook.unauthorized",
            correlation_id = %correlation_id,
            header_present = provided.is_some(),
            "inbound request rejected"
        );
        return Err(reject(InterfaceError::Unauthorized {
            message: "invalid webhook secret".to_owned(),
            correlation_id,
        }));
    }

    let sender_id = request.sender_id.trim();
    if sender_id.is_empty() || request.text.trim().is_empty() {
        return Err(reject(InterfaceError::BadRequest {
            message: "sender_id and text must not be empty".to_owned(),
            correlation_id,
        }));
    }

    let message = InboundMessage::new(
        SenderId(sender_id.to_owned()),
        request.text.trim(),
        request.timestamp.unwrap_or_else(Utc::now),
    )
    .with_language_hint(request.language_hint.as_deref().and_then(Language::parse))
    .with_message_id(request.message_id.filter(|id| !id.trim().is_empty()))
    .with_correlation_id(correlation_id.clone());

    let reply = state
        .orchestrator
        .handle_turn(message)
        .await
        .map_err(|error| reject(error.into_interface(correlation_id.clone())))?;

    let chunks = split_reply(&reply.reply_text, MAX_CHUNK_BYTES);
    info!(
        event_name = "webhook.replied",
        correlation_id = %correlation_id,
        sender_id = %sender_id,
        duplicate = reply.duplicate,
        chunk_count = chunks.len(),
        "inbound request answered"
    );
    Ok(Json(InboundResponse { reply_text: reply.reply_text, chunks }))
}

fn reject(error: InterfaceError) -> (StatusCode, Json<WebhookError>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(
            event_name = "webhook.failed",
            correlation_id = %error.correlation_id(),
            error = %error,
            "inbound request failed"
        );
    }
    (
        status,
        Json(WebhookError {
            error: error.user_message().to_owned(),
            correlation_id: error.correlation_id().to_owned(),
        }),
    )
}

/// Splits `text` into pieces of at most `max_bytes`, cutting at the last
/// whitespace inside the window when there is one and never inside a UTF-8
/// sequence.
pub fn split_reply(text: &str, max_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text.trim();

    while rest.len() > max_bytes {
        let mut boundary = max_bytes;
        while !rest.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let window = &rest[..boundary];
        let cut = match window.rfind(char::is_whitespace) {
            Some(position) if position > 0 => position,
            _ => boundary,
        };
        // A lone multi-byte char wider than the window still has to move on.
        let cut = match cut {
            0 => rest.chars().next().map_or(rest.len(), char::len_utf8),
            cut => cut,
        };

        let chunk = rest[..cut].trim_end();
        if !chunk.is_empty() {
            chunks.push(chunk.to_owned());
        }
        rest = rest[cut..].trim_start();
    }

    if !rest.is_empty() {
        chunks.push(rest.to_owned());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use noor_agent::fakes::{
        RecordingAppointmentBook, StaticKnowledgeBase, StaticLanguageModel, StaticPatientDirectory,
    };
    use noor_agent::{Collaborators, Orchestrator, OrchestratorSettings};
    use noor_core::audit::InMemoryAuditSink;
    use noor_core::domain::session::{ConversationSession, SenderId};
    use noor_core::flows::BookingFlow;
    use noor_db::repositories::{InMemorySessionRepository, RepositoryError, SessionRepository};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::{router, secret_matches, split_reply, InboundResponse, SECRET_HEADER};

    const SECRET: &str = "bridge-secret-0123456789";

    fn app_with(sessions: Arc<dyn SessionRepository>) -> Router {
        let collaborators = Collaborators {
            sessions,
            directory: Arc::new(StaticPatientDirectory::default()),
            appointments: Arc::new(RecordingAppointmentBook::default()),
            knowledge_base: Arc::new(StaticKnowledgeBase::default()),
            model: Arc::new(StaticLanguageModel::default()),
            audit: Arc::new(InMemoryAuditSink::default()),
        };
        let orchestrator = Orchestrator::new(
            BookingFlow::default(),
            OrchestratorSettings::default(),
            collaborators,
        );
        router(Arc::new(orchestrator), SECRET.to_string().into())
    }

    fn app() -> Router {
        app_with(Arc::new(InMemorySessionRepository::default()))
    }

    fn post(secret: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/inbound")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).expect("request builds")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn message(text: &str) -> Value {
        json!({
            "sender_id": "970591234567@c.us",
            "text": text,
            "timestamp": "2026-10-14T07:00:00Z",
        })
    }

    #[tokio::test]
    async fn authenticated_message_gets_a_reply() {
        let response = app()
            .oneshot(post(Some(SECRET), message("I want a dental cleaning")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body: InboundResponse =
            serde_json::from_value(json_body(response).await).expect("reply shape");
        assert!(body.reply_text.contains("Which day suits you?"));
        assert_eq!(body.chunks, vec![body.reply_text.clone()]);
    }

    #[tokio::test]
    async fn wrong_or_missing_secret_is_unauthorized() {
        for secret in [None, Some("not-the-secret")] {
            let response =
                app().oneshot(post(secret, message("hello"))).await.expect("response");
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body = json_body(response).await;
            assert_eq!(body["error"], "The request is not authorized.");
        }
    }

    #[test]
    fn secret_must_match_exactly() {
        let expected = SECRET.to_string().into();

        assert!(secret_matches(Some(SECRET), &expected));
        assert!(!secret_matches(None, &expected));
        assert!(!secret_matches(Some(""), &expected));
        assert!(!secret_matches(Some("bridge-secret-012345678"), &expected), "prefix");
        assert!(!secret_matches(Some("bridge-secret-0123456789x"), &expected), "extension");
        assert!(!secret_matches(Some("Bridge-secret-0123456789"), &expected), "case");
    }

    #[tokio::test]
    async fn empty_text_is_a_bad_request() {
        let response = app().oneshot(post(Some(SECRET), message("   "))).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["correlation_id"]
            .as_str()
            .is_some_and(|id| id.starts_with("req-")));
    }

    struct UnavailableSessions;

    #[async_trait]
    impl SessionRepository for UnavailableSessions {
        async fn find(
            &self,
            _sender_id: &SenderId,
        ) -> Result<Option<ConversationSession>, RepositoryError> {
            Err(RepositoryError::Decode("session store offline".into()))
        }

        async fn save(&self, _session: ConversationSession) -> Result<(), RepositoryError> {
            Err(RepositoryError::Decode("session store offline".into()))
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_service_unavailable_without_internals() {
        let response = app_with(Arc::new(UnavailableSessions))
            .oneshot(post(Some(SECRET), message("hello")))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["error"], "The service is temporarily unavailable. Please retry shortly.");
        assert!(!body.to_string().contains("offline"));
    }

    #[test]
    fn short_replies_are_a_single_chunk() {
        assert_eq!(split_reply("  Hello there  ", 3_500), vec!["Hello there".to_owned()]);
        assert!(split_reply("", 3_500).is_empty());
    }

    #[test]
    fn long_replies_split_on_whitespace_within_the_limit() {
        let text = "word ".repeat(1_000);
        let chunks = split_reply(&text, 3_500);

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|chunk| chunk.len() <= 3_500));
        assert!(chunks.iter().all(|chunk| chunk.split(' ').all(|word| word == "word")));
    }

    #[test]
    fn arabic_text_without_spaces_splits_on_char_boundaries() {
        let text = "م".repeat(2_000);
        let chunks = split_reply(&text, 3_501);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 3_500);
        assert_eq!(chunks.concat(), text);
    }
}
