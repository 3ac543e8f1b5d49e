//! HTTP clients for the clinic backends and the chat model, plus the local
//! stand-ins used when an upstream is not configured.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use noor_agent::llm::{KnowledgeBase, LanguageModel, ModelContext};
use noor_agent::upstream::{
    AppointmentBook, PatientDirectory, APPOINTMENT_BOOK, KNOWLEDGE_BASE, LANGUAGE_MODEL,
    PATIENT_DIRECTORY,
};
use noor_core::config::{LlmConfig, LlmProvider, UpstreamConfig};
use noor_core::domain::booking::{AppointmentReceipt, BookingRequest};
use noor_core::domain::patient::{DirectoryLookupResult, PatientId, PatientProfile};
use noor_core::domain::session::Language;
use noor_core::errors::UpstreamError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

const DIRECTORY_PATH: &str = "/api-ai-get-customer-details";
const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

#[derive(Clone)]
struct Endpoint {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
    timeout: Duration,
}

impl Endpoint {
    fn new(
        client: Client,
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_owned(), token, timeout }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    fn transport_error(&self, upstream: &'static str, error: reqwest::Error) -> UpstreamError {
        if error.is_timeout() {
            UpstreamError::Timeout {
                upstream,
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            UpstreamError::Unavailable { upstream, reason: error.to_string() }
        }
    }
}

async fn success_json<T>(upstream: &'static str, response: Response) -> Result<T, UpstreamError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = response.status();
    if !status.is_success() {
        return Err(UpstreamError::Unavailable { upstream, reason: format!("HTTP {status}") });
    }
    response
        .json::<T>()
        .await
        .map_err(|error| UpstreamError::InvalidResponse { upstream, reason: error.to_string() })
}

/// Clinic patient directory, queried by local phone number.
pub struct HttpPatientDirectory {
    endpoint: Endpoint,
}

impl HttpPatientDirectory {
    pub fn new(client: Client, config: &UpstreamConfig, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url, config.api_token.clone(), config.timeout()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryEnvelope {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    data: Option<Value>,
}

#[async_trait]
impl PatientDirectory for HttpPatientDirectory {
    async fn lookup(&self, identifier: &str) -> DirectoryLookupResult {
        let request = self.endpoint.client.get(self.endpoint.url(DIRECTORY_PATH)).query(&[
            ("identifier_type", "PHONE"),
            ("identifier_value", identifier),
            ("includes_data", "details"),
        ]);
        let response = match self.endpoint.authorize(request).send().await {
            Ok(response) => response,
            Err(error) => {
                let error = self.endpoint.transport_error(PATIENT_DIRECTORY, error);
                return DirectoryLookupResult::UpstreamError(error.to_string());
            }
        };

        if response.status() == StatusCode::NOT_FOUND {
            return DirectoryLookupResult::NotFound;
        }
        match success_json::<DirectoryEnvelope>(PATIENT_DIRECTORY, response).await {
            Ok(envelope) => directory_result(envelope),
            Err(error) => DirectoryLookupResult::UpstreamError(error.to_string()),
        }
    }
}

fn directory_result(envelope: DirectoryEnvelope) -> DirectoryLookupResult {
    if !envelope.status {
        return DirectoryLookupResult::NotFound;
    }
    let Some(data) = envelope.data else {
        return DirectoryLookupResult::NotFound;
    };
    let details = data.get("details").filter(|details| details.is_object()).unwrap_or(&data);

    let Some(patient_id) = text_field(details, &["pm_si", "patient_id", "id"]) else {
        return DirectoryLookupResult::UpstreamError(format!(
            "{PATIENT_DIRECTORY} returned a record without a patient id"
        ));
    };
    DirectoryLookupResult::Found(PatientProfile {
        patient_id: PatientId(patient_id),
        name: text_field(details, &["name", "full_name", "customer_name"]),
        phone: text_field(details, &["phone", "mobile"]),
        gender: text_field(details, &["gender"]),
    })
}

fn text_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

pub struct HttpKnowledgeBase {
    endpoint: Endpoint,
}

impl HttpKnowledgeBase {
    pub fn new(client: Client, config: &UpstreamConfig, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url, config.api_token.clone(), config.timeout()),
        }
    }
}

#[derive(Serialize)]
struct AnswerRequest<'a> {
    query: &'a str,
    language: &'static str,
}

#[derive(Deserialize)]
struct AnswerResponse {
    answer: String,
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn answer(&self, query: &str, language: Language) -> Result<String, UpstreamError> {
        let request = self
            .endpoint
            .client
            .post(self.endpoint.url("/answer"))
            .json(&AnswerRequest { query, language: language.as_str() });
        let response = self
            .endpoint
            .authorize(request)
            .send()
            .await
            .map_err(|error| self.endpoint.transport_error(KNOWLEDGE_BASE, error))?;
        let body: AnswerResponse = success_json(KNOWLEDGE_BASE, response).await?;
        Ok(body.answer)
    }
}

/// Chat-completions client; works against OpenAI and Ollama alike.
pub struct HttpLanguageModel {
    endpoint: Endpoint,
    model: String,
}

impl HttpLanguageModel {
    pub fn new(client: Client, config: &LlmConfig) -> Self {
        let base_url = match (config.provider, config.base_url.as_deref()) {
            (_, Some(base_url)) if !base_url.trim().is_empty() => base_url,
            (LlmProvider::OpenAi, _) => OPENAI_BASE_URL,
            (LlmProvider::Ollama, _) => "http://localhost:11434",
        };
        Self {
            endpoint: Endpoint::new(client, base_url, config.api_key.clone(), config.timeout()),
            model: config.model.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

fn chat_messages(context: &ModelContext) -> Vec<ChatMessage> {
    let message = |role: &str, content: &str| ChatMessage {
        role: role.to_owned(),
        content: content.to_owned(),
    };
    let mut messages = vec![message("system", &context.system_prompt())];
    for turn in &context.recent_turns {
        messages.push(message("user", &turn.user));
        messages.push(message("assistant", &turn.assistant));
    }
    messages.push(message("user", &context.message));
    messages
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn generate(&self, context: &ModelContext) -> Result<String, UpstreamError> {
        let request = self.endpoint.client.post(self.endpoint.url("/v1/chat/completions")).json(
            &ChatRequest { model: &self.model, messages: chat_messages(context), temperature: 0.3 },
        );
        let response = self
            .endpoint
            .authorize(request)
            .send()
            .await
            .map_err(|error| self.endpoint.transport_error(LANGUAGE_MODEL, error))?;
        let body: ChatResponse = success_json(LANGUAGE_MODEL, response).await?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| UpstreamError::InvalidResponse {
                upstream: LANGUAGE_MODEL,
                reason: "completion carried no message".to_owned(),
            })
    }
}

pub struct HttpAppointmentBook {
    endpoint: Endpoint,
}

impl HttpAppointmentBook {
    pub fn new(client: Client, config: &UpstreamConfig, base_url: &str) -> Self {
        Self {
            endpoint: Endpoint::new(client, base_url, config.api_token.clone(), config.timeout()),
        }
    }
}

#[derive(Deserialize)]
struct ReceiptResponse {
    reference: String,
}

#[async_trait]
impl AppointmentBook for HttpAppointmentBook {
    async fn submit(&self, request: &BookingRequest) -> Result<AppointmentReceipt, UpstreamError> {
        let http = self.endpoint.client.post(self.endpoint.url("/appointments")).json(request);
        let response = self
            .endpoint
            .authorize(http)
            .send()
            .await
            .map_err(|error| self.endpoint.transport_error(APPOINTMENT_BOOK, error))?;
        let body: ReceiptResponse = success_json(APPOINTMENT_BOOK, response).await?;
        Ok(AppointmentReceipt { reference: body.reference, confirmed_at: Utc::now() })
    }
}

/// Directory used when none is configured: every sender is unknown and is
/// asked for an ID number.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredDirectory;

#[async_trait]
impl PatientDirectory for UnconfiguredDirectory {
    async fn lookup(&self, _identifier: &str) -> DirectoryLookupResult {
        debug!(event_name = "directory.unconfigured", "no patient directory configured");
        DirectoryLookupResult::NotFound
    }
}

/// Accepts every booking locally and issues a `LOCAL-` reference.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalAppointmentBook;

#[async_trait]
impl AppointmentBook for LocalAppointmentBook {
    async fn submit(&self, request: &BookingRequest) -> Result<AppointmentReceipt, UpstreamError> {
        let reference = format!("LOCAL-{}", Uuid::new_v4().simple());
        info!(
            event_name = "appointment.recorded_locally",
            request_id = %request.id.0,
            sender_id = %request.sender_id,
            reference = %reference,
            "no appointment backend configured; booking recorded locally"
        );
        Ok(AppointmentReceipt { reference, confirmed_at: Utc::now() })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredKnowledgeBase;

#[async_trait]
impl KnowledgeBase for UnconfiguredKnowledgeBase {
    async fn answer(&self, _query: &str, _language: Language) -> Result<String, UpstreamError> {
        Err(UpstreamError::Unavailable {
            upstream: KNOWLEDGE_BASE,
            reason: "knowledge_base.base_url is not configured".to_owned(),
        })
    }
}
