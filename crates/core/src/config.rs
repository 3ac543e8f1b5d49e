use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{DoctorEntry, DoctorRoster, ServiceCatalog, ServiceDefinition};
use crate::dates::BusinessHours;
use crate::domain::session::MemoryPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub conversation: ConversationConfig,
    pub clinic: ClinicConfig,
    pub directory: UpstreamConfig,
    pub appointments: UpstreamConfig,
    pub knowledge_base: UpstreamConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub shared_secret: SecretString,
}

#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub timezone: Tz,
    pub summary_threshold: usize,
    pub summary_max_chars: usize,
    pub idle_timeout_secs: u64,
    pub max_reply_chars: usize,
    pub reset_phrases: ResetPhrases,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResetPhrases {
    pub english: Vec<String>,
    pub arabic: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct ClinicConfig {
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub closed_weekdays: Vec<Weekday>,
    pub services: Vec<ServiceDefinition>,
    pub doctors: Vec<DoctorEntry>,
}

/// Connection settings shared by the HTTP upstreams. A missing `base_url`
/// means the upstream is not configured.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub webhook_shared_secret: Option<String>,
    pub timezone: Option<String>,
    pub directory_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 5;

impl Default for AppConfig {
    fn default() -> Self {
        let upstream = UpstreamConfig {
            base_url: None,
            api_token: None,
            timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
        };
        let hours = BusinessHours::default();
        Self {
            database: DatabaseConfig {
                url: "sqlite://noor.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            webhook: WebhookConfig { shared_secret: String::new().into() },
            conversation: ConversationConfig {
                timezone: chrono_tz::Asia::Hebron,
                summary_threshold: 12,
                summary_max_chars: 2_000,
                idle_timeout_secs: 1_800,
                max_reply_chars: 1_500,
                reset_phrases: ResetPhrases::default(),
            },
            clinic: ClinicConfig {
                opening_time: hours.opening,
                closing_time: hours.closing,
                closed_weekdays: hours.closed_weekdays,
                services: ServiceCatalog::default().services().to_vec(),
                doctors: DoctorRoster::default().doctors().to_vec(),
            },
            directory: upstream.clone(),
            appointments: upstream.clone(),
            knowledge_base: upstream,
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: DEFAULT_UPSTREAM_TIMEOUT_SECS,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for ResetPhrases {
    fn default() -> Self {
        let owned = |phrases: &[&str]| phrases.iter().map(|phrase| (*phrase).to_owned()).collect();
        Self {
            english: owned(&["cancel", "stop", "reset", "start over", "never mind", "forget it"]),
            arabic: owned(&["الغاء", "إلغاء", "الغي", "وقف", "ابدأ من جديد", "بلاش", "خلص"]),
        }
    }
}

impl ResetPhrases {
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.english.iter().chain(self.arabic.iter()).map(String::as_str)
    }
}

impl ConversationConfig {
    pub fn memory_policy(&self) -> MemoryPolicy {
        MemoryPolicy {
            summary_threshold: self.summary_threshold,
            summary_max_chars: self.summary_max_chars,
            idle_timeout: chrono::Duration::seconds(
                i64::try_from(self.idle_timeout_secs).unwrap_or(i64::MAX),
            ),
        }
    }
}

impl ClinicConfig {
    pub fn business_hours(&self) -> BusinessHours {
        BusinessHours {
            opening: self.opening_time,
            closing: self.closing_time,
            closed_weekdays: self.closed_weekdays.clone(),
        }
    }

    pub fn catalog(&self) -> ServiceCatalog {
        ServiceCatalog::new(self.services.clone())
    }

    pub fn roster(&self) -> DoctorRoster {
        DoctorRoster::new(self.doctors.clone())
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("noor.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides)?;
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(shared_secret) = webhook.shared_secret {
                self.webhook.shared_secret = secret_value(shared_secret);
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(timezone) = conversation.timezone {
                self.conversation.timezone = parse_file_timezone(&timezone)?;
            }
            if let Some(summary_threshold) = conversation.summary_threshold {
                self.conversation.summary_threshold = summary_threshold;
            }
            if let Some(summary_max_chars) = conversation.summary_max_chars {
                self.conversation.summary_max_chars = summary_max_chars;
            }
            if let Some(idle_timeout_secs) = conversation.idle_timeout_secs {
                self.conversation.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(max_reply_chars) = conversation.max_reply_chars {
                self.conversation.max_reply_chars = max_reply_chars;
            }
            if let Some(reset_phrases) = conversation.reset_phrases {
                if let Some(english) = reset_phrases.english {
                    self.conversation.reset_phrases.english = english;
                }
                if let Some(arabic) = reset_phrases.arabic {
                    self.conversation.reset_phrases.arabic = arabic;
                }
            }
        }

        if let Some(clinic) = patch.clinic {
            if let Some(opening_time) = clinic.opening_time {
                self.clinic.opening_time = parse_file_time("clinic.opening_time", &opening_time)?;
            }
            if let Some(closing_time) = clinic.closing_time {
                self.clinic.closing_time = parse_file_time("clinic.closing_time", &closing_time)?;
            }
            if let Some(closed_weekdays) = clinic.closed_weekdays {
                self.clinic.closed_weekdays = closed_weekdays
                    .iter()
                    .map(|day| parse_file_weekday(day))
                    .collect::<Result<_, _>>()?;
            }
            if let Some(services) = clinic.services {
                self.clinic.services = services;
            }
            if let Some(doctors) = clinic.doctors {
                self.clinic.doctors = doctors;
            }
        }

        if let Some(directory) = patch.directory {
            directory.apply_to(&mut self.directory);
        }
        if let Some(appointments) = patch.appointments {
            appointments.apply_to(&mut self.appointments);
        }
        if let Some(knowledge_base) = patch.knowledge_base {
            knowledge_base.apply_to(&mut self.knowledge_base);
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("NOOR_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("NOOR_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("NOOR_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("NOOR_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("NOOR_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NOOR_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("NOOR_SERVER_PORT") {
            self.server.port = parse_u16("NOOR_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("NOOR_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("NOOR_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("NOOR_WEBHOOK_SHARED_SECRET") {
            self.webhook.shared_secret = secret_value(value);
        }

        if let Some(value) = read_env("NOOR_CONVERSATION_TIMEZONE") {
            self.conversation.timezone = parse_timezone("NOOR_CONVERSATION_TIMEZONE", &value)?;
        }
        if let Some(value) = read_env("NOOR_CONVERSATION_SUMMARY_THRESHOLD") {
            self.conversation.summary_threshold =
                parse_usize("NOOR_CONVERSATION_SUMMARY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("NOOR_CONVERSATION_SUMMARY_MAX_CHARS") {
            self.conversation.summary_max_chars =
                parse_usize("NOOR_CONVERSATION_SUMMARY_MAX_CHARS", &value)?;
        }
        if let Some(value) = read_env("NOOR_CONVERSATION_IDLE_TIMEOUT_SECS") {
            self.conversation.idle_timeout_secs =
                parse_u64("NOOR_CONVERSATION_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("NOOR_CONVERSATION_MAX_REPLY_CHARS") {
            self.conversation.max_reply_chars =
                parse_usize("NOOR_CONVERSATION_MAX_REPLY_CHARS", &value)?;
        }
        if let Some(value) = read_env("NOOR_CONVERSATION_RESET_PHRASES_EN") {
            self.conversation.reset_phrases.english = parse_list(&value);
        }
        if let Some(value) = read_env("NOOR_CONVERSATION_RESET_PHRASES_AR") {
            self.conversation.reset_phrases.arabic = parse_list(&value);
        }

        if let Some(value) = read_env("NOOR_CLINIC_OPENING_TIME") {
            self.clinic.opening_time = parse_time("NOOR_CLINIC_OPENING_TIME", &value)?;
        }
        if let Some(value) = read_env("NOOR_CLINIC_CLOSING_TIME") {
            self.clinic.closing_time = parse_time("NOOR_CLINIC_CLOSING_TIME", &value)?;
        }
        if let Some(value) = read_env("NOOR_CLINIC_CLOSED_WEEKDAYS") {
            self.clinic.closed_weekdays = parse_list(&value)
                .iter()
                .map(|day| parse_weekday("NOOR_CLINIC_CLOSED_WEEKDAYS", day))
                .collect::<Result<_, _>>()?;
        }

        apply_upstream_env("NOOR_DIRECTORY", &mut self.directory)?;
        apply_upstream_env("NOOR_APPOINTMENTS", &mut self.appointments)?;
        apply_upstream_env("NOOR_KNOWLEDGE_BASE", &mut self.knowledge_base)?;

        if let Some(value) = read_env("NOOR_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("NOOR_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("NOOR_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("NOOR_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("NOOR_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("NOOR_LLM_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("NOOR_LOGGING_LEVEL").or_else(|| read_env("NOOR_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("NOOR_LOGGING_FORMAT").or_else(|| read_env("NOOR_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(shared_secret) = overrides.webhook_shared_secret {
            self.webhook.shared_secret = secret_value(shared_secret);
        }
        if let Some(timezone) = overrides.timezone {
            self.conversation.timezone = parse_file_timezone(&timezone)?;
        }
        if let Some(base_url) = overrides.directory_base_url {
            self.directory.base_url = Some(base_url);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_webhook(&self.webhook)?;
        validate_conversation(&self.conversation)?;
        validate_clinic(&self.clinic)?;
        validate_upstream("directory", &self.directory)?;
        validate_upstream("appointments", &self.appointments)?;
        validate_upstream("knowledge_base", &self.knowledge_base)?;
        validate_llm(&self.llm)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("noor.toml"), PathBuf::from("config/noor.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn apply_upstream_env(prefix: &str, upstream: &mut UpstreamConfig) -> Result<(), ConfigError> {
    if let Some(value) = read_env(&format!("{prefix}_BASE_URL")) {
        upstream.base_url = Some(value);
    }
    if let Some(value) = read_env(&format!("{prefix}_API_TOKEN")) {
        upstream.api_token = Some(secret_value(value));
    }
    let timeout_key = format!("{prefix}_TIMEOUT_SECS");
    if let Some(value) = read_env(&timeout_key) {
        upstream.timeout_secs = parse_u64(&timeout_key, &value)?;
    }
    Ok(())
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url = url.starts_with("sqlite:") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::memory:`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_webhook(webhook: &WebhookConfig) -> Result<(), ConfigError> {
    let secret = webhook.shared_secret.expose_secret().trim();
    if secret.is_empty() {
        return Err(ConfigError::Validation(
            "webhook.shared_secret is required; set NOOR_WEBHOOK_SHARED_SECRET to the value the WhatsApp bridge sends in `x-noor-webhook-secret`".to_string(),
        ));
    }
    if secret.chars().count() < 16 {
        return Err(ConfigError::Validation(
            "webhook.shared_secret must be at least 16 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.summary_threshold < 2 {
        return Err(ConfigError::Validation(
            "conversation.summary_threshold must be at least 2".to_string(),
        ));
    }
    if conversation.summary_max_chars < 200 {
        return Err(ConfigError::Validation(
            "conversation.summary_max_chars must be at least 200".to_string(),
        ));
    }
    if conversation.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.idle_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if conversation.max_reply_chars < 160 {
        return Err(ConfigError::Validation(
            "conversation.max_reply_chars must be at least 160".to_string(),
        ));
    }
    if conversation.reset_phrases.all().all(|phrase| phrase.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "conversation.reset_phrases must contain at least one phrase".to_string(),
        ));
    }
    Ok(())
}

fn validate_clinic(clinic: &ClinicConfig) -> Result<(), ConfigError> {
    if clinic.opening_time >= clinic.closing_time {
        return Err(ConfigError::Validation(
            "clinic.opening_time must be earlier than clinic.closing_time".to_string(),
        ));
    }
    if clinic.closed_weekdays.len() >= 7 {
        return Err(ConfigError::Validation(
            "clinic.closed_weekdays leaves no day open for appointments".to_string(),
        ));
    }
    if clinic.services.is_empty() {
        return Err(ConfigError::Validation(
            "clinic.services must list at least one bookable service".to_string(),
        ));
    }
    if clinic.doctors.is_empty() {
        return Err(ConfigError::Validation(
            "clinic.doctors must list at least one doctor".to_string(),
        ));
    }
    Ok(())
}

fn validate_upstream(name: &str, upstream: &UpstreamConfig) -> Result<(), ConfigError> {
    if upstream.timeout_secs == 0 || upstream.timeout_secs > 60 {
        return Err(ConfigError::Validation(format!(
            "{name}.timeout_secs must be in range 1..=60"
        )));
    }

    if let Some(base_url) = &upstream.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "{name}.base_url must start with http:// or https://"
            )));
        }
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 60 {
        return Err(ConfigError::Validation("llm.timeout_secs must be in range 1..=60".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_env(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_env(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_env(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_env(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_env(key, value))
}

fn parse_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_owned).collect()
}

fn parse_timezone(key: &str, value: &str) -> Result<Tz, ConfigError> {
    value.trim().parse::<Tz>().map_err(|_| invalid_env(key, value))
}

fn parse_time(key: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| invalid_env(key, value))
}

fn parse_weekday(key: &str, value: &str) -> Result<Weekday, ConfigError> {
    value.trim().parse::<Weekday>().map_err(|_| invalid_env(key, value))
}

fn parse_file_timezone(value: &str) -> Result<Tz, ConfigError> {
    value.trim().parse::<Tz>().map_err(|_| {
        ConfigError::Validation(format!(
            "conversation.timezone `{value}` is not an IANA timezone (e.g. `Asia/Hebron`)"
        ))
    })
}

fn parse_file_time(field: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| {
        ConfigError::Validation(format!("{field} must be formatted HH:MM, got `{value}`"))
    })
}

fn parse_file_weekday(value: &str) -> Result<Weekday, ConfigError> {
    value.trim().parse::<Weekday>().map_err(|_| {
        ConfigError::Validation(format!("clinic.closed_weekdays contains unknown day `{value}`"))
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    webhook: Option<WebhookPatch>,
    conversation: Option<ConversationPatch>,
    clinic: Option<ClinicPatch>,
    directory: Option<UpstreamPatch>,
    appointments: Option<UpstreamPatch>,
    knowledge_base: Option<UpstreamPatch>,
    llm: Option<LlmPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    shared_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    timezone: Option<String>,
    summary_threshold: Option<usize>,
    summary_max_chars: Option<usize>,
    idle_timeout_secs: Option<u64>,
    max_reply_chars: Option<usize>,
    reset_phrases: Option<ResetPhrasesPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ResetPhrasesPatch {
    english: Option<Vec<String>>,
    arabic: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ClinicPatch {
    opening_time: Option<String>,
    closing_time: Option<String>,
    closed_weekdays: Option<Vec<String>>,
    services: Option<Vec<ServiceDefinition>>,
    doctors: Option<Vec<DoctorEntry>>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamPatch {
    base_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
}

impl UpstreamPatch {
    fn apply_to(self, upstream: &mut UpstreamConfig) {
        if let Some(base_url) = self.base_url {
            upstream.base_url = Some(base_url);
        }
        if let Some(api_token) = self.api_token {
            upstream.api_token = Some(secret_value(api_token));
        }
        if let Some(timeout_secs) = self.timeout_secs {
            upstream.timeout_secs = timeout_secs;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use chrono::{NaiveTime, Weekday};
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const SECRET: &str = "bridge-secret-0123456789";

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_NOOR_BRIDGE_SECRET", SECRET);
        env::set_var("TEST_NOOR_DIRECTORY_TOKEN", "directory-token");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("noor.toml");
            fs::write(
                &path,
                r#"
[webhook]
shared_secret = "${TEST_NOOR_BRIDGE_SECRET}"

[directory]
base_url = "https://clinic.example"
api_token = "${TEST_NOOR_DIRECTORY_TOKEN}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.webhook.shared_secret.expose_secret() == SECRET,
                "webhook secret should be loaded from environment",
            )?;
            ensure(
                config
                    .directory
                    .api_token
                    .as_ref()
                    .is_some_and(|token| token.expose_secret() == "directory-token"),
                "directory token should be loaded from environment",
            )?;
            ensure(config.directory.is_configured(), "directory should be configured")?;
            ensure(!config.appointments.is_configured(), "appointments stay unconfigured")?;
            Ok(())
        })();

        clear_vars(&["TEST_NOOR_BRIDGE_SECRET", "TEST_NOOR_DIRECTORY_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOOR_WEBHOOK_SHARED_SECRET", SECRET);
        env::set_var("NOOR_LOG_LEVEL", "warn");
        env::set_var("NOOR_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["NOOR_WEBHOOK_SHARED_SECRET", "NOOR_LOG_LEVEL", "NOOR_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOOR_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("NOOR_WEBHOOK_SHARED_SECRET", "secret-from-env-0001");
        env::set_var("NOOR_CONVERSATION_SUMMARY_THRESHOLD", "20");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("noor.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[webhook]
shared_secret = "secret-from-file-0001"

[conversation]
summary_threshold = 8
idle_timeout_secs = 600

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.webhook.shared_secret.expose_secret() == "secret-from-env-0001",
                "env webhook secret should win over file and defaults",
            )?;
            ensure(config.conversation.summary_threshold == 20, "env threshold should win")?;
            ensure(config.conversation.idle_timeout_secs == 600, "file idle timeout applies")?;
            Ok(())
        })();

        clear_vars(&[
            "NOOR_DATABASE_URL",
            "NOOR_WEBHOOK_SHARED_SECRET",
            "NOOR_CONVERSATION_SUMMARY_THRESHOLD",
        ]);
        result
    }

    #[test]
    fn clinic_section_and_list_env_vars_are_parsed() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOOR_WEBHOOK_SHARED_SECRET", SECRET);
        env::set_var("NOOR_CLINIC_CLOSED_WEEKDAYS", "fri, sat");
        env::set_var("NOOR_CONVERSATION_RESET_PHRASES_EN", "cancel, abort ,");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("noor.toml");
            fs::write(
                &path,
                r#"
[conversation]
timezone = "Asia/Gaza"

[clinic]
opening_time = "08:30"
closing_time = "17:00"

[[clinic.services]]
code = "root_canal"
name = "Root canal"
name_ar = "علاج عصب"
aliases = ["canal"]
duration_minutes = 90
price = "850.00"

[[clinic.doctors]]
name = "Dr. Hana"
aliases = ["hana", "هناء"]
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.conversation.timezone == chrono_tz::Asia::Gaza, "timezone from file")?;
            ensure(
                config.clinic.opening_time == NaiveTime::from_hms_opt(8, 30, 0).unwrap_or_default(),
                "opening time from file",
            )?;
            ensure(
                config.clinic.closed_weekdays == vec![Weekday::Fri, Weekday::Sat],
                "closed weekdays from env list",
            )?;
            ensure(
                config.conversation.reset_phrases.english == vec!["cancel", "abort"],
                "reset phrases from env list",
            )?;
            ensure(
                config.clinic.catalog().match_service("I need a canal").is_some(),
                "catalog should come from the file",
            )?;
            ensure(
                config.clinic.roster().match_doctor("هناء").as_deref() == Some("Dr. Hana"),
                "roster should come from the file",
            )?;
            Ok(())
        })();

        clear_vars(&[
            "NOOR_WEBHOOK_SHARED_SECRET",
            "NOOR_CLINIC_CLOSED_WEEKDAYS",
            "NOOR_CONVERSATION_RESET_PHRASES_EN",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOOR_WEBHOOK_SHARED_SECRET", "short");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("webhook.shared_secret")
            );
            ensure(has_message, "validation failure should mention webhook.shared_secret")
        })();

        clear_vars(&["NOOR_WEBHOOK_SHARED_SECRET"]);
        result
    }

    #[test]
    fn invalid_timezone_and_upstream_timeout_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOOR_WEBHOOK_SHARED_SECRET", SECRET);
        env::set_var("NOOR_CONVERSATION_TIMEZONE", "Mars/Olympus");

        let result = (|| -> Result<(), String> {
            let timezone_error = AppConfig::load(LoadOptions::default()).err();
            ensure(
                matches!(
                    timezone_error,
                    Some(ConfigError::InvalidEnvOverride { ref key, .. })
                        if key == "NOOR_CONVERSATION_TIMEZONE"
                ),
                "unknown timezone should be rejected",
            )?;

            env::remove_var("NOOR_CONVERSATION_TIMEZONE");
            env::set_var("NOOR_DIRECTORY_TIMEOUT_SECS", "120");
            let timeout_error = AppConfig::load(LoadOptions::default()).err();
            ensure(
                matches!(
                    timeout_error,
                    Some(ConfigError::Validation(ref message))
                        if message.contains("directory.timeout_secs")
                ),
                "directory timeout above 60s should be rejected",
            )
        })();

        clear_vars(&[
            "NOOR_WEBHOOK_SHARED_SECRET",
            "NOOR_CONVERSATION_TIMEZONE",
            "NOOR_DIRECTORY_TIMEOUT_SECS",
        ]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("NOOR_WEBHOOK_SHARED_SECRET", "bridge-secret-value-xyz");
        env::set_var("NOOR_DIRECTORY_API_TOKEN", "directory-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("bridge-secret-value-xyz"),
                "debug output should not contain webhook secret",
            )?;
            ensure(
                !debug.contains("directory-secret-value"),
                "debug output should not contain directory token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            ensure(
                config.conversation.timezone == chrono_tz::Asia::Hebron,
                "default timezone should be Asia/Hebron",
            )?;
            Ok(())
        })();

        clear_vars(&["NOOR_WEBHOOK_SHARED_SECRET", "NOOR_DIRECTORY_API_TOKEN"]);
        result
    }
}
