use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use noor_core::config::{AppConfig, LoadOptions, UpstreamConfig};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

/// One rendered config value: dotted key, display value, env override.
struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult {
                exit_code: EXIT_CONFIG,
                output: format!("config validation failed: {error}"),
            };
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let conversation = &config.conversation;
    let clinic = &config.clinic;
    let closed: Vec<String> =
        clinic.closed_weekdays.iter().map(|weekday| weekday.to_string()).collect();

    let mut fields = vec![
        Field::new("database.url", &config.database.url, &["NOOR_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["NOOR_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["NOOR_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["NOOR_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port.to_string(), &["NOOR_SERVER_PORT"]),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["NOOR_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::new(
            "webhook.shared_secret",
            redact_secret(&config.webhook.shared_secret),
            &["NOOR_WEBHOOK_SHARED_SECRET"],
        ),
        Field::new(
            "conversation.timezone",
            conversation.timezone.name(),
            &["NOOR_CONVERSATION_TIMEZONE"],
        ),
        Field::new(
            "conversation.summary_threshold",
            conversation.summary_threshold.to_string(),
            &["NOOR_CONVERSATION_SUMMARY_THRESHOLD"],
        ),
        Field::new(
            "conversation.summary_max_chars",
            conversation.summary_max_chars.to_string(),
            &["NOOR_CONVERSATION_SUMMARY_MAX_CHARS"],
        ),
        Field::new(
            "conversation.idle_timeout_secs",
            conversation.idle_timeout_secs.to_string(),
            &["NOOR_CONVERSATION_IDLE_TIMEOUT_SECS"],
        ),
        Field::new(
            "conversation.max_reply_chars",
            conversation.max_reply_chars.to_string(),
            &["NOOR_CONVERSATION_MAX_REPLY_CHARS"],
        ),
        Field::new(
            "conversation.reset_phrases.english",
            conversation.reset_phrases.english.join(", "),
            &["NOOR_CONVERSATION_RESET_PHRASES_EN"],
        ),
        Field::new(
            "conversation.reset_phrases.arabic",
            conversation.reset_phrases.arabic.join(", "),
            &["NOOR_CONVERSATION_RESET_PHRASES_AR"],
        ),
        Field::new(
            "clinic.opening_time",
            clinic.opening_time.format("%H:%M").to_string(),
            &["NOOR_CLINIC_OPENING_TIME"],
        ),
        Field::new(
            "clinic.closing_time",
            clinic.closing_time.format("%H:%M").to_string(),
            &["NOOR_CLINIC_CLOSING_TIME"],
        ),
        Field::new("clinic.closed_weekdays", closed.join(", "), &["NOOR_CLINIC_CLOSED_WEEKDAYS"]),
        Field::new("clinic.services", format!("{} entries", clinic.services.len()), &[]),
        Field::new("clinic.doctors", format!("{} entries", clinic.doctors.len()), &[]),
    ];

    fields.extend(upstream_fields(
        &config.directory,
        ["directory.base_url", "directory.api_token", "directory.timeout_secs"],
        [
            &["NOOR_DIRECTORY_BASE_URL"],
            &["NOOR_DIRECTORY_API_TOKEN"],
            &["NOOR_DIRECTORY_TIMEOUT_SECS"],
        ],
    ));
    fields.extend(upstream_fields(
        &config.appointments,
        ["appointments.base_url", "appointments.api_token", "appointments.timeout_secs"],
        [
            &["NOOR_APPOINTMENTS_BASE_URL"],
            &["NOOR_APPOINTMENTS_API_TOKEN"],
            &["NOOR_APPOINTMENTS_TIMEOUT_SECS"],
        ],
    ));
    fields.extend(upstream_fields(
        &config.knowledge_base,
        ["knowledge_base.base_url", "knowledge_base.api_token", "knowledge_base.timeout_secs"],
        [
            &["NOOR_KNOWLEDGE_BASE_BASE_URL"],
            &["NOOR_KNOWLEDGE_BASE_API_TOKEN"],
            &["NOOR_KNOWLEDGE_BASE_TIMEOUT_SECS"],
        ],
    ));

    fields.extend([
        Field::new("llm.provider", format!("{:?}", config.llm.provider), &["NOOR_LLM_PROVIDER"]),
        Field::new("llm.model", &config.llm.model, &["NOOR_LLM_MODEL"]),
        Field::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["NOOR_LLM_BASE_URL"],
        ),
        Field::new(
            "llm.api_key",
            config.llm.api_key.as_ref().map_or("<unset>".to_string(), redact_secret),
            &["NOOR_LLM_API_KEY"],
        ),
        Field::new(
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            &["NOOR_LLM_TIMEOUT_SECS"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["NOOR_LOGGING_LEVEL", "NOOR_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["NOOR_LOGGING_FORMAT", "NOOR_LOG_FORMAT"],
        ),
    ]);

    fields
}

fn upstream_fields(
    upstream: &UpstreamConfig,
    keys: [&'static str; 3],
    env_keys: [&'static [&'static str]; 3],
) -> [Field; 3] {
    let [base_url, api_token, timeout] = keys;
    let [base_url_env, api_token_env, timeout_env] = env_keys;
    [
        Field::new(base_url, upstream.base_url.as_deref().unwrap_or("<unset>"), base_url_env),
        Field::new(
            api_token,
            upstream.api_token.as_ref().map_or("<unset>".to_string(), redact_secret),
            api_token_env,
        ),
        Field::new(timeout, upstream.timeout_secs.to_string(), timeout_env),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("noor.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/noor.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Shows at most the first four characters of a secret.
fn redact_secret(secret: &SecretString) -> String {
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = trimmed.chars().take(4).collect();
    if trimmed.chars().count() <= 8 {
        return "<redacted>".to_string();
    }
    format!("{prefix}***")
}
