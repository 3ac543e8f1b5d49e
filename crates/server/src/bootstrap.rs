use std::sync::Arc;

use axum::Router;
use noor_agent::audit::TracingAuditSink;
use noor_agent::llm::KnowledgeBase;
use noor_agent::upstream::{AppointmentBook, PatientDirectory};
use noor_agent::{Collaborators, Orchestrator};
use noor_core::config::{AppConfig, ConfigError, UpstreamConfig};
use noor_db::{connect_with_settings, migrations, DbPool, SqlSessionRepository};
use thiserror::Error;
use tracing::info;

use crate::upstream::{
    build_client, HttpAppointmentBook, HttpKnowledgeBase, HttpLanguageModel,
    HttpPatientDirectory, LocalAppointmentBook, UnconfiguredDirectory, UnconfiguredKnowledgeBase,
};
use crate::{health, webhook};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

impl Application {
    /// Health and inbound routes on one listener.
    pub fn router(&self) -> Router {
        health::router(self.db_pool.clone()).merge(webhook::router(
            self.orchestrator.clone(),
            self.config.webhook.shared_secret.clone(),
        ))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        timezone = %config.conversation.timezone,
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let collaborators = Collaborators {
        sessions: Arc::new(SqlSessionRepository::new(db_pool.clone())),
        directory: directory(&config.directory)?,
        appointments: appointments(&config.appointments)?,
        knowledge_base: knowledge_base(&config.knowledge_base)?,
        model: Arc::new(HttpLanguageModel::new(
            build_client(config.llm.timeout()).map_err(BootstrapError::HttpClient)?,
            &config.llm,
        )),
        audit: Arc::new(TracingAuditSink),
    };
    info!(
        event_name = "system.bootstrap.upstreams_resolved",
        correlation_id = "bootstrap",
        directory = config.directory.is_configured(),
        appointments = config.appointments.is_configured(),
        knowledge_base = config.knowledge_base.is_configured(),
        "upstream collaborators resolved"
    );

    let orchestrator = Arc::new(Orchestrator::from_config(&config, collaborators));
    Ok(Application { config, db_pool, orchestrator })
}

fn configured_base(config: &UpstreamConfig) -> Option<&str> {
    config.base_url.as_deref().map(str::trim).filter(|url| !url.is_empty())
}

fn directory(config: &UpstreamConfig) -> Result<Arc<dyn PatientDirectory>, BootstrapError> {
    Ok(match configured_base(config) {
        Some(base_url) => Arc::new(HttpPatientDirectory::new(
            build_client(config.timeout()).map_err(BootstrapError::HttpClient)?,
            config,
            base_url,
        )),
        None => Arc::new(UnconfiguredDirectory),
    })
}

fn appointments(config: &UpstreamConfig) -> Result<Arc<dyn AppointmentBook>, BootstrapError> {
    Ok(match configured_base(config) {
        Some(base_url) => Arc::new(HttpAppointmentBook::new(
            build_client(config.timeout()).map_err(BootstrapError::HttpClient)?,
            config,
            base_url,
        )),
        None => Arc::new(LocalAppointmentBook),
    })
}

fn knowledge_base(config: &UpstreamConfig) -> Result<Arc<dyn KnowledgeBase>, BootstrapError> {
    Ok(match configured_base(config) {
        Some(base_url) => Arc::new(HttpKnowledgeBase::new(
            build_client(config.timeout()).map_err(BootstrapError::HttpClient)?,
            config,
            base_url,
        )),
        None => Arc::new(UnconfiguredKnowledgeBase),
    })
}
