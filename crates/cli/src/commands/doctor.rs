use chrono::Utc;
use noor_core::config::{AppConfig, LoadOptions, UpstreamConfig};
use noor_db::{connect_with_settings, migrations, ping};
use serde::Serialize;

use crate::commands::{
    current_thread_runtime, CommandResult, EXIT_CONFIG, EXIT_DB_CONNECT, EXIT_MIGRATION,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    fn failed(&self, name: &str) -> bool {
        self.checks.iter().any(|check| check.name == name && check.status == CheckStatus::Fail)
    }

    fn exit_code(&self) -> u8 {
        if self.failed("config_validation") {
            EXIT_CONFIG
        } else if self.failed("database_connectivity") {
            EXIT_DB_CONNECT
        } else if self.failed("session_store_schema") {
            EXIT_MIGRATION
        } else {
            0
        }
    }
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = report.exit_code();

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_timezone(&config));
            checks.push(check_upstreams(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in [
                "resolver_timezone",
                "upstream_configuration",
                "database_connectivity",
                "session_store_schema",
            ] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_timezone(config: &AppConfig) -> DoctorCheck {
    let timezone = config.conversation.timezone;
    let local_now = Utc::now().with_timezone(&timezone);
    DoctorCheck {
        name: "resolver_timezone",
        status: CheckStatus::Pass,
        details: format!(
            "dates resolve in {} (local now {})",
            timezone.name(),
            local_now.format("%Y-%m-%d %H:%M %:z")
        ),
    }
}

/// Unconfigured upstreams are a valid setup, so this check only reports.
fn check_upstreams(config: &AppConfig) -> DoctorCheck {
    let describe = |name: &str, upstream: &UpstreamConfig, fallback: &str| {
        if upstream.is_configured() {
            format!("{name}: http ({}s timeout)", upstream.timeout_secs)
        } else {
            format!("{name}: {fallback}")
        }
    };
    let lines = [
        describe("directory", &config.directory, "unconfigured, every sender asked for an ID"),
        describe("appointments", &config.appointments, "recorded locally"),
        describe("knowledge_base", &config.knowledge_base, "unconfigured, questions get a retry reply"),
        format!("llm: {:?} model `{}`", config.llm.provider, config.llm.model),
    ];
    DoctorCheck { name: "upstream_configuration", status: CheckStatus::Pass, details: lines.join("; ") }
}

fn check_database(config: &AppConfig) -> [DoctorCheck; 2] {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return [
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped_schema_check(),
            ];
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;
        let checked = async {
            ping(&pool).await?;
            migrations::session_store_ready(&pool).await
        }
        .await
        .map_err(|error| format!("database query failed: {error}"));
        pool.close().await;
        checked
    });

    match result {
        Ok(ready) => [
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            if ready {
                DoctorCheck {
                    name: "session_store_schema",
                    status: CheckStatus::Pass,
                    details: "conversation_session table present".to_string(),
                }
            } else {
                DoctorCheck {
                    name: "session_store_schema",
                    status: CheckStatus::Fail,
                    details: "conversation_session table missing; run `noor migrate`".to_string(),
                }
            },
        ],
        Err(error) => [
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error },
            skipped_schema_check(),
        ],
    }
}

fn skipped_schema_check() -> DoctorCheck {
    DoctorCheck {
        name: "session_store_schema",
        status: CheckStatus::Skipped,
        details: "skipped because the database is unreachable".to_string(),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
