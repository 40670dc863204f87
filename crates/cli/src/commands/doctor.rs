use std::path::Path;

use serde::Serialize;
use taller_core::config::{AppConfig, LoadOptions};
use taller_db::migrations;

use crate::commands::{open_pool, runtime, StepError};

const RECEIPT_TEMPLATE: &str = "receipts/service_receipt.html.tera";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Warn,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name, status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.extend(check_database(&config));
            checks.push(check_mail(&config));
            checks.push(check_receipt_templates(&config.receipts.template_dir));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            for name in ["database_connectivity", "schema_migrations", "mail", "receipt_templates"] {
                checks.push(DoctorCheck::new(
                    name,
                    CheckStatus::Skipped,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let healthy = checks.iter().all(|check| matches!(check.status, CheckStatus::Pass | CheckStatus::Warn));
    let overall_status = if healthy { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if healthy {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Connectivity, then whether every embedded migration has been applied.
fn check_database(config: &AppConfig) -> [DoctorCheck; 2] {
    let outcome = runtime().and_then(|runtime| {
        runtime.block_on(async {
            let pool = open_pool(config).await?;
            let pending = migrations::pending_count(&pool).await;
            pool.close().await;
            Ok::<_, StepError>(pending)
        })
    });

    match outcome {
        Ok(Ok(0)) => [
            connected(config),
            DoctorCheck::new("schema_migrations", CheckStatus::Pass, "all migrations applied"),
        ],
        Ok(Ok(pending)) => [
            connected(config),
            DoctorCheck::new(
                "schema_migrations",
                CheckStatus::Fail,
                format!("{pending} pending migrations, run `taller migrate`"),
            ),
        ],
        Ok(Err(error)) => [
            connected(config),
            DoctorCheck::new(
                "schema_migrations",
                CheckStatus::Fail,
                format!("could not read migration history: {error}"),
            ),
        ],
        Err((_, message, _)) => [
            DoctorCheck::new(
                "database_connectivity",
                CheckStatus::Fail,
                format!("failed to connect to database: {message}"),
            ),
            DoctorCheck::new(
                "schema_migrations",
                CheckStatus::Skipped,
                "skipped because the database is unreachable",
            ),
        ],
    }
}

fn connected(config: &AppConfig) -> DoctorCheck {
    DoctorCheck::new(
        "database_connectivity",
        CheckStatus::Pass,
        format!("connected using `{}`", config.database.url),
    )
}

fn check_mail(config: &AppConfig) -> DoctorCheck {
    if config.mail.enabled {
        DoctorCheck::new(
            "mail",
            CheckStatus::Pass,
            format!("smtp via {}:{} as {}", config.mail.smtp_host, config.mail.smtp_port, config.mail.from_email),
        )
    } else {
        DoctorCheck::new("mail", CheckStatus::Warn, "mail.enabled is false, quote emails are only logged")
    }
}

fn check_receipt_templates(template_dir: &Path) -> DoctorCheck {
    let path = template_dir.join(RECEIPT_TEMPLATE);
    if path.is_file() {
        DoctorCheck::new("receipt_templates", CheckStatus::Pass, format!("found `{}`", path.display()))
    } else {
        DoctorCheck::new(
            "receipt_templates",
            CheckStatus::Warn,
            format!("`{}` not found, the server uses its embedded template", path.display()),
        )
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Warn => "warn",
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
