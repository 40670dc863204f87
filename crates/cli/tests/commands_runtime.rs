use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use taller_cli::commands::{doctor, migrate, purge};

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("TALLER_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("TALLER_DATABASE_URL", "postgres://localhost/taller")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn purge_tokens_reports_counts_after_migrate() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("taller.db").display());

    with_env(&[("TALLER_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0, "expected migrate to prepare the schema");

        let result = purge::run();
        assert_eq!(result.exit_code, 0, "expected successful purge");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "purge-tokens");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["tokens"], 0);
    });
}

#[test]
fn purge_tokens_fails_without_schema() {
    with_env(&[("TALLER_DATABASE_URL", "sqlite::memory:")], || {
        let result = purge::run();
        assert_eq!(result.exit_code, 6, "expected purge failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "purge");
    });
}

#[test]
fn doctor_flags_pending_migrations() {
    with_env(&[("TALLER_DATABASE_URL", "sqlite::memory:")], || {
        let payload = parse_payload(&doctor::run(true));

        assert_eq!(payload["overall_status"], "fail");
        let schema = check(&payload, "schema_migrations");
        assert_eq!(schema["status"], "fail");
        assert_eq!(check(&payload, "database_connectivity")["status"], "pass");
        assert_eq!(check(&payload, "mail")["status"], "warn");
    });
}

#[test]
fn doctor_passes_on_a_migrated_database() {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("taller.db").display());

    with_env(&[("TALLER_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);

        let payload = parse_payload(&doctor::run(true));

        assert_eq!(payload["overall_status"], "pass");
        assert_eq!(check(&payload, "schema_migrations")["status"], "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("TALLER_SERVER_PUBLIC_BASE_URL", "taller.example.com")], || {
        let output = doctor::run(false);

        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation"));
        assert!(output.contains("- [skip] schema_migrations"));
    });
}

fn check<'a>(payload: &'a Value, name: &str) -> &'a Value {
    payload["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .expect("check should be present")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "TALLER_DATABASE_URL",
        "TALLER_DATABASE_MAX_CONNECTIONS",
        "TALLER_DATABASE_TIMEOUT_SECS",
        "TALLER_SERVER_BIND_ADDRESS",
        "TALLER_SERVER_PORT",
        "TALLER_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "TALLER_SERVER_PUBLIC_BASE_URL",
        "TALLER_MAIL_ENABLED",
        "TALLER_MAIL_USERNAME",
        "TALLER_MAIL_PASSWORD",
        "TALLER_NOTIFICATIONS_CHANNEL_CAPACITY",
        "TALLER_NOTIFICATIONS_RELAY_URL",
        "TALLER_TOKENS_PURGE_INTERVAL_SECS",
        "TALLER_RECEIPTS_TEMPLATE_DIR",
        "TALLER_LOGGING_LEVEL",
        "TALLER_LOGGING_FORMAT",
        "TALLER_LOG_LEVEL",
        "TALLER_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
