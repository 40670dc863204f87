use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use taller_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

fn field(key: &'static str, env_key: &'static str, value: impl ToString) -> Field {
    Field { key, env_key, value: value.to_string() }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            Some(field.env_key),
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let password = match &config.mail.password {
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>",
        Some(_) => "<redacted>",
        None => "<unset>",
    };

    vec![
        field("database.url", "TALLER_DATABASE_URL", &config.database.url),
        field("database.max_connections", "TALLER_DATABASE_MAX_CONNECTIONS", config.database.max_connections),
        field("database.timeout_secs", "TALLER_DATABASE_TIMEOUT_SECS", config.database.timeout_secs),
        field("server.bind_address", "TALLER_SERVER_BIND_ADDRESS", &config.server.bind_address),
        field("server.port", "TALLER_SERVER_PORT", config.server.port),
        field(
            "server.graceful_shutdown_secs",
            "TALLER_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs,
        ),
        field("server.public_base_url", "TALLER_SERVER_PUBLIC_BASE_URL", &config.server.public_base_url),
        field("mail.enabled", "TALLER_MAIL_ENABLED", config.mail.enabled),
        field("mail.smtp_host", "TALLER_MAIL_SMTP_HOST", &config.mail.smtp_host),
        field("mail.smtp_port", "TALLER_MAIL_SMTP_PORT", config.mail.smtp_port),
        field(
            "mail.username",
            "TALLER_MAIL_USERNAME",
            config.mail.username.as_deref().unwrap_or("<unset>"),
        ),
        field("mail.password", "TALLER_MAIL_PASSWORD", password),
        field("mail.from_email", "TALLER_MAIL_FROM_EMAIL", &config.mail.from_email),
        field("mail.from_name", "TALLER_MAIL_FROM_NAME", &config.mail.from_name),
        field(
            "notifications.channel_capacity",
            "TALLER_NOTIFICATIONS_CHANNEL_CAPACITY",
            config.notifications.channel_capacity,
        ),
        field(
            "notifications.relay_url",
            "TALLER_NOTIFICATIONS_RELAY_URL",
            config.notifications.relay_url.as_deref().unwrap_or("<unset>"),
        ),
        field(
            "tokens.purge_interval_secs",
            "TALLER_TOKENS_PURGE_INTERVAL_SECS",
            config.tokens.purge_interval_secs,
        ),
        field(
            "receipts.template_dir",
            "TALLER_RECEIPTS_TEMPLATE_DIR",
            config.receipts.template_dir.display(),
        ),
        field("receipts.pdf_enabled", "TALLER_RECEIPTS_PDF_ENABLED", config.receipts.pdf_enabled),
        field("logging.level", "TALLER_LOGGING_LEVEL", &config.logging.level),
        field("logging.format", "TALLER_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("taller.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/taller.toml");
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
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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
