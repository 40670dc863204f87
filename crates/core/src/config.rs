use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub mail: MailConfig,
    pub notifications: NotificationConfig,
    pub tokens: TokenConfig,
    pub receipts: ReceiptConfig,
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
    /// Base of the links mailed to clients, e.g. `https://taller.example.com`.
    pub public_base_url: String,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub channel_capacity: usize,
    pub relay_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TokenConfig {
    pub purge_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ReceiptConfig {
    pub template_dir: PathBuf,
    pub pdf_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub port: Option<u16>,
    pub public_base_url: Option<String>,
    pub mail_enabled: Option<bool>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://taller.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                public_base_url: "http://localhost:8080".to_string(),
            },
            mail: MailConfig {
                enabled: false,
                smtp_host: "localhost".to_string(),
                smtp_port: 587,
                username: None,
                password: None,
                from_email: "taller@localhost".to_string(),
                from_name: "Taller".to_string(),
            },
            notifications: NotificationConfig { channel_capacity: 256, relay_url: None },
            tokens: TokenConfig { purge_interval_secs: 86_400 },
            receipts: ReceiptConfig {
                template_dir: PathBuf::from("templates"),
                pdf_enabled: true,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("taller.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
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
            if let Some(public_base_url) = server.public_base_url {
                self.server.public_base_url = public_base_url;
            }
        }

        if let Some(mail) = patch.mail {
            if let Some(enabled) = mail.enabled {
                self.mail.enabled = enabled;
            }
            if let Some(smtp_host) = mail.smtp_host {
                self.mail.smtp_host = smtp_host;
            }
            if let Some(smtp_port) = mail.smtp_port {
                self.mail.smtp_port = smtp_port;
            }
            if let Some(username) = mail.username {
                self.mail.username = Some(username);
            }
            if let Some(mail_password_value) = mail.password {
                self.mail.password = Some(secret_value(mail_password_value));
            }
            if let Some(from_email) = mail.from_email {
                self.mail.from_email = from_email;
            }
            if let Some(from_name) = mail.from_name {
                self.mail.from_name = from_name;
            }
        }

        if let Some(notifications) = patch.notifications {
            if let Some(channel_capacity) = notifications.channel_capacity {
                self.notifications.channel_capacity = channel_capacity;
            }
            if let Some(relay_url) = notifications.relay_url {
                self.notifications.relay_url = Some(relay_url);
            }
        }

        if let Some(tokens) = patch.tokens {
            if let Some(purge_interval_secs) = tokens.purge_interval_secs {
                self.tokens.purge_interval_secs = purge_interval_secs;
            }
        }

        if let Some(receipts) = patch.receipts {
            if let Some(template_dir) = receipts.template_dir {
                self.receipts.template_dir = template_dir;
            }
            if let Some(pdf_enabled) = receipts.pdf_enabled {
                self.receipts.pdf_enabled = pdf_enabled;
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
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TALLER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TALLER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TALLER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TALLER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TALLER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TALLER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TALLER_SERVER_PORT") {
            self.server.port = parse_u16("TALLER_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TALLER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TALLER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("TALLER_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = value;
        }

        if let Some(value) = read_env("TALLER_MAIL_ENABLED") {
            self.mail.enabled = parse_bool("TALLER_MAIL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("TALLER_MAIL_SMTP_HOST") {
            self.mail.smtp_host = value;
        }
        if let Some(value) = read_env("TALLER_MAIL_SMTP_PORT") {
            self.mail.smtp_port = parse_u16("TALLER_MAIL_SMTP_PORT", &value)?;
        }
        if let Some(value) = read_env("TALLER_MAIL_USERNAME") {
            self.mail.username = Some(value);
        }
        if let Some(value) = read_env("TALLER_MAIL_PASSWORD") {
            self.mail.password = Some(secret_value(value));
        }
        if let Some(value) = read_env("TALLER_MAIL_FROM_EMAIL") {
            self.mail.from_email = value;
        }
        if let Some(value) = read_env("TALLER_MAIL_FROM_NAME") {
            self.mail.from_name = value;
        }

        if let Some(value) = read_env("TALLER_NOTIFICATIONS_CHANNEL_CAPACITY") {
            self.notifications.channel_capacity =
                parse_u64("TALLER_NOTIFICATIONS_CHANNEL_CAPACITY", &value)? as usize;
        }
        if let Some(value) = read_env("TALLER_NOTIFICATIONS_RELAY_URL") {
            self.notifications.relay_url = Some(value);
        }

        if let Some(value) = read_env("TALLER_TOKENS_PURGE_INTERVAL_SECS") {
            self.tokens.purge_interval_secs =
                parse_u64("TALLER_TOKENS_PURGE_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("TALLER_RECEIPTS_TEMPLATE_DIR") {
            self.receipts.template_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("TALLER_RECEIPTS_PDF_ENABLED") {
            self.receipts.pdf_enabled = parse_bool("TALLER_RECEIPTS_PDF_ENABLED", &value)?;
        }

        let log_level = read_env("TALLER_LOGGING_LEVEL").or_else(|| read_env("TALLER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TALLER_LOGGING_FORMAT").or_else(|| read_env("TALLER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(public_base_url) = overrides.public_base_url {
            self.server.public_base_url = public_base_url;
        }
        if let Some(mail_enabled) = overrides.mail_enabled {
            self.mail.enabled = mail_enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_mail(&self.mail)?;
        validate_notifications(&self.notifications)?;
        validate_tokens(&self.tokens)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("taller.toml"), PathBuf::from("config/taller.toml")]
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
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

    if !is_http_url(&server.public_base_url) {
        return Err(ConfigError::Validation(
            "server.public_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_mail(mail: &MailConfig) -> Result<(), ConfigError> {
    if !mail.enabled {
        return Ok(());
    }

    if mail.smtp_host.trim().is_empty() {
        return Err(ConfigError::Validation(
            "mail.smtp_host is required when mail.enabled is true".to_string(),
        ));
    }
    if mail.smtp_port == 0 {
        return Err(ConfigError::Validation(
            "mail.smtp_port must be greater than zero".to_string(),
        ));
    }
    if !mail.from_email.contains('@') {
        return Err(ConfigError::Validation(format!(
            "mail.from_email `{}` is not an email address",
            mail.from_email
        )));
    }

    let has_password =
        mail.password.as_ref().is_some_and(|value| !value.expose_secret().trim().is_empty());
    if mail.username.is_some() != has_password {
        return Err(ConfigError::Validation(
            "mail.username and mail.password must be set together".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifications(notifications: &NotificationConfig) -> Result<(), ConfigError> {
    if notifications.channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "notifications.channel_capacity must be greater than zero".to_string(),
        ));
    }

    if let Some(relay_url) = &notifications.relay_url {
        if !is_http_url(relay_url) {
            return Err(ConfigError::Validation(
                "notifications.relay_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_tokens(tokens: &TokenConfig) -> Result<(), ConfigError> {
    if tokens.purge_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "tokens.purge_interval_secs must be greater than zero".to_string(),
        ));
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    mail: Option<MailPatch>,
    notifications: Option<NotificationPatch>,
    tokens: Option<TokenPatch>,
    receipts: Option<ReceiptPatch>,
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
    public_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MailPatch {
    enabled: Option<bool>,
    smtp_host: Option<String>,
    smtp_port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    from_email: Option<String>,
    from_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    channel_capacity: Option<usize>,
    relay_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenPatch {
    purge_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReceiptPatch {
    template_dir: Option<PathBuf>,
    pdf_enabled: Option<bool>,
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

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

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
    fn defaults_are_valid_without_any_file() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.tokens.purge_interval_secs == 86_400, "purge runs daily by default")?;
        ensure(!config.mail.enabled, "mail is disabled by default")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TALLER_SMTP_PASSWORD", "smtp-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("taller.toml");
            fs::write(
                &path,
                r#"
[mail]
enabled = true
smtp_host = "smtp.example.com"
username = "taller"
password = "${TEST_TALLER_SMTP_PASSWORD}"
from_email = "taller@example.com"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.mail.password.as_ref().map(|value| value.expose_secret().to_string())
                    == Some("smtp-from-env".to_string()),
                "smtp password should be loaded from environment",
            )?;
            ensure(config.mail.smtp_host == "smtp.example.com", "smtp host comes from file")
        })();

        clear_vars(&["TEST_TALLER_SMTP_PASSWORD"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TALLER_LOG_LEVEL", "warn");
        env::set_var("TALLER_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["TALLER_LOG_LEVEL", "TALLER_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TALLER_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("TALLER_SERVER_PUBLIC_BASE_URL", "https://env.example.com");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("taller.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
public_base_url = "https://file.example.com"
port = 9090

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
                config.server.public_base_url == "https://env.example.com",
                "env base url should win over file and defaults",
            )?;
            ensure(config.server.port == 9090, "file port should win over defaults")
        })();

        clear_vars(&["TALLER_DATABASE_URL", "TALLER_SERVER_PUBLIC_BASE_URL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TALLER_MAIL_ENABLED", "true");
        env::set_var("TALLER_MAIL_FROM_EMAIL", "not-an-address");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("mail.from_email")
            );
            ensure(has_message, "validation failure should mention mail.from_email")
        })();

        clear_vars(&["TALLER_MAIL_ENABLED", "TALLER_MAIL_FROM_EMAIL"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TALLER_TOKENS_PURGE_INTERVAL_SECS", "daily");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "TALLER_TOKENS_PURGE_INTERVAL_SECS", "offending key is named")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override".to_string()),
        };

        clear_vars(&["TALLER_TOKENS_PURGE_INTERVAL_SECS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TALLER_MAIL_USERNAME", "taller");
        env::set_var("TALLER_MAIL_PASSWORD", "smtp-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("smtp-secret-value"),
                "debug output should not contain the smtp password",
            )
        })();

        clear_vars(&["TALLER_MAIL_USERNAME", "TALLER_MAIL_PASSWORD"]);
        result
    }
}
