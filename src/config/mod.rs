use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign session tokens. Generated at startup when absent,
    /// so sessions do not survive a restart until one is pinned in the config
    /// file. Rotating it logs every user out at once.
    #[serde(default = "default_session_secret")]
    pub session_secret: String,
    /// Session lifetime in days.
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    /// Verification code lifetime in minutes.
    #[serde(default = "default_code_ttl_minutes")]
    pub code_ttl_minutes: i64,
    /// Minimum password length accepted on first verification.
    #[serde(default = "default_min_password_len")]
    pub min_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: default_session_secret(),
            session_ttl_days: default_session_ttl_days(),
            code_ttl_minutes: default_code_ttl_minutes(),
            min_password_len: default_min_password_len(),
        }
    }
}

fn default_session_secret() -> String {
    // Generate a random secret if not provided
    uuid::Uuid::new_v4().to_string()
}

fn default_session_ttl_days() -> i64 {
    7
}

fn default_code_ttl_minutes() -> i64 {
    5
}

fn default_min_password_len() -> usize {
    8
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Console,
    Sms,
    Email,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_mode")]
    pub mode: DeliveryMode,
    /// When true, a failed or timed-out code delivery does not fail the
    /// request-code call; in console mode the code stays readable from the
    /// server log. Demo/dev policy — set to false in production.
    #[serde(default = "default_fail_open")]
    pub fail_open: bool,
    /// Ceiling on how long a request-code call waits for the dispatcher,
    /// in seconds.
    #[serde(default = "default_dispatch_timeout")]
    pub dispatch_timeout: u64,
    /// Sender ID stamped on outgoing SMS, and display name on emails.
    #[serde(default = "default_sender_id")]
    pub sender_id: String,
    #[serde(default)]
    pub sms: Option<SmsGatewayConfig>,
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: default_delivery_mode(),
            fail_open: default_fail_open(),
            dispatch_timeout: default_dispatch_timeout(),
            sender_id: default_sender_id(),
            sms: None,
            email: None,
        }
    }
}

fn default_delivery_mode() -> DeliveryMode {
    DeliveryMode::Console
}

fn default_fail_open() -> bool {
    true
}

fn default_dispatch_timeout() -> u64 {
    5
}

fn default_sender_id() -> String {
    "Whisper".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsGatewayConfig {
    /// Messaging endpoint, e.g. https://api.africastalking.com/version1/messaging
    pub endpoint: String,
    pub username: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: String,
}

fn default_smtp_port() -> u16 {
    587
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            delivery: DeliveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.auth.session_ttl_days, 7);
        assert_eq!(config.auth.code_ttl_minutes, 5);
        assert_eq!(config.delivery.mode, DeliveryMode::Console);
        assert!(config.delivery.fail_open);
        assert!(!config.auth.session_secret.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [delivery]
            mode = "sms"
            fail_open = false

            [delivery.sms]
            endpoint = "https://api.africastalking.com/version1/messaging"
            username = "sandbox"
            api_key = "key"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.delivery.mode, DeliveryMode::Sms);
        assert!(!config.delivery.fail_open);
        assert_eq!(config.delivery.sms.unwrap().username, "sandbox");
        // Untouched sections fall back to defaults
        assert_eq!(config.auth.session_ttl_days, 7);
    }
}
