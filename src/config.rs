use crate::error::GatewayError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub imap: ImapConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream delivery API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// OAuth2 client id (client-credentials grant)
    #[serde(default)]
    pub client_id: String,
    /// OAuth2 client secret
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// e-Doręczenia address of the mailbox this gateway serves (AE:PL-...)
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Number of messages requested per SELECT
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: default_token_url(),
            base_url: default_base_url(),
            address: String::new(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_token_url() -> String {
    "https://edoreczenia-api.gov.pl/oauth/token".to_string()
}

fn default_base_url() -> String {
    "https://edoreczenia-api.gov.pl/ua/v5".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    50
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

/// IMAP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    /// Serve RFC822/BODY[] as multipart/mixed including attachment contents
    #[serde(default)]
    pub fetch_attachments: bool,
    /// Mark expunged messages DELETED upstream instead of dropping them locally only
    #[serde(default)]
    pub expunge_upstream: bool,
    /// Upper bound for one command including its literals
    #[serde(default = "default_max_command_size")]
    pub max_command_size: usize,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_imap_port(),
            fetch_attachments: false,
            expunge_upstream: false,
            max_command_size: default_max_command_size(),
        }
    }
}

fn default_imap_port() -> u16 {
    1143
}

fn default_max_command_size() -> usize {
    1024 * 1024
}

/// SMTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Name announced in the greeting and EHLO reply
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_smtp_port(),
            hostname: default_hostname(),
            max_message_size: default_max_message_size(),
        }
    }
}

fn default_smtp_port() -> u16 {
    1025
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_max_message_size() -> usize {
    25 * 1024 * 1024
}

/// Local credential shared by the IMAP and SMTP listeners
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_username")]
    pub username: String,
    /// Plain password (e.g. from LOCAL_AUTH_PASSWORD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Argon2id hash; takes precedence over `password`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: None,
            password_hash: None,
        }
    }
}

fn default_username() -> String {
    "edoreczenia".to_string()
}

impl AuthConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
            password_hash: None,
        }
    }

    /// Verify a username/password pair against the configured credential
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok = username == self.username;
        let password_ok = match (&self.password_hash, &self.password) {
            (Some(hash), _) => verify_password(password, hash),
            (None, Some(expected)) => password == expected,
            (None, None) => false,
        };
        user_ok && password_ok
    }

    pub fn is_configured(&self) -> bool {
        self.password_hash.is_some() || self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2id hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

impl GatewayConfig {
    /// Load configuration from a TOML file, falling back to defaults when it is absent.
    /// Environment variables override file values.
    pub async fn load(path: &Path) -> Result<Self, GatewayError> {
        let mut config = if fs::try_exists(path).await? {
            let content = fs::read_to_string(path).await?;
            Self::from_toml(&content)?
        } else {
            GatewayConfig::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, GatewayError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment overrides; `lookup` is `std::env::var` outside of tests
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Upstream API
        if let Some(v) = lookup("EDORECZENIA_CLIENT_ID") {
            self.api.client_id = v;
        }
        if let Some(v) = lookup("EDORECZENIA_CLIENT_SECRET") {
            self.api.client_secret = v;
        }
        if let Some(v) = lookup("EDORECZENIA_TOKEN_URL") {
            self.api.token_url = v;
        }
        if let Some(v) = lookup("EDORECZENIA_API_BASE_URL") {
            self.api.base_url = v;
        }
        if let Some(v) = lookup("EDORECZENIA_ADDRESS") {
            self.api.address = v;
        }

        // Listeners
        if let Some(v) = lookup("IMAP_HOST") {
            self.imap.host = v;
        }
        if let Some(port) = lookup("IMAP_PORT").and_then(|v| v.parse().ok()) {
            self.imap.port = port;
        }
        if let Some(v) = lookup("SMTP_HOST") {
            self.smtp.host = v;
        }
        if let Some(port) = lookup("SMTP_PORT").and_then(|v| v.parse().ok()) {
            self.smtp.port = port;
        }

        // Local credentials
        if let Some(v) = lookup("LOCAL_AUTH_USERNAME") {
            self.auth.username = v;
        }
        if let Some(v) = lookup("LOCAL_AUTH_PASSWORD") {
            self.auth.password = Some(v);
        }

        // Logging
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    /// Check that everything needed to start is present
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.api.client_id.is_empty() || self.api.client_secret.is_empty() {
            return Err(GatewayError::Config(
                "api.client_id and api.client_secret are required".to_string(),
            ));
        }
        if self.api.address.is_empty() {
            return Err(GatewayError::Config("api.address is required".to_string()));
        }
        if !self.auth.is_configured() {
            return Err(GatewayError::Config(
                "auth.password or auth.password_hash is required".to_string(),
            ));
        }
        if self.api.timeout_secs == 0 {
            return Err(GatewayError::Config("api.timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn sample() -> String {
        let sample = GatewayConfig {
            api: ApiConfig {
                client_id: "your-client-id".to_string(),
                client_secret: "your-client-secret".to_string(),
                address: "AE:PL-12345-67890-ABCDE-12".to_string(),
                ..ApiConfig::default()
            },
            auth: AuthConfig {
                username: default_username(),
                password: None,
                password_hash: Some("$argon2id$v=19$m=19456,t=2,p=1$EXAMPLE$HASH".to_string()),
            },
            ..GatewayConfig::default()
        };
        toml::to_string_pretty(&sample).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::from_toml("").unwrap();
        assert_eq!(config.imap.port, 1143);
        assert_eq!(config.imap.max_command_size, 1024 * 1024);
        assert_eq!(config.smtp.port, 1025);
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.auth.username, "edoreczenia");
        assert_eq!(config.logging.level, "info");
        assert!(!config.imap.fetch_attachments);
    }

    #[test]
    fn test_parse_sections() {
        let config = GatewayConfig::from_toml(
            r#"
            [api]
            client_id = "id"
            client_secret = "secret"
            address = "AE:PL-12345-67890-ABCDE-12"

            [imap]
            port = 9143

            [auth]
            password = "pw"
            "#,
        )
        .unwrap();
        assert_eq!(config.api.client_id, "id");
        assert_eq!(config.imap.port, 9143);
        assert_eq!(config.imap.host, "0.0.0.0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("EDORECZENIA_CLIENT_ID", "env-id"),
            ("IMAP_PORT", "2143"),
            ("SMTP_PORT", "not-a-number"),
            ("LOCAL_AUTH_PASSWORD", "env-pw"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.api.client_id, "env-id");
        assert_eq!(config.imap.port, 2143);
        assert_eq!(config.smtp.port, 1025);
        assert!(config.auth.verify("edoreczenia", "env-pw"));
    }

    #[test]
    fn test_validate_requires_credentials() {
        let config = GatewayConfig::default();
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_verify_plain_password() {
        let auth = AuthConfig::new("user", "secret");
        assert!(auth.verify("user", "secret"));
        assert!(!auth.verify("user", "wrong"));
        assert!(!auth.verify("other", "secret"));
    }

    #[test]
    fn test_verify_hashed_password() {
        let hash = hash_password("secret").unwrap();
        let auth = AuthConfig {
            username: "user".to_string(),
            password: Some("ignored".to_string()),
            password_hash: Some(hash),
        };
        assert!(auth.verify("user", "secret"));
        assert!(!auth.verify("user", "ignored"));
    }

    #[test]
    fn test_sample_roundtrips() {
        let sample = GatewayConfig::sample();
        let parsed = GatewayConfig::from_toml(&sample).unwrap();
        assert_eq!(parsed.api.client_id, "your-client-id");
    }

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[smtp]\nhostname = \"gw.example\"\n")
            .await
            .unwrap();

        let config = GatewayConfig::load(&path).await.unwrap();
        assert_eq!(config.smtp.hostname, "gw.example");
    }
}
