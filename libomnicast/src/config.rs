//! Configuration management for Omnicast
//!
//! The configuration is read once at startup, optionally patched with secrets
//! from the environment by the binaries, and then shared read-only as
//! `Arc<Config>`. Nothing below the binaries reads the environment.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

pub const DEFAULT_QUEUE_URL: &str = "https://qstash.upstash.io";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub platforms: PlatformsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Externally reachable base URL of this server
    pub public_url: String,
    /// Page the OAuth callback redirects back to
    pub accounts_page: String,
    /// Header carrying the owner id set by the authenticating gateway
    pub owner_header: String,
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            public_url: "http://127.0.0.1:8080".to_string(),
            accounts_page: "http://127.0.0.1:3000/accounts".to_string(),
            owner_header: "x-owner-id".to_string(),
            secure_cookies: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct VaultConfig {
    /// Base64 encoded 32-byte AES key
    #[serde(default, deserialize_with = "optional_secret")]
    pub key: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub http_timeout_secs: u64,
    pub twitter: Option<OAuthClientConfig>,
    pub linkedin: Option<OAuthClientConfig>,
    pub meta: Option<OAuthClientConfig>,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            twitter: None,
            linkedin: None,
            meta: None,
        }
    }
}

/// OAuth client registration for one provider
///
/// Endpoint fields are optional; each provider falls back to the public
/// production endpoints when they are absent.
#[derive(Debug, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    #[serde(deserialize_with = "secret")]
    pub client_secret: SecretString,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub api_base: Option<String>,
    /// Media upload host (Twitter)
    pub upload_base: Option<String>,
    /// Graph API version (Meta)
    pub graph_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub queue_url: String,
    #[serde(deserialize_with = "optional_secret")]
    pub queue_token: Option<SecretString>,
    /// Public URL of the scheduler webhook the queue calls back
    pub webhook_url: Option<String>,
    #[serde(deserialize_with = "optional_secret")]
    pub current_signing_key: Option<SecretString>,
    #[serde(deserialize_with = "optional_secret")]
    pub next_signing_key: Option<SecretString>,
    pub max_attempts: u32,
    pub sweep_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_url: DEFAULT_QUEUE_URL.to_string(),
            queue_token: None,
            webhook_url: None,
            current_signing_key: None,
            next_signing_key: None,
            max_attempts: 3,
            sweep_interval_secs: 60,
        }
    }
}

fn secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn optional_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|value| !value.is_empty())
        .map(SecretString::from))
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/omnicast/omnicast.db".to_string(),
            },
            server: ServerConfig::default(),
            vault: VaultConfig::default(),
            platforms: PlatformsConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Overlay secrets supplied through the environment
    ///
    /// Only called by the binaries at startup.
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = env_secret("OMNICAST_VAULT_KEY") {
            self.vault.key = Some(key);
        }
        if let Some(token) = env_secret("OMNICAST_QUEUE_TOKEN") {
            self.scheduler.queue_token = Some(token);
        }
        if let Some(key) = env_secret("OMNICAST_SIGNING_KEY_CURRENT") {
            self.scheduler.current_signing_key = Some(key);
        }
        if let Some(key) = env_secret("OMNICAST_SIGNING_KEY_NEXT") {
            self.scheduler.next_signing_key = Some(key);
        }
    }

    /// Check the fields every binary needs
    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::MissingField("database.path".to_string()).into());
        }
        if self.vault.key.is_none() {
            return Err(ConfigError::MissingField("vault.key".to_string()).into());
        }
        if self.scheduler.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Database path with `~` expanded
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }
}

fn env_secret(name: &str) -> Option<SecretString> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("OMNICAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("omnicast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;

    const FULL_CONFIG: &str = r#"
[database]
path = "/tmp/omnicast-test.db"

[server]
bind = "0.0.0.0:9000"
public_url = "https://omnicast.example.com"
accounts_page = "https://app.example.com/accounts"

[vault]
key = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="

[platforms.twitter]
client_id = "tw-client"
client_secret = "tw-secret"
redirect_uri = "https://omnicast.example.com/api/oauth/twitter"
scopes = ["tweet.read", "tweet.write", "users.read", "offline.access"]

[scheduler]
webhook_url = "https://omnicast.example.com/api/webhooks/scheduler"
current_signing_key = "sig-current"
next_signing_key = "sig-next"
max_attempts = 5
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(FULL_CONFIG).unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.owner_header, "x-owner-id");
        assert!(config.server.secure_cookies);

        let twitter = config.platforms.twitter.as_ref().unwrap();
        assert_eq!(twitter.client_id, "tw-client");
        assert_eq!(twitter.client_secret.expose_secret(), "tw-secret");
        assert_eq!(twitter.scopes.len(), 4);
        assert!(config.platforms.linkedin.is_none());
        assert_eq!(config.platforms.http_timeout_secs, 30);

        assert_eq!(config.scheduler.max_attempts, 5);
        assert_eq!(config.scheduler.sweep_interval_secs, 60);
        assert_eq!(config.scheduler.queue_url, DEFAULT_QUEUE_URL);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_toml_str("[database]\npath = \"x.db\"\n").unwrap();

        assert!(config.vault.key.is_none());
        assert!(config.scheduler.current_signing_key.is_none());
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.server.accounts_page, "http://127.0.0.1:3000/accounts");
    }

    #[test]
    fn test_validate_requires_vault_key() {
        let config = Config::from_toml_str("[database]\npath = \"x.db\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vault.key"));
    }

    #[test]
    fn test_empty_secret_is_absent() {
        let config =
            Config::from_toml_str("[database]\npath = \"x.db\"\n[vault]\nkey = \"\"\n").unwrap();
        assert!(config.vault.key.is_none());
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let err = Config::from_toml_str("[database\npath = ").unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let config = Config::from_toml_str(FULL_CONFIG).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("tw-secret"));
        assert!(!rendered.contains("sig-current"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_replace_secrets() {
        std::env::set_var("OMNICAST_VAULT_KEY", "ZnJvbS1lbnY=");
        std::env::set_var("OMNICAST_SIGNING_KEY_NEXT", "next-from-env");

        let mut config = Config::from_toml_str(FULL_CONFIG).unwrap();
        config.apply_env_overrides();

        std::env::remove_var("OMNICAST_VAULT_KEY");
        std::env::remove_var("OMNICAST_SIGNING_KEY_NEXT");

        assert_eq!(
            config.vault.key.as_ref().unwrap().expose_secret(),
            "ZnJvbS1lbnY="
        );
        assert_eq!(
            config.scheduler.next_signing_key.as_ref().unwrap().expose_secret(),
            "next-from-env"
        );
        assert_eq!(
            config.scheduler.current_signing_key.as_ref().unwrap().expose_secret(),
            "sig-current"
        );
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_from_env() {
        std::env::set_var("OMNICAST_CONFIG", "/etc/omnicast/config.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("OMNICAST_CONFIG");

        assert_eq!(path, PathBuf::from("/etc/omnicast/config.toml"));
    }
}
