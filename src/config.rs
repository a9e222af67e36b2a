use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "EDITALBOT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_authorization_url")]
    pub authorization_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_user_info_url")]
    pub user_info_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_authorization_url() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_user_info_url() -> String {
    "https://www.googleapis.com/oauth2/v2/userinfo".to_string()
}

fn default_scopes() -> Vec<String> {
    vec![
        "openid".to_string(),
        "email".to_string(),
        "profile".to_string(),
    ]
}

fn default_allowed_domains() -> Vec<String> {
    vec![
        "edu.unirio.br".to_string(),
        "uniriotec.br".to_string(),
        "unirio.br".to_string(),
    ]
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding one file per outstanding login attempt.
    /// Falls back to the OS temporary directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_state_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_state_ttl_seconds() -> u64 {
    900 // 15 minutes
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_seconds: default_state_ttl_seconds(),
        }
    }
}

impl StateConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_cookie_secure")]
    pub cookie_secure: bool,
    #[serde(default = "default_session_ttl_seconds")]
    pub ttl_seconds: u64,
}

fn default_cookie_name() -> String {
    "editalbot_session".to_string()
}

fn default_cookie_secure() -> bool {
    true
}

fn default_session_ttl_seconds() -> u64 {
    8 * 3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            cookie_secure: default_cookie_secure(),
            ttl_seconds: default_session_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    /// Users with these emails get the admin flag on their session
    #[serde(default)]
    pub emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_request")]
    pub log_request: bool,
}

impl AdminConfig {
    pub fn is_admin(&self, email: &str) -> bool {
        self.emails
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(email))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_request() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_request: default_log_request(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8502,
            },
            oauth: OAuthConfig {
                client_id: String::new(),
                client_secret: String::new(),
                redirect_uri: "http://localhost:8502/auth/callback".to_string(),
                authorization_url: default_authorization_url(),
                token_url: default_token_url(),
                user_info_url: default_user_info_url(),
                scopes: default_scopes(),
                allowed_domains: default_allowed_domains(),
                request_timeout_secs: default_request_timeout_secs(),
            },
            state: StateConfig::default(),
            session: SessionConfig::default(),
            database: DatabaseConfig {
                url: "sqlite://editalbot.db".to_string(),
            },
            admin: AdminConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder =
            ConfigBuilder::builder().add_source(config::Config::try_from(&Config::default())?);

        if Path::new("config.yaml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("oauth.scopes")
                .with_list_parse_key("oauth.allowed_domains")
                .with_list_parse_key("admin.emails")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder =
            ConfigBuilder::builder().add_source(config::Config::try_from(&Config::default())?);

        if path.as_ref().exists() {
            builder = builder.add_source(File::from(path.as_ref()));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("oauth.scopes")
                .with_list_parse_key("oauth.allowed_domains")
                .with_list_parse_key("admin.emails")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Checks the settings the login flow cannot run without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oauth.client_id.trim().is_empty() || self.oauth.client_secret.trim().is_empty() {
            return Err(ConfigError::Message(format!(
                "Google OAuth credentials missing: set {ENV_PREFIX}_OAUTH__CLIENT_ID and {ENV_PREFIX}_OAUTH__CLIENT_SECRET"
            )));
        }
        if self.oauth.allowed_domains.is_empty() {
            return Err(ConfigError::Message(
                "oauth.allowed_domains must list at least one domain".to_string(),
            ));
        }
        Ok(())
    }
}
