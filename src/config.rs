use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_url")]
    pub url: String,
    #[serde(default = "default_allowed_models")]
    pub allowed_models: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            allowed_models: default_allowed_models(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Regular expression API keys must match. An empty string disables the
    /// check; the key is always forwarded verbatim either way.
    #[serde(default = "default_api_key_pattern")]
    pub api_key_pattern: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key_pattern: default_api_key_pattern(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Filesystem path, `:memory:`, or `file:` URI for the embedded store;
    /// `postgres://` URL for the server store.
    #[serde(default = "default_dsn")]
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { dsn: default_dsn() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `debug`, `info`, `warn`, or `error`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_upstream_url() -> String {
    "https://api.openai.com/v1/embeddings".to_string()
}

fn default_allowed_models() -> Vec<String> {
    vec![
        "text-embedding-3-small".to_string(),
        "text-embedding-3-large".to_string(),
        "text-embedding-ada-002".to_string(),
    ]
}

fn default_api_key_pattern() -> String {
    "^sk-[A-Za-z0-9_-]+$".to_string()
}

fn default_dsn() -> String {
    "cachembed.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `CACHEMBED_` takes precedence
    /// over the file value.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Compile the API-key pattern. `None` when the pattern is empty.
    pub fn key_pattern(&self) -> anyhow::Result<Option<Regex>> {
        if self.auth.api_key_pattern.is_empty() {
            return Ok(None);
        }
        let pattern = Regex::new(&self.auth.api_key_pattern).map_err(|e| {
            anyhow::anyhow!("invalid auth.api_key_pattern {:?}: {e}", self.auth.api_key_pattern)
        })?;
        Ok(Some(pattern))
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! env_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                }
            };
        }
        macro_rules! env_parse {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                    }
                }
            };
        }
        macro_rules! env_bool {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                }
            };
        }

        env_str!("CACHEMBED_HOST", self.server.host);
        env_parse!("CACHEMBED_PORT", self.server.port);
        env_str!("CACHEMBED_UPSTREAM_URL", self.upstream.url);
        if let Ok(val) = std::env::var("CACHEMBED_ALLOWED_MODELS") {
            self.upstream.allowed_models = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        env_str!("CACHEMBED_API_KEY_PATTERN", self.auth.api_key_pattern);
        env_str!("CACHEMBED_DSN", self.database.dsn);
        env_str!("CACHEMBED_LOG_LEVEL", self.logging.level);
        env_bool!("CACHEMBED_LOG_JSON", self.logging.json);
    }
}
