//! Bridge configuration.
//!
//! Loaded from TOML (default `<config dir>/restsql/config.toml`), then
//! overridden from `RESTSQL_*` environment variables.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BridgeError, BridgeResult};

/// Main configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub rest: RestConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection settings for a PostgREST backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_schema")]
    pub schema: String,

    /// Path of the REST API below `url`
    #[serde(default = "default_rest_path")]
    pub rest_path: String,

    /// Raw-SQL function exposed under `/rpc`; `None` disables the RPC tier
    pub rpc_function: Option<String>,

    /// Argument name the RPC function takes the SQL text under
    #[serde(default = "default_rpc_argument")]
    pub rpc_argument: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Column reported as `lastID` after an insert
    #[serde(default = "default_key_column")]
    pub key_column: String,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_rest_path() -> String {
    "rest/v1".to_string()
}

fn default_rpc_argument() -> String {
    "query".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_key_column() -> String {
    "id".to_string()
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            schema: default_schema(),
            rest_path: default_rest_path(),
            rpc_function: None,
            rpc_argument: default_rpc_argument(),
            timeout_secs: default_timeout(),
            key_column: default_key_column(),
        }
    }
}

impl RestConfig {
    /// Base URL of the REST API, without a trailing slash.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.url.trim_end_matches('/'),
            self.rest_path.trim_matches('/')
        )
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration builder
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    pub fn from_toml_str(text: &str) -> BridgeResult<Self> {
        toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// `<config dir>/restsql/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("restsql").join("config.toml"))
    }

    /// Load from `RESTSQL_CONFIG` or the default path, falling back to
    /// defaults when no file exists, then apply environment overrides.
    pub fn discover() -> BridgeResult<Self> {
        let path = std::env::var_os("RESTSQL_CONFIG")
            .map(PathBuf::from)
            .or_else(Self::default_path);

        let config = match path {
            Some(p) if p.exists() => {
                tracing::debug!("Loading config from {}", p.display());
                Self::load(&p)?
            }
            _ => Self::default(),
        };
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Apply `RESTSQL_*` overrides from a variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("RESTSQL_URL") {
            self.rest.url = url;
        }
        if let Some(key) = lookup("RESTSQL_API_KEY") {
            self.rest.api_key = key;
        }
        if let Some(schema) = lookup("RESTSQL_SCHEMA") {
            self.rest.schema = schema;
        }
        if let Some(function) = lookup("RESTSQL_RPC_FUNCTION") {
            self.rest.rpc_function = Some(function).filter(|f| !f.is_empty());
        }
        self
    }

    /// Check that a REST backend can be reached with these settings.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.rest.url.is_empty() {
            return Err(BridgeError::Config(
                "rest.url is not set (or RESTSQL_URL)".to_string(),
            ));
        }
        if self.rest.api_key.is_empty() {
            return Err(BridgeError::Config(
                "rest.api_key is not set (or RESTSQL_API_KEY)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for BridgeConfig
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Set the project URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.rest.url = url.into();
        self
    }

    /// Set the API key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.rest.api_key = key.into();
        self
    }

    /// Set the schema
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.rest.schema = schema.into();
        self
    }

    /// Enable the RPC tier through the named function
    pub fn rpc_function(mut self, function: impl Into<String>) -> Self {
        self.config.rest.rpc_function = Some(function.into());
        self
    }

    /// Set the column reported as `lastID`
    pub fn key_column(mut self, column: impl Into<String>) -> Self {
        self.config.rest.key_column = column.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}
