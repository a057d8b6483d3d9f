use config::{Config as ConfigLoader, ConfigError, Environment, File};
use liveline_client::{ClientConfig, WILDCARD};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Topics to print; empty means every application event
    pub topics: Vec<String>,
    /// Also print connection status changes
    pub status: bool,
    /// Keep the `connection_state` field attached to each payload
    pub include_state: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            status: true,
            include_state: false,
        }
    }
}

impl OutputConfig {
    pub fn subscriptions(&self) -> Vec<String> {
        if self.topics.is_empty() {
            vec![WILDCARD.to_string()]
        } else {
            self.topics.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{LIVELINE_ENV}.toml (if LIVELINE_ENV is set)
    /// 3. Environment variables such as `LIVELINE_CLIENT__BASE_URL`
    ///
    /// The auth token is read from `LIVELINE_AUTH_TOKEN` only.
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("LIVELINE_ENV").unwrap_or_else(|_| "dev".to_string());

        let builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("LIVELINE")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("client.event_types")
                    .with_list_parse_key("output.topics")
                    .try_parsing(true),
            );

        let mut cfg: Config = builder.build()?.try_deserialize()?;

        if let Ok(token) = std::env::var("LIVELINE_AUTH_TOKEN") {
            if !token.is_empty() {
                cfg.client.auth_token = Some(token);
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigLoader::builder().add_source(File::from(path.as_ref()));

        let cfg: Config = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.client
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))
    }
}
