//! Client configuration.
//!
//! Loaded from built-in defaults, then an optional TOML file, then
//! `TETHER__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::push::{ReconnectPolicy, StreamEndpoint};

pub const APP_NAME: &str = "tether";
const ENV_PREFIX: &str = "TETHER";
const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub endpoints: EndpointsConfig,
    pub reconnect: ReconnectConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the chat server, without a trailing slash.
    pub base_url: String,
    /// Timeout for REST calls. Event streams are not subject to it.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Endpoint paths. Stream paths contain an `{id}` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub init: String,
    pub message: String,
    pub chat_stream: String,
    pub telemetry_stream: String,
    /// When set, push URLs also carry the credential in this query parameter.
    pub credential_query_param: Option<String>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            init: "/chat/init".to_string(),
            message: "/chat/message".to_string(),
            chat_stream: "/chat/stream/{id}".to_string(),
            telemetry_stream: "/events/process/{id}".to_string(),
            credential_query_param: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before the channel gives up.
    pub max_attempts: u32,
    /// Random extra delay, as a fraction of the computed delay.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `path` (or the default location) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };
        Self::build(
            path.as_deref(),
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
    }

    fn build(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.base_url", ServerConfig::default().base_url)?
            .set_default("logging.level", "warn")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let config: ClientConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server.base_url is empty".to_string()));
        }
        for (name, path) in [
            ("endpoints.chat_stream", &self.endpoints.chat_stream),
            ("endpoints.telemetry_stream", &self.endpoints.telemetry_stream),
        ] {
            if !path.contains(ID_PLACEHOLDER) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must contain {ID_PLACEHOLDER}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::Invalid(
                "reconnect.jitter must be between 0 and 1".to_string(),
            ));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.base_delay_ms exceeds reconnect.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute URL for a REST path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.base_url.trim_end_matches('/'), path)
    }

    pub fn chat_endpoint(&self) -> StreamEndpoint {
        StreamEndpoint::new(self.url(&self.endpoints.chat_stream))
    }

    pub fn telemetry_endpoint(&self) -> StreamEndpoint {
        StreamEndpoint::new(self.url(&self.endpoints.telemetry_stream))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Render as TOML, e.g. for `tether config`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// `$XDG_CONFIG_HOME/tether/config.toml`, falling back to the platform config dir.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::config_dir)?;
    Some(base.join(APP_NAME).join("config.toml"))
}

/// Expand `~` and environment variables in a user-supplied path.
pub fn expand_path(text: &str) -> Result<PathBuf, ConfigError> {
    let expanded = shellexpand::full(text)
        .map_err(|e| ConfigError::Invalid(format!("expanding path {text}: {e}")))?;
    Ok(PathBuf::from(expanded.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(Some(HashMap::new()))
    }

    #[test]
    fn test_defaults_without_file() {
        let config = ClientConfig::build(None, no_env()).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.reconnect.base_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = ClientConfig::build(Some(&path), no_env()).unwrap();
        assert_eq!(config.server.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
base_url = "https://agents.example.com"

[reconnect]
max_attempts = 3
jitter = 0.0
"#
        )
        .unwrap();

        let config = ClientConfig::build(Some(file.path()), no_env()).unwrap();
        assert_eq!(config.server.base_url, "https://agents.example.com");
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.jitter, 0.0);
        assert_eq!(config.endpoints.init, "/chat/init");
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reconnect]\nmax_attempts = 3").unwrap();

        let env = Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
            .source(Some(HashMap::from([(
                "TETHER__RECONNECT__MAX_ATTEMPTS".to_string(),
                "7".to_string(),
            )])));

        let config = ClientConfig::build(Some(file.path()), env).unwrap();
        assert_eq!(config.reconnect.max_attempts, 7);
    }

    #[test]
    fn test_stream_path_without_placeholder_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[endpoints]\nchat_stream = \"/chat/stream\"").unwrap();

        let err = ClientConfig::build(Some(file.path()), no_env()).unwrap_err();
        assert!(err.to_string().contains("endpoints.chat_stream"));
    }

    #[test]
    fn test_out_of_range_jitter_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[reconnect]\njitter = 1.5").unwrap();

        assert!(ClientConfig::build(Some(file.path()), no_env()).is_err());
    }

    #[test]
    fn test_urls_are_joined_and_ids_encoded() {
        let mut config = ClientConfig::default();
        config.server.base_url = "http://host:9000/".to_string();

        assert_eq!(config.url("/chat/init"), "http://host:9000/chat/init");
        assert_eq!(
            config.chat_endpoint().url_for("abc 123"),
            "http://host:9000/chat/stream/abc%20123"
        );
        assert_eq!(
            config.telemetry_endpoint().url_for("p-1"),
            "http://host:9000/events/process/p-1"
        );
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let rendered = ClientConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[reconnect]"));
        let parsed: ClientConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, ClientConfig::default());
    }
}
