//! Relay configuration
//!
//! Settings are layered: an optional TOML file supplies defaults, the
//! environment overrides the file, and command-line flags override both.
//! The binary resolves env and flags through `clap`; this module owns the
//! file format, the builder, and validation.

use crate::error::ConfigError;
use diragent_core::retry::ExponentialBackoff;
use diragent_transport::websocket::client::agent_url;
use diragent_transport::{WebSocketConnector, WorkerCommand, WorkerConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable holding the control-plane URL
pub const SERVER_ENV: &str = "DIRAGENT_SERVER";

/// Environment variable holding the agent token
pub const AGENT_TOKEN_ENV: &str = "DIRAGENT_AGENT_TOKEN";

/// Validated relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Control-plane base URL
    pub server: String,

    /// Token presented to the control plane
    pub agent_token: SecretString,

    /// How to run the worker
    pub worker: WorkerConfig,

    /// Shortest wait before reconnecting
    pub min_backoff: Duration,

    /// Longest wait before reconnecting
    pub max_backoff: Duration,
}

impl RelayConfig {
    /// Create a builder
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Check every setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::MissingServer);
        }
        if self.agent_token.expose_secret().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        agent_url(&self.server, "")
            .map_err(|err| ConfigError::invalid("server", err.to_string()))?;

        let empty_command = match &self.worker.command {
            WorkerCommand::Shell(line) => line.trim().is_empty(),
            WorkerCommand::Exec { program, .. } => program.is_empty(),
        };
        if empty_command {
            return Err(ConfigError::MissingCommand);
        }

        if self.min_backoff.is_zero() {
            return Err(ConfigError::invalid("min_backoff", "must be positive"));
        }
        if self.max_backoff < self.min_backoff {
            return Err(ConfigError::invalid(
                "max_backoff",
                format!(
                    "{:?} is shorter than min_backoff {:?}",
                    self.max_backoff, self.min_backoff
                ),
            ));
        }
        if self.worker.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::invalid("request_timeout", "must be positive"));
        }
        Ok(())
    }

    /// Reconnect backoff described by this configuration
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::builder()
            .min_delay(self.min_backoff)
            .max_delay(self.max_backoff)
            .build()
    }

    /// Connector for the control plane
    pub fn connector(&self) -> Result<WebSocketConnector, ConfigError> {
        WebSocketConnector::new(&self.server, &self.agent_token)
            .map_err(|err| ConfigError::invalid("server", err.to_string()))
    }
}

/// On-disk configuration file
///
/// ```toml
/// server = "https://control.example.com"
/// agent_token = "..."
/// command = "ldap-worker --config /etc/ldap-worker.toml"
/// request_timeout_secs = 120
///
/// [backoff]
/// min_secs = 1
/// max_secs = 60
///
/// [env]
/// LDAP_URL = "ldaps://dc1.corp.example.com"
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Control-plane base URL
    pub server: Option<String>,

    /// Token presented to the control plane
    pub agent_token: Option<SecretString>,

    /// Worker shell command
    pub command: Option<String>,

    /// Extra worker environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Per-request worker timeout in seconds
    pub request_timeout_secs: Option<u64>,

    /// Seconds a worker gets to exit before it is killed
    pub terminate_grace_secs: Option<u64>,

    /// Reconnect backoff bounds
    #[serde(default)]
    pub backoff: BackoffFileConfig,
}

/// `[backoff]` table of the configuration file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffFileConfig {
    /// Shortest wait in seconds
    pub min_secs: Option<u64>,

    /// Longest wait in seconds
    pub max_secs: Option<u64>,
}

impl FileConfig {
    /// Read and parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Builder for [`RelayConfig`]
///
/// Later calls override earlier ones, so apply the file first and flags last.
#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    server: Option<String>,
    agent_token: Option<SecretString>,
    command: Option<WorkerCommand>,
    env: BTreeMap<String, String>,
    request_timeout: Option<Duration>,
    terminate_grace: Option<Duration>,
    min_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
}

impl RelayConfigBuilder {
    /// Take every value the file sets
    pub fn file(mut self, file: FileConfig) -> Self {
        if file.server.is_some() {
            self.server = file.server;
        }
        if file.agent_token.is_some() {
            self.agent_token = file.agent_token;
        }
        if let Some(command) = file.command {
            self.command = Some(WorkerCommand::Shell(command));
        }
        self.env.extend(file.env);
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = file.terminate_grace_secs {
            self.terminate_grace = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = file.backoff.min_secs {
            self.min_backoff = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = file.backoff.max_secs {
            self.max_backoff = Some(Duration::from_secs(secs));
        }
        self
    }

    /// Set the control-plane URL
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Set the agent token
    pub fn agent_token(mut self, token: SecretString) -> Self {
        self.agent_token = Some(token);
        self
    }

    /// Set the worker command
    pub fn command(mut self, command: WorkerCommand) -> Self {
        self.command = Some(command);
        self
    }

    /// Add a worker environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Limit each worker request
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the worker termination grace period
    pub fn terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = Some(grace);
        self
    }

    /// Set the shortest reconnect wait
    pub fn min_backoff(mut self, delay: Duration) -> Self {
        self.min_backoff = Some(delay);
        self
    }

    /// Set the longest reconnect wait
    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = Some(delay);
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<RelayConfig, ConfigError> {
        let server = self.server.ok_or(ConfigError::MissingServer)?;
        let agent_token = self.agent_token.ok_or(ConfigError::MissingToken)?;
        let command = self.command.ok_or(ConfigError::MissingCommand)?;

        let mut worker = self
            .env
            .into_iter()
            .fold(WorkerConfig::new(command), |worker, (key, value)| {
                worker.with_env(key, value)
            });
        worker.request_timeout = self.request_timeout;
        if let Some(grace) = self.terminate_grace {
            worker.terminate_grace = grace;
        }

        let config = RelayConfig {
            server,
            agent_token,
            worker,
            min_backoff: self
                .min_backoff
                .unwrap_or(ExponentialBackoff::DEFAULT_MIN_DELAY),
            max_backoff: self
                .max_backoff
                .unwrap_or(ExponentialBackoff::DEFAULT_MAX_DELAY),
        };
        config.validate()?;
        Ok(config)
    }
}
