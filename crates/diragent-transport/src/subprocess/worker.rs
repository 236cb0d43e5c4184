//! The worker subprocess as seen from the relay

use super::process::{ProcessConfig, ProcessHandle};
use crate::error::WorkerError;
use crate::traits::Worker;
use async_trait::async_trait;
use diragent_protocol::{ConfigureRequest, ConfigureResponse, Request, RequestKind, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Environment variable that tells a process it was started as a worker
pub const WORKER_ENV_VAR: &str = "DIRAGENT_WORKER";

/// Default time a worker gets to exit after being asked to stop
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// How to launch the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// A command line run through the platform shell
    Shell(String),

    /// A program and its arguments, run directly
    Exec {
        /// Executable path
        program: String,
        /// Arguments
        args: Vec<String>,
    },
}

impl WorkerCommand {
    fn process_config(&self) -> ProcessConfig {
        match self {
            Self::Shell(line) => shell(line),
            Self::Exec { program, args } => args
                .iter()
                .fold(ProcessConfig::new(program), |config, arg| config.with_arg(arg)),
        }
    }
}

#[cfg(not(windows))]
fn shell(line: &str) -> ProcessConfig {
    ProcessConfig::new("/bin/sh").with_arg("-c").with_arg(line)
}

#[cfg(windows)]
fn shell(line: &str) -> ProcessConfig {
    ProcessConfig::new("cmd").with_arg("/C").with_arg(line)
}

/// Settings for starting and driving a worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How to launch it
    pub command: WorkerCommand,

    /// Extra environment variables
    pub env: Vec<(String, String)>,

    /// Limit on a single request, none by default
    pub request_timeout: Option<Duration>,

    /// Time allowed between asking the worker to stop and killing it
    pub terminate_grace: Duration,
}

impl WorkerConfig {
    /// Configuration with defaults for `command`
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            env: Vec::new(),
            request_timeout: None,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Limit each request to `timeout`
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the termination grace period
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    fn process_config(&self) -> ProcessConfig {
        self.env
            .iter()
            .fold(self.command.process_config(), |config, (key, value)| {
                config.with_env(key, value)
            })
            .with_env(WORKER_ENV_VAR, "true")
    }
}

/// A running worker subprocess that passed its handshake
pub struct WorkerProcess {
    process: ProcessHandle,
    request_timeout: Option<Duration>,
    terminate_grace: Duration,
    configuration: ConfigureResponse,
}

impl WorkerProcess {
    /// Spawn the worker and perform the `configure` handshake
    ///
    /// Any handshake failure is returned as [`WorkerError::Handshake`] and the
    /// subprocess is stopped.
    pub async fn start(config: WorkerConfig) -> Result<Self, WorkerError> {
        let process = ProcessHandle::spawn(&config.process_config())?;
        let mut worker = Self {
            process,
            request_timeout: config.request_timeout,
            terminate_grace: config.terminate_grace,
            configuration: ConfigureResponse::default(),
        };

        match worker.handshake().await {
            Ok(configuration) => {
                info!(
                    name = %configuration.traits.name,
                    immutable_id = configuration.immutable_id.as_deref().unwrap_or(""),
                    traits = ?configuration.traits,
                    "worker configured"
                );
                worker.configuration = configuration;
                Ok(worker)
            }
            Err(err) => {
                let _ = worker.process.terminate(worker.terminate_grace).await;
                Err(err)
            }
        }
    }

    /// What the worker reported during the handshake
    pub fn configuration(&self) -> &ConfigureResponse {
        &self.configuration
    }

    async fn handshake(&mut self) -> Result<ConfigureResponse, WorkerError> {
        let response = self
            .round_trip(&Request::Configure(ConfigureRequest {}))
            .await
            .map_err(|err| match err {
                WorkerError::Handshake(_) => err,
                other => WorkerError::Handshake(other.to_string()),
            })?;

        match response.conform_to(RequestKind::Configure) {
            Response::Configure(configuration) => Ok(configuration),
            Response::Error(err) => Err(WorkerError::Handshake(err.to_string())),
            other => Err(WorkerError::Handshake(format!(
                "unexpected response {other:?}"
            ))),
        }
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response, WorkerError> {
        self.process.send_message(&request.to_value()?).await?;
        let document = self
            .process
            .recv_message()
            .await?
            .ok_or_else(|| WorkerError::Exited(self.process.exit_status()))?;
        debug!(response = %document, "worker replied");
        Ok(Response::from_value(document)?)
    }
}

#[async_trait]
impl Worker for WorkerProcess {
    async fn round_trip(&mut self, request: &Request) -> Result<Response, WorkerError> {
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(request))
                .await
                .map_err(|_| WorkerError::Timeout(limit))?,
            None => self.exchange(request).await,
        }
    }

    fn exited(&self) -> CancellationToken {
        self.process.exited()
    }

    fn exit_status(&self) -> Option<std::process::ExitStatus> {
        self.process.exit_status()
    }

    async fn terminate(&mut self) -> Result<(), WorkerError> {
        self.process.terminate(self.terminate_grace).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_is_always_set() {
        let config = WorkerConfig::new(WorkerCommand::Shell("true".into()))
            .with_env("OKTA_DOMAIN", "example.okta.com");
        let process = config.process_config();

        assert_eq!(
            process.env,
            vec![
                ("OKTA_DOMAIN".to_string(), "example.okta.com".to_string()),
                (WORKER_ENV_VAR.to_string(), "true".to_string()),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_command_uses_sh() {
        let process = WorkerCommand::Shell("ldap-worker --verbose".into()).process_config();
        assert_eq!(process.program, "/bin/sh");
        assert_eq!(process.args, vec!["-c", "ldap-worker --verbose"]);
    }

    #[test]
    fn test_exec_command_passes_args() {
        let process = WorkerCommand::Exec {
            program: "/usr/bin/diragent".into(),
            args: vec!["memory".into(), "--fixture".into(), "dir.json".into()],
        }
        .process_config();
        assert_eq!(process.program, "/usr/bin/diragent");
        assert_eq!(process.args, vec!["memory", "--fixture", "dir.json"]);
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::new(WorkerCommand::Shell("true".into()));
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.terminate_grace, DEFAULT_TERMINATE_GRACE);
    }
}
