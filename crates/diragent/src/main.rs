//! `diragent` binary
//!
//! Runs the relay against an external worker command, or serves a JSON
//! fixture through the built-in in-memory directory. The same executable is
//! both relay and worker: it re-invokes itself with `DIRAGENT_WORKER=true`.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use diragent::config::{AGENT_TOKEN_ENV, SERVER_ENV};
use diragent::{
    ConfigError, ErrorRecovery, FileConfig, MemoryDirectory, Relay, RelayConfig,
    RelayConfigBuilder, RelayError, RelayOptions, run_worker_stdio,
};
use diragent_transport::{WORKER_ENV_VAR, WorkerCommand, WorkerProcess};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn as_arg(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "diragent", version)]
#[command(about = "Relay between an identity control plane and a local directory worker")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "DIRAGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Relay requests to an external worker command
    Relay {
        /// Worker command line, run through the shell
        #[arg(long)]
        command: Option<String>,

        #[command(flatten)]
        relay: RelayArgs,
    },

    /// Serve a JSON fixture as the directory
    Memory {
        /// Fixture file
        #[arg(long)]
        fixture: PathBuf,

        #[command(flatten)]
        relay: RelayArgs,
    },
}

#[derive(Debug, Args)]
struct RelayArgs {
    /// Control-plane URL
    #[arg(long, env = SERVER_ENV)]
    server: Option<String>,

    /// Agent token
    #[arg(long, env = AGENT_TOKEN_ENV, hide_env_values = true)]
    agent_token: Option<String>,

    /// Extra worker environment variable, repeatable
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    env: Vec<(String, String)>,

    /// Shortest reconnect delay in seconds
    #[arg(long, value_name = "SECS")]
    min_backoff: Option<u64>,

    /// Longest reconnect delay in seconds
    #[arg(long, value_name = "SECS")]
    max_backoff: Option<u64>,

    /// Fail the relay when a worker request takes longer than this
    #[arg(long, value_name = "SECS")]
    request_timeout: Option<u64>,

    /// Seconds the worker gets to exit before it is killed
    #[arg(long, value_name = "SECS")]
    terminate_grace: Option<u64>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let shutdown = CancellationToken::new();
    if is_worker() {
        absorb_signals().context("cannot install worker signal handlers")?;
    } else {
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    match cli.command {
        Command::Relay { command, relay } => {
            let mut builder = relay_builder(cli.config.as_deref(), relay)?;
            if let Some(command) = command {
                builder = builder.command(WorkerCommand::Shell(command));
            }
            run_relay(builder.build()?, shutdown).await
        }
        Command::Memory { fixture, relay } => {
            if is_worker() {
                return serve_fixture(&fixture, shutdown).await;
            }
            let program = std::env::current_exe().context("cannot locate the diragent executable")?;
            let fixture = std::path::absolute(&fixture)
                .with_context(|| format!("cannot resolve {}", fixture.display()))?;
            let worker = WorkerCommand::Exec {
                program: program.to_string_lossy().into_owned(),
                args: vec![
                    "memory".to_string(),
                    "--fixture".to_string(),
                    fixture.to_string_lossy().into_owned(),
                    "--log-format".to_string(),
                    cli.log_format.as_arg().to_string(),
                ],
            };
            let builder = relay_builder(cli.config.as_deref(), relay)?.command(worker);
            run_relay(builder.build()?, shutdown).await
        }
    }
}

fn is_worker() -> bool {
    std::env::var(WORKER_ENV_VAR).is_ok_and(|value| value == "true")
}

/// File values first, then environment and flags as resolved by clap
fn relay_builder(config: Option<&Path>, args: RelayArgs) -> Result<RelayConfigBuilder, ConfigError> {
    let mut builder = RelayConfig::builder();
    if let Some(path) = config {
        builder = builder.file(FileConfig::load(path)?);
    }
    if let Some(server) = args.server {
        builder = builder.server(server);
    }
    if let Some(token) = args.agent_token {
        builder = builder.agent_token(SecretString::new(token.into_boxed_str()));
    }
    for (key, value) in args.env {
        builder = builder.env(key, value);
    }
    if let Some(secs) = args.min_backoff {
        builder = builder.min_backoff(Duration::from_secs(secs));
    }
    if let Some(secs) = args.max_backoff {
        builder = builder.max_backoff(Duration::from_secs(secs));
    }
    if let Some(secs) = args.request_timeout {
        builder = builder.request_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.terminate_grace {
        builder = builder.terminate_grace(Duration::from_secs(secs));
    }
    Ok(builder)
}

async fn run_relay(config: RelayConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let connector = config.connector()?;
    info!(server = %connector.redacted_url(), "starting relay");

    let worker = WorkerProcess::start(config.worker.clone())
        .await
        .map_err(|err| fatal(err.into()))?;

    let mut relay = Relay::new(connector, worker, RelayOptions::from(&config), shutdown);
    relay.run().await.map_err(fatal)
}

fn fatal(err: RelayError) -> anyhow::Error {
    error!(action = err.suggested_action(), "{err}");
    err.into()
}

async fn serve_fixture(fixture: &Path, shutdown: CancellationToken) -> anyhow::Result<()> {
    let directory = MemoryDirectory::load(fixture)?;
    run_worker_stdio(&directory, shutdown)
        .await
        .context("worker I/O failed")
}

/// Keep group-wide interrupts from killing a worker
///
/// A terminal Ctrl-C reaches relay and worker alike. The relay stops its
/// worker by closing stdin, so the worker only logs these signals.
#[cfg(unix)]
fn absorb_signals() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = interrupt.recv() => debug!("worker ignoring SIGINT, waiting for input to close"),
                Some(()) = terminate.recv() => debug!("worker ignoring SIGTERM, waiting for input to close"),
                else => break,
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn absorb_signals() -> std::io::Result<()> {
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Logs go to stderr; stdout carries the worker protocol.
fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => subscriber.try_init(),
        LogFormat::Json => subscriber.json().try_init(),
    }
    .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("LDAP_URL=ldaps://dc1?x=y").unwrap(),
            ("LDAP_URL".to_string(), "ldaps://dc1?x=y".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "server = \"https://file.example.com\"\nagent_token = \"file\"\ncommand = \"w\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "diragent",
            "relay",
            "--server",
            "https://flag.example.com",
            "--env",
            "A=1",
            "--request-timeout",
            "30",
        ])
        .unwrap();
        let Command::Relay { relay, .. } = cli.command else {
            panic!("expected relay subcommand");
        };

        let config = relay_builder(Some(file.path()), relay).unwrap().build().unwrap();
        assert_eq!(config.server, "https://flag.example.com");
        assert_eq!(config.worker.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.worker.env, vec![("A".to_string(), "1".to_string())]);
    }
}
