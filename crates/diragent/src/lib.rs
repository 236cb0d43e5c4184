//! Directory agent relay
//!
//! Runs on customer infrastructure and lets a remote identity control plane
//! drive account sync, group lookup, and account recovery against a
//! directory that is only reachable from inside the network. Directory
//! credentials stay with the local worker; the control plane only ever sees
//! typed requests and responses.
//!
//! # Architecture
//!
//! 1. **Protocol** (`diragent-protocol`): request and response types
//! 2. **Transport** (`diragent-transport`): websocket channel and worker subprocess
//! 3. **Relay** (this crate): the forwarding loop, the worker-side dispatcher,
//!    and the [`Provider`] trait backends implement
//!
//! # Writing a worker
//!
//! ```ignore
//! use diragent::{Provider, dispatcher::run_worker_stdio};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Ldap { /* connection settings */ }
//!
//! #[async_trait::async_trait]
//! impl Provider for Ldap {
//!     // configure, list_accounts, get_account, list_groups, perform_operation
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     run_worker_stdio(&Ldap::connect()?, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Running the relay
//!
//! ```ignore
//! use diragent::{Relay, RelayConfig, RelayOptions};
//! use diragent_transport::WorkerProcess;
//!
//! let config = RelayConfig::builder()
//!     .server("https://control.example.com")
//!     .agent_token(token)
//!     .command(WorkerCommand::Shell("ldap-worker".into()))
//!     .build()?;
//! let worker = WorkerProcess::start(config.worker.clone()).await?;
//! let mut relay = Relay::new(config.connector()?, worker, RelayOptions::from(&config), shutdown);
//! relay.run().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod provider;
pub mod relay;
pub mod testing;

// Re-export commonly used types
pub use config::{FileConfig, RelayConfig, RelayConfigBuilder};
pub use credentials::{Credential, CredentialSource, RefreshOptions, SharedCredential, spawn_refresh};
pub use directory::MemoryDirectory;
pub use dispatcher::{classify, dispatch, run_worker, run_worker_stdio};
pub use error::{ConfigError, ErrorRecovery, RelayError, Result};
pub use provider::Provider;
pub use relay::{Relay, RelayOptions, RelayState};

pub use diragent_protocol::{
    Account, AccountRef, CodedError, Cursor, ErrorCode, Group, Operation, Request, RequestKind,
    Response, Traits,
};
