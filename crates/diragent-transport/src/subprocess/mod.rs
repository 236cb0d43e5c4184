//! Worker subprocess management
//!
//! Spawns the worker with the marker environment variable set, talks to it
//! over a stream of JSON documents on stdin/stdout, and watches for its exit.

pub mod codec;
pub mod process;
pub mod worker;

pub use codec::{Document, JsonStreamCodec, MAX_DOCUMENT_BYTES};
pub use process::{ProcessConfig, ProcessHandle};
pub use worker::{
    DEFAULT_TERMINATE_GRACE, WORKER_ENV_VAR, WorkerCommand, WorkerConfig, WorkerProcess,
};
