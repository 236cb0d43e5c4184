//! Wire types shared by the directory agent relay, its workers, and the control plane
//!
//! This crate holds the message definitions that travel over the upstream
//! websocket and the downstream worker pipe. Both hops carry the same JSON
//! documents, so the relay can forward a request without knowing what it means.
//!
//! # Type Organization
//!
//! - **Envelopes**: [`protocol`] - [`Request`] and [`Response`], one tagged operation each
//! - **Payloads**: [`operations`] - per-operation request and response bodies
//! - **Common types**: [`types`] - accounts, groups, cursors, traits, error codes
//! - **Error types**: [`error`] - encoding and validation failures
//!
//! # Design Principles
//!
//! - **Zero I/O**: All types are pure data structures
//! - **One operation per message**: enforced at decode time, impossible to violate in Rust
//! - **No circular dependencies**: diragent-protocol depends only on serde/chrono

#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! # Usage
//!
//! ```
//! use diragent_protocol::{Request, RequestKind, Response};
//!
//! let req = Request::from_json(r#"{"list_groups":{"name_prefix":"eng"}}"#).unwrap();
//! assert_eq!(req.kind(), RequestKind::ListGroups);
//!
//! // A reply that does not answer the request is replaced by an internal error
//! let reply = Response::Ping.conform_to(req.kind());
//! assert!(reply.as_error().is_some());
//! ```

pub mod error;
pub mod operations;
pub mod protocol;
pub mod types;

// Re-export commonly used types at crate level
pub use error::{ProtocolError, Result};
pub use operations::{
    ConfigureRequest, ConfigureResponse, GetAccountRequest, GetAccountResponse,
    ListAccountsRequest, ListAccountsResponse, ListGroupsRequest, ListGroupsResponse,
    PerformOperationRequest, PerformOperationResponse, PingRequest,
};
pub use protocol::{Request, RequestKind, Response};
pub use types::{Account, AccountRef, CodedError, Cursor, ErrorCode, Group, Operation, Traits};
