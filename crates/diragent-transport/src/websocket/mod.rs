//! WebSocket transport to the control plane
//!
//! Connects to the fixed agent endpoint on the configured server and carries
//! one JSON document per frame.

pub mod client;

pub use client::{AGENT_PATH, WebSocketConnector, WebSocketTransport};
