//! Event payloads broadcast by the controller and worker.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host
//! application can forward them verbatim over whatever bus it uses
//! (IPC, websocket, …).

use serde::{Deserialize, Serialize};

/// Lifecycle of one render session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Controller created or disconnected; no session active.
    Idle,
    /// Generation reset issued; waiting for the producer handshake.
    Starting,
    /// Producer and consumer are live for the current generation.
    Streaming,
    /// Old generation superseded; waiting for the worker to go idle.
    Aborting,
    /// The stream was fully painted and the surface marked complete.
    Complete,
    /// Setup failed for the last generation. A new start is allowed.
    Error,
}

/// Emitted whenever the session status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. setup error message).
    pub detail: Option<String>,
}

/// Emitted per drained batch while a generation is streaming.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderProgressEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Generation this progress belongs to. Consumers should drop events
    /// from generations they no longer display.
    pub generation: u64,
    pub columns_painted: u32,
    pub total_columns: u32,
}
