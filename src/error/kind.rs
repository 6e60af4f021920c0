//! Error taxonomy shared across engines, middlewares and tools.

use serde::{Deserialize, Serialize};

/// Broad error kind used to route propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Missing settings, invalid URL, unsupported scheme.
    Config,
    /// HTTP send/receive failure or non-2xx status.
    Transport,
    /// Malformed SSE frame or undecodable payload.
    StreamProtocol,
    /// Structured error reported by the provider.
    Provider,
    /// Tool returned an error or timed out.
    ToolExecution,
    /// Context cancelled or deadline exceeded.
    Cancelled,
    /// Typed-key mismatch, non-serializable value, invalid structure.
    Validation,
}

impl ErrorKind {
    /// Whether errors of this kind reach the caller of `run_inference`.
    /// Stream protocol and tool errors are absorbed where they occur.
    pub fn surfaces_to_caller(self) -> bool {
        !matches!(self, Self::StreamProtocol | Self::ToolExecution)
    }
}
