//! Error types
//!
//! `ServerError` is what the protocol seam reports; `DisplayError` is what the
//! connection and frame layers hand back to their callers.

use std::fmt;
use std::path::PathBuf;
use serde::Serialize;
use thiserror::Error;

use crate::server::ConnectionHandle;

/// A protocol error reported by the server for one request.
///
/// Errors arrive asynchronously, so `sequence` is the only reliable way to
/// tie one back to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolError {
    pub code: u8,
    pub name: String,
    pub sequence: u64,
    pub bad_value: u32,
    pub major_opcode: u8,
    pub minor_opcode: u16,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code {}) on request {}.{}, resource 0x{:x}, serial {}",
            self.name, self.code, self.major_opcode, self.minor_opcode, self.bad_value, self.sequence
        )
    }
}

/// Failure of a single round trip through the protocol seam
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Errors surfaced by the display core
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("cannot open display {name}: {reason}")]
    Connect { name: String, reason: String },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("{context}: {error}")]
    Protocol { context: String, error: ProtocolError },

    #[error("connection {handle} still has {frames} frame(s) attached")]
    FramesAttached { handle: ConnectionHandle, frames: usize },

    #[error("no display connection with handle {0}")]
    UnknownConnection(ConnectionHandle),

    #[error("undefined color {0:?}")]
    ColorNotFound(String),

    #[error("cannot allocate color #{0:04x}{1:04x}{2:04x}")]
    ColorAllocation(u16, u16, u16),

    #[error("cannot read bitmap {path:?}: {reason}")]
    BitmapFile { path: PathBuf, reason: String },

    #[error("cannot allocate bitmap: {0}")]
    BitmapAllocation(String),

    #[error("invalid bitmap id {0}")]
    UnknownBitmap(usize),
}

impl From<ServerError> for DisplayError {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Protocol(error) => DisplayError::Protocol {
                context: "X protocol error".to_string(),
                error,
            },
            ServerError::ConnectionLost(reason) => DisplayError::ConnectionLost(reason),
        }
    }
}

pub type DisplayResult<T> = Result<T, DisplayError>;
