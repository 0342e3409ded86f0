//! Error types for the mock server.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while registering interactions or driving the server lifecycle.
#[derive(Debug, Error)]
pub enum MockError {
    /// The interaction is malformed (bad path, status or header).
    #[error("invalid interaction: {0}")]
    InvalidInteraction(String),

    /// `start()` was called on a running server.
    #[error("mock server is already running")]
    AlreadyRunning,

    /// `stop()` was called on a stopped server.
    #[error("mock server is not running")]
    NotRunning,

    /// The listener could not be bound.
    #[error("failed to bind mock server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The serving loop ended with an I/O error.
    #[error("mock server failed while serving: {0}")]
    Serve(#[from] std::io::Error),

    /// The serving task panicked or was cancelled.
    #[error("mock server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, MockError>;
