//! Session and proxy errors.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while starting or running a debug session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The listening endpoint could not be bound.
    #[error("failed to bind debug listener: {0}")]
    Bind(#[source] std::io::Error),

    /// No client connected within the accept window.
    #[error("no client connected within {0:?}")]
    AcceptTimeout(Duration),

    /// The debugger process could not be started.
    #[error("debugger process failed to start: {0}")]
    Spawn(#[source] std::io::Error),

    /// A live session already exists for the target project.
    #[error("a debug session is already active for '{}'", .0.display())]
    SessionActive(PathBuf),

    /// The session was disposed before the operation completed.
    #[error("session disposed")]
    Disposed,
}

/// Errors raised while waiting on a proxy-originated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The peer did not answer within the request window.
    #[error("request '{0}' timed out")]
    Timeout(String),

    /// The transport channel closed before an answer arrived.
    #[error("channel closed while awaiting '{0}'")]
    ChannelClosed(String),

    /// The peer answered with `success=false`.
    #[error("request '{command}' rejected: {message}")]
    Rejected { command: String, message: String },
}
