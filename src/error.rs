//! Error types for the SFTP client.

use std::time::Duration;

use thiserror::Error;

use crate::sftp::types::StatusCode;

/// Every way an SFTP operation can fail.
#[derive(Debug, Error)]
pub enum SftpError {
    /// The channel carrying the session broke or was closed underneath us.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed frame, unknown message tag or a reply nobody asked for.
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("no such file: {0}")]
    PathNotFound(String),

    /// End of file or directory listing.
    #[error("end of file")]
    Eof,

    /// Any other non-success status reported by the server.
    #[error("remote failure ({code:?}): {message}")]
    Remote { code: StatusCode, message: String },

    /// Rejected locally because the negotiated version or extension table
    /// does not cover the operation. Nothing was sent to the server.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The server never answered within the operation timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote file already exists: {0}")]
    AlreadyExists(String),

    /// Failure on the local side of an upload or download.
    #[error("local I/O error: {0}")]
    LocalIo(#[source] std::io::Error),

    #[error("session closed")]
    SessionClosed,

    /// The session hit a protocol violation earlier and refuses further work.
    #[error("session faulted: {0}")]
    SessionFaulted(String),
}

impl SftpError {
    /// Maps a status reply to an error. `Ok` yields `None`.
    pub fn from_status(code: StatusCode, message: &str) -> Option<Self> {
        match code {
            StatusCode::Ok => None,
            StatusCode::Eof => Some(SftpError::Eof),
            StatusCode::PermissionDenied => Some(SftpError::PermissionDenied(message.to_string())),
            StatusCode::NoSuchFile => Some(SftpError::PathNotFound(message.to_string())),
            code => Some(SftpError::Remote {
                code,
                message: message.to_string(),
            }),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SftpError::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SftpError::PathNotFound(_))
    }

    /// True for errors that came back from the server as a status reply.
    pub fn is_status(&self) -> bool {
        matches!(
            self,
            SftpError::Eof
                | SftpError::PermissionDenied(_)
                | SftpError::PathNotFound(_)
                | SftpError::Remote { .. }
        )
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SftpError>;
