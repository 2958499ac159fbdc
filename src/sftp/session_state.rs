use std::collections::HashMap;

use super::message::Version;
use crate::error::{Result, SftpError};

pub const MIN_SUPPORTED_VERSION: u32 = 0;
pub const MAX_SUPPORTED_VERSION: u32 = 3;

/// Lifecycle of a session.
///
/// `Opening -> Ready -> Closed`, with `Faulted` reachable from anywhere
/// on a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Ready,
    Closed,
    Faulted(String),
}

impl SessionState {
    /// Whether requests may still be issued. Opening allows the requests
    /// the handshake itself makes.
    pub fn check_usable(&self) -> Result<()> {
        match self {
            SessionState::Opening | SessionState::Ready => Ok(()),
            SessionState::Closed => Err(SftpError::SessionClosed),
            SessionState::Faulted(reason) => Err(SftpError::SessionFaulted(reason.clone())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Faulted(_))
    }
}

/// What version negotiation settled on. Written once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub version: u32,
    pub extensions: HashMap<String, String>,
}

impl Negotiated {
    /// Accepts the server's VERSION if it falls in the supported range,
    /// optionally narrowed by a caller-chosen floor.
    pub fn from_version(version: Version, floor: u32) -> Result<Self> {
        let min = floor.max(MIN_SUPPORTED_VERSION);
        if !(min..=MAX_SUPPORTED_VERSION).contains(&version.version) {
            return Err(SftpError::Unsupported(format!(
                "server SFTP version {} is not supported",
                version.version
            )));
        }
        Ok(Self {
            version: version.version,
            extensions: version.extensions.into_iter().collect(),
        })
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }
}
