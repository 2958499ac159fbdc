//! Asynchronous SFTP client (protocol versions 0 to 3) that runs over any
//! bidirectional byte stream, typically an SSH channel opened on the
//! `sftp` subsystem.

pub mod config;
pub mod error;
pub mod file_info;
pub mod sftp;

pub use config::{SessionConfig, TextEncoding};
pub use error::{Result, SftpError};
pub use file_info::RemoteFileInfo;
pub use sftp::SftpSession;
pub use sftp::types::{FileAttributes, FsStats, Handle, NameEntry, OpenFlags, StatusCode};
