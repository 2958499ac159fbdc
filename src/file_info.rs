use std::path::Path;

use chrono::{DateTime, Utc};

use crate::sftp::types::{FileAttributes, NameEntry};
use crate::sftp::utils::metadata::MetadataConverter;

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileInfo {
    pub name: String,
    pub full_name: String,
    pub extension: Option<String>,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_directory: bool,
    pub longname: String,
    pub attrs: FileAttributes,
}

impl RemoteFileInfo {
    /// Builds the record for `entry`, found while listing `parent`.
    pub fn from_entry(parent: &str, entry: NameEntry) -> Self {
        let full_name = if parent.ends_with('/') {
            format!("{parent}{}", entry.filename)
        } else {
            format!("{parent}/{}", entry.filename)
        };
        let extension = Path::new(&entry.filename)
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());
        let longname = if entry.longname.is_empty() {
            MetadataConverter::format_longname(&entry.filename, &entry.attrs)
        } else {
            entry.longname
        };

        Self {
            full_name,
            extension,
            size: entry.attrs.size.unwrap_or(0),
            modified: MetadataConverter::modified(&entry.attrs),
            is_directory: entry.attrs.is_dir(),
            longname,
            attrs: entry.attrs,
            name: entry.filename,
        }
    }
}
