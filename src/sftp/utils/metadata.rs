use chrono::{DateTime, Utc};

use crate::sftp::types::FileAttributes;

const S_IFMT: u32 = 0o170000;

pub struct MetadataConverter;

impl MetadataConverter {
    /// Attributes worth sending for a local file: size, mode and times.
    pub fn from_local(metadata: &std::fs::Metadata) -> FileAttributes {
        let mut attrs = FileAttributes::default().with_size(metadata.len());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            attrs.permissions = Some(metadata.permissions().mode() & 0o7777);
        }

        #[cfg(not(unix))]
        {
            attrs.permissions = Some(if metadata.is_dir() { 0o755 } else { 0o644 });
        }

        let modified = metadata.modified().ok().and_then(epoch_secs);
        let accessed = metadata.accessed().ok().and_then(epoch_secs);
        if let Some(mtime) = modified {
            attrs = attrs.with_times(accessed.unwrap_or(mtime), mtime);
        }

        attrs
    }

    /// Modification time, if the server sent one.
    pub fn modified(attrs: &FileAttributes) -> Option<DateTime<Utc>> {
        attrs
            .times
            .and_then(|times| DateTime::from_timestamp(i64::from(times.mtime), 0))
    }

    /// `drwxr-xr-x` style mode string. Unknown mode renders as dashes.
    pub fn permissions_string(attrs: &FileAttributes) -> String {
        let mode = attrs.permissions.unwrap_or(0);
        let file_type = if attrs.is_dir() {
            'd'
        } else if attrs.is_symlink() {
            'l'
        } else if mode & S_IFMT == 0 || attrs.is_regular_file() {
            '-'
        } else {
            '?'
        };

        let mut out = String::with_capacity(10);
        out.push(file_type);
        for shift in [6, 3, 0] {
            let bits = (mode >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }

    /// `ls -l` line for servers that leave the long name empty.
    pub fn format_longname(filename: &str, attrs: &FileAttributes) -> String {
        let (uid, gid) = attrs
            .owner
            .map(|owner| (owner.uid, owner.gid))
            .unwrap_or((0, 0));
        let size = attrs.size.unwrap_or(0);
        let mtime = Self::modified(attrs)
            .map(|datetime| datetime.format("%b %d %H:%M").to_string())
            .unwrap_or_else(|| "Jan 01 00:00".to_string());

        format!(
            "{} {:3} {:5} {:5} {:8} {} {}",
            Self::permissions_string(attrs),
            1,
            uid,
            gid,
            size,
            mtime,
            filename
        )
    }
}

fn epoch_secs(time: std::time::SystemTime) -> Option<u32> {
    time.duration_since(std::time::UNIX_EPOCH)
        .ok()
        .and_then(|duration| u32::try_from(duration.as_secs()).ok())
}
