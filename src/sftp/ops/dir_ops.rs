use log::{debug, warn};

use crate::error::Result;
use crate::file_info::RemoteFileInfo;
use crate::sftp::SftpSession;
use crate::sftp::types::Handle;

/// Lists `path`, skipping `.` and `..`. The directory handle is closed
/// even when reading it fails.
pub async fn list_directory(session: &SftpSession, path: &str) -> Result<Vec<RemoteFileInfo>> {
    let dir = session.canonicalize(path).await?;
    let handle = session.opendir(&dir).await?;

    let listed = read_entries(session, &handle, &dir).await;
    let closed = session.close(&handle).await;

    let entries = match (listed, closed) {
        (Ok(entries), Ok(())) => entries,
        (Ok(_), Err(err)) => return Err(err),
        (Err(err), closed) => {
            if let Err(close_err) = closed {
                warn!("closing directory {dir} after a failed listing: {close_err}");
            }
            return Err(err);
        }
    };
    debug!("listed {} entries in {dir}", entries.len());
    Ok(entries)
}

async fn read_entries(
    session: &SftpSession,
    handle: &Handle,
    dir: &str,
) -> Result<Vec<RemoteFileInfo>> {
    let mut entries = Vec::new();
    while let Some(batch) = session.readdir(handle).await? {
        entries.extend(
            batch
                .into_iter()
                .filter(|entry| entry.filename != "." && entry.filename != "..")
                .map(|entry| RemoteFileInfo::from_entry(dir, entry)),
        );
    }
    Ok(entries)
}
