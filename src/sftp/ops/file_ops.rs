use std::path::Path;

use futures_util::future::try_join_all;
use log::{debug, info, warn};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SftpError};
use crate::sftp::SftpSession;
use crate::sftp::types::{FileAttributes, Handle, OpenFlags};
use crate::sftp::utils::metadata::MetadataConverter;

/// Writes kept in flight at once during an upload.
pub const WRITE_WINDOW: usize = 8;

/// Copies the remote file into `writer`. Returns the bytes copied.
pub async fn download<W>(session: &SftpSession, remote: &str, writer: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let handle = session.open(remote, OpenFlags::READ).await?;
    finish_download(session, remote, &handle, writer).await
}

/// Copies from an open handle, then closes it whatever the outcome.
async fn finish_download<W>(
    session: &SftpSession,
    remote: &str,
    handle: &Handle,
    writer: &mut W,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let copied = copy_out(session, handle, writer).await;
    let closed = session.close(handle).await;

    let copied = copied?;
    closed?;
    info!("downloaded {copied} bytes from {remote}");
    Ok(copied)
}

async fn copy_out<W>(session: &SftpSession, handle: &Handle, writer: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let chunk = session.config().read_chunk();
    let mut offset = 0u64;

    while let Some(data) = session.read(handle, offset, chunk).await? {
        if data.is_empty() {
            break;
        }
        writer.write_all(&data).await.map_err(SftpError::LocalIo)?;
        offset += data.len() as u64;
    }
    writer.flush().await.map_err(SftpError::LocalIo)?;
    Ok(offset)
}

/// Streams `reader` into a remote file. Refuses to replace an existing file
/// unless `overwrite` is set. Returns the bytes sent.
pub async fn upload<R>(
    session: &SftpSession,
    reader: &mut R,
    remote: &str,
    overwrite: bool,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let flags = if overwrite {
        OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE
    } else {
        OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCLUSIVE
    };
    let handle = match session.open(remote, flags).await {
        Ok(handle) => handle,
        // v3 has no dedicated status for an existing file
        Err(err) if !overwrite && err.is_status() && !err.is_not_found() => {
            if session.exists(remote).await? {
                return Err(SftpError::AlreadyExists(session.full_path(remote)));
            }
            return Err(err);
        }
        Err(err) => return Err(err),
    };
    let sent = copy_in(session, &handle, reader).await;
    let closed = session.close(&handle).await;

    let sent = sent?;
    closed?;
    info!("uploaded {sent} bytes to {remote}");
    Ok(sent)
}

async fn copy_in<R>(session: &SftpSession, handle: &Handle, reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let chunk_size = session.config().write_chunk() as usize;
    let mut offset = 0u64;

    loop {
        let mut batch = Vec::with_capacity(WRITE_WINDOW);
        while batch.len() < WRITE_WINDOW {
            let chunk = read_chunk(reader, chunk_size).await?;
            if chunk.is_empty() {
                break;
            }
            let at = offset;
            offset += chunk.len() as u64;
            batch.push((at, chunk));
        }
        if batch.is_empty() {
            return Ok(offset);
        }

        debug!("writing {} chunks ending at offset {offset}", batch.len());
        try_join_all(
            batch
                .iter()
                .map(|(at, data)| session.write(handle, *at, data)),
        )
        .await?;
    }
}

/// Fills up to `size` bytes; shorter only at end of input.
async fn read_chunk<R>(reader: &mut R, size: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        let n = reader
            .read(&mut buf[filled..])
            .await
            .map_err(SftpError::LocalIo)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Downloads into a local file, creating or truncating it. The local file
/// is only touched once the remote one is open.
pub async fn download_file(session: &SftpSession, remote: &str, local: &Path) -> Result<u64> {
    let handle = session.open(remote, OpenFlags::READ).await?;
    let mut file = match fs::File::create(local).await {
        Ok(file) => file,
        Err(err) => {
            if let Err(close_err) = session.close(&handle).await {
                warn!("closing {remote}: {close_err}");
            }
            return Err(SftpError::LocalIo(err));
        }
    };
    finish_download(session, remote, &handle, &mut file).await
}

/// Uploads a local file, then copies its mode and times onto the remote
/// copy when `preserve` is set. Servers that refuse the attributes only
/// get a warning.
pub async fn upload_file(
    session: &SftpSession,
    local: &Path,
    remote: &str,
    overwrite: bool,
    preserve: bool,
) -> Result<u64> {
    let mut file = fs::File::open(local).await.map_err(SftpError::LocalIo)?;
    let sent = upload(session, &mut file, remote, overwrite).await?;

    if preserve {
        let metadata = file.metadata().await.map_err(SftpError::LocalIo)?;
        let local_attrs = MetadataConverter::from_local(&metadata);
        let attrs = FileAttributes {
            permissions: local_attrs.permissions,
            times: local_attrs.times,
            ..FileAttributes::default()
        };
        if let Err(err) = session.setstat(remote, attrs).await {
            warn!("could not preserve attributes on {remote}: {err}");
        }
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::sftp::message::{Operation, ResponseBody, StatusReply};
    use crate::sftp::testing::connect;
    use crate::sftp::types::StatusCode;

    fn ok() -> ResponseBody {
        ResponseBody::Status(StatusReply::ok())
    }

    #[tokio::test]
    async fn upload_batches_writes_at_increasing_offsets() {
        let config = SessionConfig::default().with_chunk_size(4);
        let (session, mut server) = connect(3, &[], "/", config).await;
        let payload: Vec<u8> = (0u8..10).collect();
        let mut reader = payload.as_slice();

        let (sent, ()) = tokio::join!(upload(&session, &mut reader, "/f", true), async {
            let open = server.recv_request().await;
            assert!(matches!(open.op, Operation::Open { ref flags, .. }
                if flags.contains(OpenFlags::CREATE | OpenFlags::TRUNCATE)));
            server
                .reply(open.id, ResponseBody::Handle(Handle(b"f".to_vec())))
                .await;

            // the whole window arrives before any reply
            let mut writes = Vec::new();
            for _ in 0..3 {
                writes.push(server.recv_request().await);
            }
            let offsets: Vec<(u64, usize)> = writes
                .iter()
                .map(|request| match &request.op {
                    Operation::Write { offset, data, .. } => (*offset, data.len()),
                    other => panic!("expected WRITE, got {other:?}"),
                })
                .collect();
            assert_eq!(offsets, vec![(0, 4), (4, 4), (8, 2)]);
            for request in writes.iter().rev() {
                server.reply(request.id, ok()).await;
            }

            let close = server.recv_request().await;
            assert!(matches!(close.op, Operation::Close { .. }));
            server.reply(close.id, ok()).await;
        });

        assert_eq!(sent.unwrap(), 10);
    }

    #[tokio::test]
    async fn upload_refuses_existing_file() {
        let (session, mut server) = connect(3, &[], "/", SessionConfig::default()).await;
        let mut reader: &[u8] = b"x";

        let (result, ()) = tokio::join!(upload(&session, &mut reader, "/f", false), async {
            let open = server.recv_request().await;
            assert!(matches!(open.op, Operation::Open { ref flags, .. }
                if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE)
                    && !flags.contains(OpenFlags::TRUNCATE)));
            server
                .reply(
                    open.id,
                    ResponseBody::Status(StatusReply::new(StatusCode::Failure, "exists")),
                )
                .await;

            let stat = server.recv_request().await;
            assert!(matches!(stat.op, Operation::Stat { .. }));
            server
                .reply(
                    stat.id,
                    ResponseBody::Attrs(FileAttributes::default().with_size(1)),
                )
                .await;
        });

        assert!(matches!(result, Err(SftpError::AlreadyExists(p)) if p == "/f"));
    }

    #[tokio::test]
    async fn exclusive_open_failure_on_a_missing_file_is_kept() {
        let (session, mut server) = connect(3, &[], "/", SessionConfig::default()).await;
        let mut reader: &[u8] = b"x";

        let (result, ()) = tokio::join!(upload(&session, &mut reader, "/f", false), async {
            let open = server.recv_request().await;
            server
                .reply(
                    open.id,
                    ResponseBody::Status(StatusReply::new(StatusCode::Failure, "disk full")),
                )
                .await;
            let stat = server.recv_request().await;
            server
                .reply(
                    stat.id,
                    ResponseBody::Status(StatusReply::new(StatusCode::NoSuchFile, "")),
                )
                .await;
        });

        assert!(matches!(
            result,
            Err(SftpError::Remote {
                code: StatusCode::Failure,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn download_file_leaves_local_file_alone_when_remote_is_missing() {
        let (session, mut server) = connect(3, &[], "/", SessionConfig::default()).await;
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("keep.txt");
        std::fs::write(&existing, b"old").unwrap();
        let fresh = dir.path().join("fresh.txt");

        for local in [&existing, &fresh] {
            let (result, ()) = tokio::join!(download_file(&session, "/missing", local), async {
                let open = server.recv_request().await;
                assert!(matches!(open.op, Operation::Open { .. }));
                server
                    .reply(
                        open.id,
                        ResponseBody::Status(StatusReply::new(StatusCode::NoSuchFile, "")),
                    )
                    .await;
            });
            assert!(result.unwrap_err().is_not_found());
        }

        assert_eq!(std::fs::read(&existing).unwrap(), b"old");
        assert!(!fresh.exists());
    }

    #[tokio::test]
    async fn download_reads_until_eof_and_closes() {
        let config = SessionConfig::default().with_chunk_size(3);
        let (session, mut server) = connect(3, &[], "/", config).await;
        let mut out = Vec::new();

        let (copied, ()) = tokio::join!(download(&session, "/f", &mut out), async {
            let open = server.recv_request().await;
            server
                .reply(open.id, ResponseBody::Handle(Handle(b"f".to_vec())))
                .await;
            for chunk in [&b"abc"[..], &b"de"[..]] {
                let read = server.recv_request().await;
                server
                    .reply(read.id, ResponseBody::Data(chunk.to_vec()))
                    .await;
            }
            let last = server.recv_request().await;
            assert!(matches!(last.op, Operation::Read { offset: 5, len: 3, .. }));
            server
                .reply(
                    last.id,
                    ResponseBody::Status(StatusReply::new(StatusCode::Eof, "")),
                )
                .await;
            let close = server.recv_request().await;
            server.reply(close.id, ok()).await;
        });

        assert_eq!(copied.unwrap(), 5);
        assert_eq!(out, b"abcde");
    }
}
