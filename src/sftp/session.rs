use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

use bytes::Bytes;
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::codec::{FrameCodec, encode_frame};
use super::correlation::{CancelReason, Correlator, PendingReply};
use super::message::{
    ExtendedRequest, Init, Operation, Request, ResponseBody, ServerPacket, StatusReply, Version,
    WireMessage,
};
use super::session_state::{MAX_SUPPORTED_VERSION, Negotiated, SessionState};
use super::types::{FileAttributes, FsStats, Handle, NameEntry, OpenFlags};
use super::utils::path_resolver::{PathResolver, RealPath};
use crate::config::{MAX_CHUNK_SIZE, SessionConfig};
use crate::error::{Result, SftpError};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Encoded frames waiting for the writer task.
const OUTGOING_QUEUE: usize = 64;

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the caller-facing session and its receive task.
struct Shared {
    config: SessionConfig,
    correlator: Correlator,
    /// Taken when the session stops; the writer task then drains and exits.
    outgoing: Mutex<Option<mpsc::Sender<Bytes>>>,
    state: Mutex<SessionState>,
    negotiated: OnceLock<Negotiated>,
    version_waiter: Mutex<Option<oneshot::Sender<Version>>>,
    resolver: RwLock<PathResolver>,
}

impl Shared {
    fn state(&self) -> SessionState {
        relock(&self.state).clone()
    }

    fn set_ready(&self) {
        let mut state = relock(&self.state);
        if *state == SessionState::Opening {
            *state = SessionState::Ready;
        }
    }

    /// Error reported to callers once the session can no longer work.
    fn terminal_error(&self) -> SftpError {
        if let Some(reason) = self.correlator.cancel_reason() {
            return reason.to_error();
        }
        match self.state() {
            SessionState::Faulted(reason) => SftpError::SessionFaulted(reason),
            _ => SftpError::SessionClosed,
        }
    }

    fn stop(&self, next: SessionState, reason: CancelReason) {
        {
            let mut state = relock(&self.state);
            if !state.is_terminal() {
                *state = next;
            }
        }
        let failed = self.correlator.cancel_all(reason);
        if failed > 0 {
            info!("failed {failed} outstanding requests");
        }
        relock(&self.version_waiter).take();
        relock(&self.outgoing).take();
    }

    fn fault(&self, reason: String) {
        error!("SFTP session faulted: {reason}");
        self.stop(
            SessionState::Faulted(reason.clone()),
            CancelReason::Faulted(reason),
        );
    }

    /// `None` means the server closed the channel.
    fn transport_lost(&self, err: Option<&io::Error>) {
        let reason = match err {
            Some(err) => {
                error!("SFTP transport failed: {err}");
                CancelReason::Transport(err.kind(), err.to_string())
            }
            None => {
                info!("SFTP channel closed by the server");
                CancelReason::Transport(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed by the server".into(),
                )
            }
        };
        self.stop(SessionState::Closed, reason);
    }

    fn close(&self) {
        self.stop(SessionState::Closed, CancelReason::Closed);
    }

    fn outgoing(&self) -> Result<mpsc::Sender<Bytes>> {
        let outgoing = relock(&self.outgoing).clone();
        outgoing.ok_or_else(|| self.terminal_error())
    }

    /// Queues one whole frame for the writer task.
    async fn send_payload(&self, payload: &[u8]) -> Result<()> {
        self.outgoing()?
            .send(encode_frame(payload))
            .await
            .map_err(|_| self.terminal_error())
    }

    fn dispatch(&self, frame: &[u8]) -> Result<()> {
        match ServerPacket::from_payload(frame, self.config.encoding)? {
            ServerPacket::Version(version) => match relock(&self.version_waiter).take() {
                Some(waiter) => {
                    let _ = waiter.send(version);
                    Ok(())
                }
                None => Err(SftpError::Protocol("unexpected SSH_FXP_VERSION".into())),
            },
            ServerPacket::Response(response) => self.correlator.resolve(response),
        }
    }
}

async fn receive_loop<R>(shared: Arc<Shared>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut codec = FrameCodec::new();
    let mut chunk = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                shared.transport_lost(None);
                return;
            }
            Ok(n) => n,
            Err(err) => {
                shared.transport_lost(Some(&err));
                return;
            }
        };

        let dispatched = codec
            .push(&chunk[..n])
            .and_then(|frames| frames.iter().try_for_each(|frame| shared.dispatch(frame)));
        if let Err(err) = dispatched {
            shared.fault(err.to_string());
            return;
        }
    }
}

/// Sole owner of the write half. Each frame is written and flushed whole,
/// so callers that give up never leave a partial frame on the wire.
async fn send_loop<W>(
    shared: Arc<Shared>,
    mut outgoing: mpsc::Receiver<Bytes>,
    mut writer: W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outgoing.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;

        if let Err(err) = written {
            shared.transport_lost(Some(&err));
            return Err(err);
        }
    }
    debug!("outgoing queue closed, shutting down the write side");
    writer.shutdown().await
}

/// Client side of one SFTP session running over an already opened channel.
///
/// All operations take `&self` and may run concurrently; each reply is
/// routed back to its caller by request id.
pub struct SftpSession {
    shared: Arc<Shared>,
    receiver: JoinHandle<()>,
    writer: Mutex<Option<JoinHandle<io::Result<()>>>>,
}

impl SftpSession {
    /// Negotiates the protocol version over `stream` and resolves the
    /// server-side working directory. Any failure here is fatal.
    pub async fn connect<S>(stream: S, config: SessionConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (version_tx, version_rx) = oneshot::channel();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE);

        let shared = Arc::new(Shared {
            config,
            correlator: Correlator::new(),
            outgoing: Mutex::new(Some(outgoing_tx)),
            state: Mutex::new(SessionState::Opening),
            negotiated: OnceLock::new(),
            version_waiter: Mutex::new(Some(version_tx)),
            resolver: RwLock::new(PathResolver::default()),
        });
        let receiver = tokio::spawn(receive_loop(shared.clone(), reader));
        let writer = tokio::spawn(send_loop(shared.clone(), outgoing_rx, writer));

        let session = SftpSession {
            shared,
            receiver,
            writer: Mutex::new(Some(writer)),
        };
        session.handshake(version_rx).await?;
        Ok(session)
    }

    async fn handshake(&self, version_rx: oneshot::Receiver<Version>) -> Result<()> {
        let config = &self.shared.config;
        let init = Init {
            version: MAX_SUPPORTED_VERSION,
            extensions: Vec::new(),
        };
        debug!("sending SSH_FXP_INIT, version {MAX_SUPPORTED_VERSION}");
        self.shared
            .send_payload(&init.to_payload(config.encoding))
            .await?;

        let version = match tokio::time::timeout(config.operation_timeout, version_rx).await {
            Ok(Ok(version)) => version,
            Ok(Err(_)) => return Err(self.shared.terminal_error()),
            Err(_) => {
                warn!(
                    "no SSH_FXP_VERSION within {:?}",
                    config.operation_timeout
                );
                return Err(SftpError::Timeout(config.operation_timeout));
            }
        };

        let negotiated = Negotiated::from_version(version, config.min_protocol_version)?;
        info!(
            "negotiated SFTP version {}, extensions: {:?}",
            negotiated.version, negotiated.extensions
        );
        let _ = self.shared.negotiated.set(negotiated);

        let working_dir = self.realpath_raw(".").await?;
        info!("remote working directory: {working_dir}");
        self.set_resolver(PathResolver::new(Some(working_dir)));

        self.shared.set_ready();
        Ok(())
    }

    fn resolver(&self) -> PathResolver {
        self.shared
            .resolver
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_resolver(&self, resolver: PathResolver) {
        *self
            .shared
            .resolver
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = resolver;
    }

    fn check_capability(&self, op: &Operation) -> Result<()> {
        let Some(negotiated) = self.shared.negotiated.get() else {
            return Err(SftpError::Unsupported(
                "protocol version not negotiated yet".into(),
            ));
        };

        let tag = op.message_type();
        if negotiated.version < tag.min_version() {
            return Err(SftpError::Unsupported(format!(
                "{tag:?} needs protocol version {}, server speaks {}",
                tag.min_version(),
                negotiated.version
            )));
        }
        if let Some(name) = op.extension_name() {
            if !negotiated.supports_extension(name) {
                return Err(SftpError::Unsupported(format!(
                    "server does not advertise {name}"
                )));
            }
        }
        Ok(())
    }

    /// Registers `op` and queues it without waiting for the reply.
    async fn submit(&self, op: Operation) -> Result<PendingReply> {
        self.shared.state().check_usable()?;
        self.check_capability(&op)?;

        // a queue slot is held before the id is taken, so nothing after
        // registration can be cancelled
        let outgoing = self.shared.outgoing()?;
        let slot = outgoing
            .reserve()
            .await
            .map_err(|_| self.shared.terminal_error())?;

        let pending = self.shared.correlator.register(&op)?;
        let request = Request {
            id: pending.id(),
            op,
        };
        debug!("sending request {} ({:?})", request.id, request.op.message_type());

        let payload = request.to_payload(self.shared.config.encoding);
        slot.send(encode_frame(&payload));
        Ok(pending)
    }

    async fn request(&self, op: Operation) -> Result<ResponseBody> {
        let pending = self.submit(op).await?;
        let response = pending.wait(self.shared.config.operation_timeout).await?;
        Ok(response.body)
    }

    async fn request_status(&self, op: Operation) -> Result<()> {
        match self.request(op).await? {
            ResponseBody::Status(status) => status.into_result(),
            other => Err(mismatch(&other)),
        }
    }

    async fn request_handle(&self, op: Operation) -> Result<Handle> {
        match into_success(self.request(op).await?)? {
            ResponseBody::Handle(handle) => Ok(handle),
            other => Err(mismatch(&other)),
        }
    }

    async fn request_attrs(&self, op: Operation) -> Result<FileAttributes> {
        match into_success(self.request(op).await?)? {
            ResponseBody::Attrs(attrs) => Ok(attrs),
            other => Err(mismatch(&other)),
        }
    }

    async fn request_single_name(&self, op: Operation) -> Result<String> {
        match into_success(self.request(op).await?)? {
            ResponseBody::Name(entries) => entries
                .into_iter()
                .next()
                .map(|entry| entry.filename)
                .ok_or_else(|| SftpError::Protocol("empty SSH_FXP_NAME reply".into())),
            other => Err(mismatch(&other)),
        }
    }

    async fn request_fs_stats(&self, op: Operation) -> Result<FsStats> {
        match into_success(self.request(op).await?)? {
            ResponseBody::ExtendedReply(data) => FsStats::decode(&data),
            other => Err(mismatch(&other)),
        }
    }

    /// REALPATH on an already joined path.
    async fn realpath_raw(&self, path: &str) -> Result<String> {
        self.request_single_name(Operation::RealPath {
            path: path.to_string(),
        })
        .await
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn protocol_version(&self) -> u32 {
        self.shared
            .negotiated
            .get()
            .map(|negotiated| negotiated.version)
            .unwrap_or(0)
    }

    pub fn extensions(&self) -> HashMap<String, String> {
        self.shared
            .negotiated
            .get()
            .map(|negotiated| negotiated.extensions.clone())
            .unwrap_or_default()
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.shared
            .negotiated
            .get()
            .is_some_and(|negotiated| negotiated.supports_extension(name))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Requests registered and not yet answered, including timed-out ones.
    pub fn outstanding_requests(&self) -> usize {
        self.shared.correlator.outstanding()
    }

    pub fn working_directory(&self) -> Option<String> {
        self.resolver().working_dir().map(str::to_string)
    }

    /// Joins a relative path onto the working directory.
    pub fn full_path(&self, path: &str) -> String {
        self.resolver().full_path(path)
    }

    /// Canonical absolute form of `path`, which need not exist yet.
    pub async fn canonicalize(&self, path: &str) -> Result<String> {
        self.resolver().canonicalize(self, path).await
    }

    /// Same as [`canonicalize`](Self::canonicalize).
    pub async fn get_full_path(&self, path: &str) -> Result<String> {
        self.canonicalize(path).await
    }

    /// Makes `path` the base for relative paths. The directory must exist
    /// and be listable.
    pub async fn change_directory(&self, path: &str) -> Result<()> {
        let target = self.canonicalize(path).await?;
        let handle = self.opendir(&target).await?;
        self.close(&handle).await?;
        info!("changed remote working directory to {target}");
        self.set_resolver(PathResolver::new(Some(target)));
        Ok(())
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn open(&self, path: &str, flags: OpenFlags) -> Result<Handle> {
        self.open_with_attrs(path, flags, FileAttributes::default())
            .await
    }

    pub async fn open_with_attrs(
        &self,
        path: &str,
        flags: OpenFlags,
        attrs: FileAttributes,
    ) -> Result<Handle> {
        self.request_handle(Operation::Open {
            path: self.full_path(path),
            flags,
            attrs,
        })
        .await
    }

    pub async fn close(&self, handle: &Handle) -> Result<()> {
        self.request_status(Operation::Close {
            handle: handle.clone(),
        })
        .await
    }

    /// Reads up to `len` bytes at `offset`. `None` at end of file.
    /// Reads up to `len` bytes, capped at [`MAX_CHUNK_SIZE`]. The server may
    /// return fewer; `None` means end of file.
    pub async fn read(&self, handle: &Handle, offset: u64, len: u32) -> Result<Option<Vec<u8>>> {
        let body = self
            .request(Operation::Read {
                handle: handle.clone(),
                offset,
                len: len.min(MAX_CHUNK_SIZE),
            })
            .await?;
        match into_success(body) {
            Ok(ResponseBody::Data(data)) => Ok(Some(data)),
            Ok(other) => Err(mismatch(&other)),
            Err(SftpError::Eof) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn write(&self, handle: &Handle, offset: u64, data: &[u8]) -> Result<()> {
        self.request_status(Operation::Write {
            handle: handle.clone(),
            offset,
            data: data.to_vec(),
        })
        .await
    }

    /// Attributes of `path`, following symlinks.
    pub async fn stat(&self, path: &str) -> Result<FileAttributes> {
        self.request_attrs(Operation::Stat {
            path: self.full_path(path),
        })
        .await
    }

    /// Attributes of `path` itself.
    pub async fn lstat(&self, path: &str) -> Result<FileAttributes> {
        self.request_attrs(Operation::LStat {
            path: self.full_path(path),
        })
        .await
    }

    pub async fn fstat(&self, handle: &Handle) -> Result<FileAttributes> {
        self.request_attrs(Operation::FStat {
            handle: handle.clone(),
        })
        .await
    }

    pub async fn setstat(&self, path: &str, attrs: FileAttributes) -> Result<()> {
        self.request_status(Operation::SetStat {
            path: self.full_path(path),
            attrs,
        })
        .await
    }

    pub async fn fsetstat(&self, handle: &Handle, attrs: FileAttributes) -> Result<()> {
        self.request_status(Operation::FSetStat {
            handle: handle.clone(),
            attrs,
        })
        .await
    }

    pub async fn opendir(&self, path: &str) -> Result<Handle> {
        self.request_handle(Operation::OpenDir {
            path: self.full_path(path),
        })
        .await
    }

    /// Next batch of entries. `None` once the listing is exhausted.
    pub async fn readdir(&self, handle: &Handle) -> Result<Option<Vec<NameEntry>>> {
        let body = self
            .request(Operation::ReadDir {
                handle: handle.clone(),
            })
            .await?;
        match into_success(body) {
            Ok(ResponseBody::Name(entries)) => Ok(Some(entries)),
            Ok(other) => Err(mismatch(&other)),
            Err(SftpError::Eof) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.request_status(Operation::Remove {
            path: self.full_path(path),
        })
        .await
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.mkdir_with_attrs(path, FileAttributes::default()).await
    }

    pub async fn mkdir_with_attrs(&self, path: &str, attrs: FileAttributes) -> Result<()> {
        self.request_status(Operation::MkDir {
            path: self.full_path(path),
            attrs,
        })
        .await
    }

    pub async fn rmdir(&self, path: &str) -> Result<()> {
        self.request_status(Operation::RmDir {
            path: self.full_path(path),
        })
        .await
    }

    /// The server's canonical form of `path`. Fails if it cannot resolve it;
    /// see [`canonicalize`](Self::canonicalize) for paths that may not exist.
    pub async fn realpath(&self, path: &str) -> Result<String> {
        self.realpath_raw(&self.full_path(path)).await
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.request_status(Operation::Rename {
            old_path: self.full_path(old_path),
            new_path: self.full_path(new_path),
        })
        .await
    }

    pub async fn readlink(&self, path: &str) -> Result<String> {
        self.request_single_name(Operation::ReadLink {
            path: self.full_path(path),
        })
        .await
    }

    /// Creates `link_path` pointing at `target_path`. The target is sent
    /// as given so relative links stay relative.
    pub async fn symlink(&self, link_path: &str, target_path: &str) -> Result<()> {
        self.request_status(Operation::SymLink {
            link_path: self.full_path(link_path),
            target_path: target_path.to_string(),
        })
        .await
    }

    /// Rename that replaces an existing target, via `posix-rename@openssh.com`.
    pub async fn posix_rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.request_status(Operation::Extended(ExtendedRequest::PosixRename {
            old_path: self.full_path(old_path),
            new_path: self.full_path(new_path),
        }))
        .await
    }

    pub async fn statvfs(&self, path: &str) -> Result<FsStats> {
        self.request_fs_stats(Operation::Extended(ExtendedRequest::StatVfs {
            path: self.full_path(path),
        }))
        .await
    }

    pub async fn fstatvfs(&self, handle: &Handle) -> Result<FsStats> {
        self.request_fs_stats(Operation::Extended(ExtendedRequest::FStatVfs {
            handle: handle.clone(),
        }))
        .await
    }

    pub async fn hard_link(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.request_status(Operation::Extended(ExtendedRequest::HardLink {
            old_path: self.full_path(old_path),
            new_path: self.full_path(new_path),
        }))
        .await
    }

    /// Fails every outstanding request, writes whatever is still queued and
    /// shuts the write side down. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.close();
        let writer = relock(&self.writer).take();
        if let Some(writer) = writer {
            match writer.await {
                Ok(result) => result?,
                Err(err) => warn!("SFTP writer task ended abnormally: {err}"),
            }
        }
        Ok(())
    }
}

impl RealPath for SftpSession {
    async fn try_realpath(&self, path: &str) -> Result<Option<String>> {
        match self.realpath_raw(path).await {
            Ok(resolved) => Ok(Some(resolved)),
            Err(err) if err.is_status() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        self.shared.close();
        self.receiver.abort();
        if let Some(writer) = relock(&self.writer).take() {
            writer.abort();
        }
    }
}

/// Turns an error status into its error; any other body passes through.
fn into_success(body: ResponseBody) -> Result<ResponseBody> {
    match body {
        ResponseBody::Status(StatusReply {
            code, message, ..
        }) => Err(SftpError::from_status(code, &message).unwrap_or_else(|| {
            SftpError::Protocol("success status where data was expected".into())
        })),
        body => Ok(body),
    }
}

fn mismatch(body: &ResponseBody) -> SftpError {
    SftpError::Protocol(format!("unexpected {:?} reply", body.kind()))
}
