#![allow(dead_code)]

//! A real SFTP server over an in-memory pipe, serving a temporary directory.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use log::{info, warn};
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use rustedbytes_sftpc::{SessionConfig, SftpSession};
use tempfile::TempDir;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

pub struct LocalSftpServer {
    root: PathBuf,
    files: HashMap<String, fs::File>,
    dirs: HashMap<String, Option<Vec<File>>>,
    handle_counter: u64,
}

fn io_status(err: &std::io::Error) -> StatusCode {
    match err.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

fn to_file_attributes(metadata: &std::fs::Metadata) -> FileAttributes {
    let mut attrs = FileAttributes::default();
    attrs.size = Some(metadata.len());

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        attrs.uid = Some(metadata.uid());
        attrs.gid = Some(metadata.gid());
        attrs.permissions = Some(metadata.mode());
    }

    #[cfg(not(unix))]
    {
        attrs.permissions = Some(if metadata.is_dir() { 0o040755 } else { 0o100644 });
    }

    let secs = |time: std::io::Result<std::time::SystemTime>| {
        time.ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
    };
    attrs.mtime = secs(metadata.modified());
    attrs.atime = secs(metadata.accessed()).or(attrs.mtime);
    attrs
}

impl LocalSftpServer {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            files: HashMap::new(),
            dirs: HashMap::new(),
            handle_counter: 0,
        }
    }

    fn local(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn remote(&self, local: &Path) -> Option<String> {
        local
            .strip_prefix(&self.root)
            .ok()
            .map(|rel| format!("/{}", rel.to_string_lossy()))
    }

    fn next_handle(&mut self) -> String {
        self.handle_counter += 1;
        format!("handle_{}", self.handle_counter)
    }
}

impl russh_sftp::server::Handler for LocalSftpServer {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        info!("fixture: client version {version}");
        Ok(Version::new())
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let canonical = self
            .local(&path)
            .canonicalize()
            .map_err(|_| StatusCode::NoSuchFile)?;
        let remote = self.remote(&canonical).ok_or(StatusCode::PermissionDenied)?;
        Ok(Name {
            id,
            files: vec![File::dummy(&remote)],
        })
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let create = pflags.contains(OpenFlags::CREATE);
        let exclusive = create && pflags.contains(OpenFlags::EXCLUDE);
        let mut opts = fs::OpenOptions::new();
        opts.read(pflags.contains(OpenFlags::READ))
            .write(pflags.contains(OpenFlags::WRITE))
            .create(create && !exclusive)
            .create_new(exclusive)
            .truncate(pflags.contains(OpenFlags::TRUNCATE))
            .append(pflags.contains(OpenFlags::APPEND));

        let file = opts.open(self.local(&filename)).await.map_err(|e| {
            warn!("fixture: open {filename}: {e}");
            io_status(&e)
        })?;
        let handle = self.next_handle();
        self.files.insert(handle.clone(), file);
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        if self.files.remove(&handle).is_none() && self.dirs.remove(&handle).is_none() {
            return Err(StatusCode::BadMessage);
        }
        Ok(ok(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let file = self.files.get_mut(&handle).ok_or(StatusCode::BadMessage)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_status(&e))?;
        let mut data = vec![0u8; len as usize];
        let n = file.read(&mut data).await.map_err(|e| io_status(&e))?;
        if n == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(n);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let file = self.files.get_mut(&handle).ok_or(StatusCode::BadMessage)?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| io_status(&e))?;
        file.write_all(&data).await.map_err(|e| io_status(&e))?;
        file.flush().await.map_err(|e| io_status(&e))?;
        Ok(ok(id))
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = fs::metadata(self.local(&path))
            .await
            .map_err(|e| io_status(&e))?;
        Ok(Attrs {
            id,
            attrs: to_file_attributes(&metadata),
        })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = fs::symlink_metadata(self.local(&path))
            .await
            .map_err(|e| io_status(&e))?;
        Ok(Attrs {
            id,
            attrs: to_file_attributes(&metadata),
        })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        let file = self.files.get(&handle).ok_or(StatusCode::BadMessage)?;
        let metadata = file.metadata().await.map_err(|e| io_status(&e))?;
        Ok(Attrs {
            id,
            attrs: to_file_attributes(&metadata),
        })
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let mut read_dir = fs::read_dir(self.local(&path))
            .await
            .map_err(|e| io_status(&e))?;

        let mut files = vec![File::dummy("."), File::dummy("..")];
        while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_status(&e))? {
            let metadata = entry.metadata().await.map_err(|e| io_status(&e))?;
            files.push(File {
                filename: entry.file_name().to_string_lossy().to_string(),
                longname: String::new(),
                attrs: to_file_attributes(&metadata),
            });
        }

        let handle = self.next_handle();
        self.dirs.insert(handle.clone(), Some(files));
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let slot = self.dirs.get_mut(&handle).ok_or(StatusCode::BadMessage)?;
        slot.take()
            .map(|files| Name { id, files })
            .ok_or(StatusCode::Eof)
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        fs::remove_file(self.local(&filename))
            .await
            .map_err(|e| io_status(&e))?;
        Ok(ok(id))
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        fs::create_dir(self.local(&path))
            .await
            .map_err(|e| io_status(&e))?;
        Ok(ok(id))
    }

    async fn rmdir(&mut self, id: u32, path: String) -> Result<Status, Self::Error> {
        fs::remove_dir(self.local(&path))
            .await
            .map_err(|e| io_status(&e))?;
        Ok(ok(id))
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        let target = self.local(&newpath);
        if fs::symlink_metadata(&target).await.is_ok() {
            return Err(StatusCode::Failure);
        }
        fs::rename(self.local(&oldpath), target)
            .await
            .map_err(|e| io_status(&e))?;
        Ok(ok(id))
    }
}

/// A client session wired to a [`LocalSftpServer`] over a temp directory.
pub struct Fixture {
    pub dir: TempDir,
    pub session: SftpSession,
}

impl Fixture {
    pub async fn start() -> Self {
        Self::start_with(SessionConfig::default()).await
    }

    pub async fn start_with(config: SessionConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = tempfile::tempdir().expect("temp dir");
        let root = dir.path().canonicalize().expect("canonical temp dir");
        let (client, server) = tokio::io::duplex(256 * 1024);
        russh_sftp::server::run(server, LocalSftpServer::new(root)).await;

        let session = SftpSession::connect(client, config)
            .await
            .expect("session opens");
        Self { dir, session }
    }

    /// Local path behind a remote absolute path.
    pub fn local(&self, remote: &str) -> PathBuf {
        self.dir.path().join(remote.trim_start_matches('/'))
    }
}
