use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use bytes::{BufMut, BytesMut};

use super::wire::{WireReader, put_string};
use crate::config::TextEncoding;
use crate::error::{Result, SftpError};

/// Wire tag of every message in protocol versions 0 through 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Init = 1,
    Version = 2,
    Open = 3,
    Close = 4,
    Read = 5,
    Write = 6,
    LStat = 7,
    FStat = 8,
    SetStat = 9,
    FSetStat = 10,
    OpenDir = 11,
    ReadDir = 12,
    Remove = 13,
    MkDir = 14,
    RmDir = 15,
    RealPath = 16,
    Stat = 17,
    Rename = 18,
    ReadLink = 19,
    SymLink = 20,
    Status = 101,
    Handle = 102,
    Data = 103,
    Name = 104,
    Attrs = 105,
    Extended = 200,
    ExtendedReply = 201,
}

impl MessageType {
    /// Lowest protocol version that defines this message.
    pub fn min_version(self) -> u32 {
        match self {
            MessageType::Rename => 2,
            MessageType::ReadLink | MessageType::SymLink => 3,
            MessageType::Extended | MessageType::ExtendedReply => 3,
            _ => 0,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = SftpError;

    fn try_from(tag: u8) -> Result<Self> {
        use MessageType::*;
        Ok(match tag {
            1 => Init,
            2 => Version,
            3 => Open,
            4 => Close,
            5 => Read,
            6 => Write,
            7 => LStat,
            8 => FStat,
            9 => SetStat,
            10 => FSetStat,
            11 => OpenDir,
            12 => ReadDir,
            13 => Remove,
            14 => MkDir,
            15 => RmDir,
            16 => RealPath,
            17 => Stat,
            18 => Rename,
            19 => ReadLink,
            20 => SymLink,
            101 => Status,
            102 => Handle,
            103 => Data,
            104 => Name,
            105 => Attrs,
            200 => Extended,
            201 => ExtendedReply,
            other => {
                return Err(SftpError::Protocol(format!(
                    "unknown message type {other}"
                )));
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Eof,
    NoSuchFile,
    PermissionDenied,
    Failure,
    BadMessage,
    NoConnection,
    ConnectionLost,
    OpUnsupported,
    /// Codes defined by later protocol versions.
    Other(u32),
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            4 => StatusCode::Failure,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            other => StatusCode::Other(other),
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Ok => 0,
            StatusCode::Eof => 1,
            StatusCode::NoSuchFile => 2,
            StatusCode::PermissionDenied => 3,
            StatusCode::Failure => 4,
            StatusCode::BadMessage => 5,
            StatusCode::NoConnection => 6,
            StatusCode::ConnectionLost => 7,
            StatusCode::OpUnsupported => 8,
            StatusCode::Other(code) => code,
        }
    }
}

/// `pflags` of an OPEN request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(0x01);
    pub const WRITE: OpenFlags = OpenFlags(0x02);
    pub const APPEND: OpenFlags = OpenFlags(0x04);
    pub const CREATE: OpenFlags = OpenFlags(0x08);
    pub const TRUNCATE: OpenFlags = OpenFlags(0x10);
    pub const EXCLUSIVE: OpenFlags = OpenFlags(0x20);

    pub const fn from_bits(bits: u32) -> Self {
        OpenFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for OpenFlags {
    fn bitor_assign(&mut self, rhs: OpenFlags) {
        self.0 |= rhs.0;
    }
}

/// Opaque server-issued identifier of an open file or directory.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub Vec<u8>);

impl Handle {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({self})")
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

const ATTR_SIZE: u32 = 0x0000_0001;
const ATTR_UIDGID: u32 = 0x0000_0002;
const ATTR_PERMISSIONS: u32 = 0x0000_0004;
const ATTR_ACMODTIME: u32 = 0x0000_0008;
const ATTR_EXTENDED: u32 = 0x8000_0000;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// Access and modification time, seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub atime: u32,
    pub mtime: u32,
}

/// Sparse attribute set: only present fields travel on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: Option<u64>,
    pub owner: Option<Ownership>,
    pub permissions: Option<u32>,
    pub times: Option<FileTimes>,
    pub extended: Vec<(String, String)>,
}

impl FileAttributes {
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some(Ownership { uid, gid });
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_times(mut self, atime: u32, mtime: u32) -> Self {
        self.times = Some(FileTimes { atime, mtime });
        self
    }

    fn file_type(&self) -> Option<u32> {
        self.permissions.map(|mode| mode & S_IFMT)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(S_IFDIR)
    }

    pub fn is_regular_file(&self) -> bool {
        self.file_type() == Some(S_IFREG)
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(S_IFLNK)
    }

    fn presence_flags(&self) -> u32 {
        let mut flags = 0;
        if self.size.is_some() {
            flags |= ATTR_SIZE;
        }
        if self.owner.is_some() {
            flags |= ATTR_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= ATTR_PERMISSIONS;
        }
        if self.times.is_some() {
            flags |= ATTR_ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= ATTR_EXTENDED;
        }
        flags
    }

    pub fn encode(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        buf.put_u32(self.presence_flags());
        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let Some(owner) = self.owner {
            buf.put_u32(owner.uid);
            buf.put_u32(owner.gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let Some(times) = self.times {
            buf.put_u32(times.atime);
            buf.put_u32(times.mtime);
        }
        if !self.extended.is_empty() {
            buf.put_u32(self.extended.len() as u32);
            for (name, value) in &self.extended {
                put_string(buf, name, encoding);
                put_string(buf, value, encoding);
            }
        }
    }

    pub fn decode(reader: &mut WireReader<'_>, encoding: TextEncoding) -> Result<Self> {
        let flags = reader.read_u32()?;
        let mut attrs = FileAttributes::default();
        if flags & ATTR_SIZE != 0 {
            attrs.size = Some(reader.read_u64()?);
        }
        if flags & ATTR_UIDGID != 0 {
            let uid = reader.read_u32()?;
            let gid = reader.read_u32()?;
            attrs.owner = Some(Ownership { uid, gid });
        }
        if flags & ATTR_PERMISSIONS != 0 {
            attrs.permissions = Some(reader.read_u32()?);
        }
        if flags & ATTR_ACMODTIME != 0 {
            let atime = reader.read_u32()?;
            let mtime = reader.read_u32()?;
            attrs.times = Some(FileTimes { atime, mtime });
        }
        if flags & ATTR_EXTENDED != 0 {
            let count = reader.read_u32()?;
            for _ in 0..count {
                let name = reader.read_string(encoding)?;
                let value = reader.read_string(encoding)?;
                attrs.extended.push((name, value));
            }
        }
        Ok(attrs)
    }
}

/// One entry of a NAME reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEntry {
    pub filename: String,
    pub longname: String,
    pub attrs: FileAttributes,
}

impl NameEntry {
    pub fn encode(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        put_string(buf, &self.filename, encoding);
        put_string(buf, &self.longname, encoding);
        self.attrs.encode(buf, encoding);
    }

    pub fn decode(reader: &mut WireReader<'_>, encoding: TextEncoding) -> Result<Self> {
        Ok(NameEntry {
            filename: reader.read_string(encoding)?,
            longname: reader.read_string(encoding)?,
            attrs: FileAttributes::decode(reader, encoding)?,
        })
    }
}

/// Reply payload of the `statvfs@openssh.com` family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u64,
    pub fragment_size: u64,
    pub blocks: u64,
    pub free_blocks: u64,
    pub available_blocks: u64,
    pub files: u64,
    pub free_files: u64,
    pub available_files: u64,
    pub fs_id: u64,
    pub flags: u64,
    pub max_name_len: u64,
}

const ST_RDONLY: u64 = 0x1;
const ST_NOSUID: u64 = 0x2;

impl FsStats {
    pub fn total_space(&self) -> u64 {
        self.blocks.saturating_mul(self.fragment_size)
    }

    pub fn free_space(&self) -> u64 {
        self.free_blocks.saturating_mul(self.fragment_size)
    }

    pub fn available_space(&self) -> u64 {
        self.available_blocks.saturating_mul(self.fragment_size)
    }

    pub fn is_read_only(&self) -> bool {
        self.flags & ST_RDONLY != 0
    }

    pub fn supports_setuid(&self) -> bool {
        self.flags & ST_NOSUID == 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        for value in [
            self.block_size,
            self.fragment_size,
            self.blocks,
            self.free_blocks,
            self.available_blocks,
            self.files,
            self.free_files,
            self.available_files,
            self.fs_id,
            self.flags,
            self.max_name_len,
        ] {
            buf.put_u64(value);
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(data);
        Ok(FsStats {
            block_size: reader.read_u64()?,
            fragment_size: reader.read_u64()?,
            blocks: reader.read_u64()?,
            free_blocks: reader.read_u64()?,
            available_blocks: reader.read_u64()?,
            files: reader.read_u64()?,
            free_files: reader.read_u64()?,
            available_files: reader.read_u64()?,
            fs_id: reader.read_u64()?,
            flags: reader.read_u64()?,
            max_name_len: reader.read_u64()?,
        })
    }
}
