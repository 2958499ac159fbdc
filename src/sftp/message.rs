//! Typed messages and their exact byte layouts.
//!
//! A payload is the frame minus its length prefix: a one byte
//! [`MessageType`] followed by the type-specific body. Requests and
//! responses carry a `u32` request id right after the tag; INIT and
//! VERSION do not.

use bytes::{BufMut, Bytes, BytesMut};
use log::debug;

use super::types::{FileAttributes, Handle, MessageType, NameEntry, OpenFlags, StatusCode};
use super::wire::{WireReader, put_binary, put_string};
use crate::config::TextEncoding;
use crate::error::{Result, SftpError};

pub const POSIX_RENAME: &str = "posix-rename@openssh.com";
pub const STATVFS: &str = "statvfs@openssh.com";
pub const FSTATVFS: &str = "fstatvfs@openssh.com";
pub const HARDLINK: &str = "hardlink@openssh.com";

/// Encode/decode contract shared by every message family.
pub trait WireMessage: Sized {
    fn message_type(&self) -> MessageType;

    /// Writes everything after the tag byte.
    fn encode_body(&self, buf: &mut BytesMut, encoding: TextEncoding);

    /// Reads everything after the tag byte.
    fn decode_body(tag: MessageType, reader: &mut WireReader<'_>, encoding: TextEncoding)
    -> Result<Self>;

    fn to_payload(&self, encoding: TextEncoding) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(self.message_type() as u8);
        self.encode_body(&mut buf, encoding);
        buf.freeze()
    }

    fn from_payload(payload: &[u8], encoding: TextEncoding) -> Result<Self> {
        let mut reader = WireReader::new(payload);
        let tag = MessageType::try_from(reader.read_u8()?)?;
        let message = Self::decode_body(tag, &mut reader, encoding)?;
        if !reader.is_empty() {
            debug!(
                "ignoring {} trailing bytes after {:?}",
                reader.remaining(),
                tag
            );
        }
        Ok(message)
    }
}

fn read_handle(reader: &mut WireReader<'_>) -> Result<Handle> {
    reader.read_binary().map(Handle)
}

fn unexpected(tag: MessageType, family: &str) -> SftpError {
    SftpError::Protocol(format!("unexpected {tag:?} message, expected {family}"))
}

fn decode_pairs(
    reader: &mut WireReader<'_>,
    encoding: TextEncoding,
) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    while !reader.is_empty() {
        let name = reader.read_string(encoding)?;
        let data = reader.read_string(encoding)?;
        pairs.push((name, data));
    }
    Ok(pairs)
}

fn encode_pairs(buf: &mut BytesMut, pairs: &[(String, String)], encoding: TextEncoding) {
    for (name, data) in pairs {
        put_string(buf, name, encoding);
        put_string(buf, data, encoding);
    }
}

/// SSH_FXP_INIT, sent once by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Init {
    pub version: u32,
    pub extensions: Vec<(String, String)>,
}

impl WireMessage for Init {
    fn message_type(&self) -> MessageType {
        MessageType::Init
    }

    fn encode_body(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        buf.put_u32(self.version);
        encode_pairs(buf, &self.extensions, encoding);
    }

    fn decode_body(
        tag: MessageType,
        reader: &mut WireReader<'_>,
        encoding: TextEncoding,
    ) -> Result<Self> {
        if tag != MessageType::Init {
            return Err(unexpected(tag, "INIT"));
        }
        Ok(Init {
            version: reader.read_u32()?,
            extensions: decode_pairs(reader, encoding)?,
        })
    }
}

/// SSH_FXP_VERSION: the server's version and its extension table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub version: u32,
    pub extensions: Vec<(String, String)>,
}

impl WireMessage for Version {
    fn message_type(&self) -> MessageType {
        MessageType::Version
    }

    fn encode_body(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        buf.put_u32(self.version);
        encode_pairs(buf, &self.extensions, encoding);
    }

    fn decode_body(
        tag: MessageType,
        reader: &mut WireReader<'_>,
        encoding: TextEncoding,
    ) -> Result<Self> {
        if tag != MessageType::Version {
            return Err(unexpected(tag, "VERSION"));
        }
        Ok(Version {
            version: reader.read_u32()?,
            extensions: decode_pairs(reader, encoding)?,
        })
    }
}

/// Named operations carried inside SSH_FXP_EXTENDED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtendedRequest {
    PosixRename { old_path: String, new_path: String },
    StatVfs { path: String },
    FStatVfs { handle: Handle },
    HardLink { old_path: String, new_path: String },
}

impl ExtendedRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ExtendedRequest::PosixRename { .. } => POSIX_RENAME,
            ExtendedRequest::StatVfs { .. } => STATVFS,
            ExtendedRequest::FStatVfs { .. } => FSTATVFS,
            ExtendedRequest::HardLink { .. } => HARDLINK,
        }
    }

    fn encode(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        put_string(buf, self.name(), encoding);
        match self {
            ExtendedRequest::PosixRename { old_path, new_path }
            | ExtendedRequest::HardLink { old_path, new_path } => {
                put_string(buf, old_path, encoding);
                put_string(buf, new_path, encoding);
            }
            ExtendedRequest::StatVfs { path } => put_string(buf, path, encoding),
            ExtendedRequest::FStatVfs { handle } => put_binary(buf, handle.as_bytes()),
        }
    }

    fn decode(reader: &mut WireReader<'_>, encoding: TextEncoding) -> Result<Self> {
        let name = reader.read_string(encoding)?;
        Ok(match name.as_str() {
            POSIX_RENAME => ExtendedRequest::PosixRename {
                old_path: reader.read_string(encoding)?,
                new_path: reader.read_string(encoding)?,
            },
            HARDLINK => ExtendedRequest::HardLink {
                old_path: reader.read_string(encoding)?,
                new_path: reader.read_string(encoding)?,
            },
            STATVFS => ExtendedRequest::StatVfs {
                path: reader.read_string(encoding)?,
            },
            FSTATVFS => ExtendedRequest::FStatVfs {
                handle: Handle(reader.read_binary()?),
            },
            other => {
                return Err(SftpError::Protocol(format!(
                    "unknown extended request {other}"
                )));
            }
        })
    }
}

/// Shape of a successful reply. A STATUS is acceptable for any request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Status,
    Handle,
    Data,
    Name,
    Attrs,
    ExtendedReply,
}

/// One protocol operation and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Open {
        path: String,
        flags: OpenFlags,
        attrs: FileAttributes,
    },
    Close {
        handle: Handle,
    },
    Read {
        handle: Handle,
        offset: u64,
        len: u32,
    },
    Write {
        handle: Handle,
        offset: u64,
        data: Vec<u8>,
    },
    LStat {
        path: String,
    },
    FStat {
        handle: Handle,
    },
    SetStat {
        path: String,
        attrs: FileAttributes,
    },
    FSetStat {
        handle: Handle,
        attrs: FileAttributes,
    },
    OpenDir {
        path: String,
    },
    ReadDir {
        handle: Handle,
    },
    Remove {
        path: String,
    },
    MkDir {
        path: String,
        attrs: FileAttributes,
    },
    RmDir {
        path: String,
    },
    RealPath {
        path: String,
    },
    Stat {
        path: String,
    },
    Rename {
        old_path: String,
        new_path: String,
    },
    ReadLink {
        path: String,
    },
    SymLink {
        link_path: String,
        target_path: String,
    },
    Extended(ExtendedRequest),
}

impl Operation {
    pub fn message_type(&self) -> MessageType {
        match self {
            Operation::Open { .. } => MessageType::Open,
            Operation::Close { .. } => MessageType::Close,
            Operation::Read { .. } => MessageType::Read,
            Operation::Write { .. } => MessageType::Write,
            Operation::LStat { .. } => MessageType::LStat,
            Operation::FStat { .. } => MessageType::FStat,
            Operation::SetStat { .. } => MessageType::SetStat,
            Operation::FSetStat { .. } => MessageType::FSetStat,
            Operation::OpenDir { .. } => MessageType::OpenDir,
            Operation::ReadDir { .. } => MessageType::ReadDir,
            Operation::Remove { .. } => MessageType::Remove,
            Operation::MkDir { .. } => MessageType::MkDir,
            Operation::RmDir { .. } => MessageType::RmDir,
            Operation::RealPath { .. } => MessageType::RealPath,
            Operation::Stat { .. } => MessageType::Stat,
            Operation::Rename { .. } => MessageType::Rename,
            Operation::ReadLink { .. } => MessageType::ReadLink,
            Operation::SymLink { .. } => MessageType::SymLink,
            Operation::Extended(_) => MessageType::Extended,
        }
    }

    /// Name the server must have advertised for this operation to be sent.
    pub fn extension_name(&self) -> Option<&'static str> {
        match self {
            Operation::Extended(ext) => Some(ext.name()),
            _ => None,
        }
    }

    /// What a successful reply to this operation looks like.
    pub fn reply_kind(&self) -> ReplyKind {
        match self {
            Operation::Open { .. } | Operation::OpenDir { .. } => ReplyKind::Handle,
            Operation::Read { .. } => ReplyKind::Data,
            Operation::LStat { .. } | Operation::FStat { .. } | Operation::Stat { .. } => {
                ReplyKind::Attrs
            }
            Operation::ReadDir { .. } | Operation::RealPath { .. } | Operation::ReadLink { .. } => {
                ReplyKind::Name
            }
            Operation::Extended(ExtendedRequest::StatVfs { .. })
            | Operation::Extended(ExtendedRequest::FStatVfs { .. }) => ReplyKind::ExtendedReply,
            _ => ReplyKind::Status,
        }
    }

    fn encode(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        match self {
            Operation::Open { path, flags, attrs } => {
                put_string(buf, path, encoding);
                buf.put_u32(flags.bits());
                attrs.encode(buf, encoding);
            }
            Operation::Close { handle }
            | Operation::FStat { handle }
            | Operation::ReadDir { handle } => put_binary(buf, handle.as_bytes()),
            Operation::Read {
                handle,
                offset,
                len,
            } => {
                put_binary(buf, handle.as_bytes());
                buf.put_u64(*offset);
                buf.put_u32(*len);
            }
            Operation::Write {
                handle,
                offset,
                data,
            } => {
                put_binary(buf, handle.as_bytes());
                buf.put_u64(*offset);
                put_binary(buf, data);
            }
            Operation::LStat { path }
            | Operation::OpenDir { path }
            | Operation::Remove { path }
            | Operation::RmDir { path }
            | Operation::RealPath { path }
            | Operation::Stat { path }
            | Operation::ReadLink { path } => put_string(buf, path, encoding),
            Operation::SetStat { path, attrs } | Operation::MkDir { path, attrs } => {
                put_string(buf, path, encoding);
                attrs.encode(buf, encoding);
            }
            Operation::FSetStat { handle, attrs } => {
                put_binary(buf, handle.as_bytes());
                attrs.encode(buf, encoding);
            }
            Operation::Rename { old_path, new_path } => {
                put_string(buf, old_path, encoding);
                put_string(buf, new_path, encoding);
            }
            Operation::SymLink {
                link_path,
                target_path,
            } => {
                put_string(buf, link_path, encoding);
                put_string(buf, target_path, encoding);
            }
            Operation::Extended(ext) => ext.encode(buf, encoding),
        }
    }

    fn decode(
        tag: MessageType,
        reader: &mut WireReader<'_>,
        encoding: TextEncoding,
    ) -> Result<Self> {
        Ok(match tag {
            MessageType::Open => Operation::Open {
                path: reader.read_string(encoding)?,
                flags: OpenFlags::from_bits(reader.read_u32()?),
                attrs: FileAttributes::decode(reader, encoding)?,
            },
            MessageType::Close => Operation::Close {
                handle: read_handle(reader)?,
            },
            MessageType::Read => Operation::Read {
                handle: read_handle(reader)?,
                offset: reader.read_u64()?,
                len: reader.read_u32()?,
            },
            MessageType::Write => Operation::Write {
                handle: read_handle(reader)?,
                offset: reader.read_u64()?,
                data: reader.read_binary()?,
            },
            MessageType::LStat => Operation::LStat {
                path: reader.read_string(encoding)?,
            },
            MessageType::FStat => Operation::FStat {
                handle: read_handle(reader)?,
            },
            MessageType::SetStat => Operation::SetStat {
                path: reader.read_string(encoding)?,
                attrs: FileAttributes::decode(reader, encoding)?,
            },
            MessageType::FSetStat => Operation::FSetStat {
                handle: read_handle(reader)?,
                attrs: FileAttributes::decode(reader, encoding)?,
            },
            MessageType::OpenDir => Operation::OpenDir {
                path: reader.read_string(encoding)?,
            },
            MessageType::ReadDir => Operation::ReadDir {
                handle: read_handle(reader)?,
            },
            MessageType::Remove => Operation::Remove {
                path: reader.read_string(encoding)?,
            },
            MessageType::MkDir => Operation::MkDir {
                path: reader.read_string(encoding)?,
                attrs: FileAttributes::decode(reader, encoding)?,
            },
            MessageType::RmDir => Operation::RmDir {
                path: reader.read_string(encoding)?,
            },
            MessageType::RealPath => Operation::RealPath {
                path: reader.read_string(encoding)?,
            },
            MessageType::Stat => Operation::Stat {
                path: reader.read_string(encoding)?,
            },
            MessageType::Rename => Operation::Rename {
                old_path: reader.read_string(encoding)?,
                new_path: reader.read_string(encoding)?,
            },
            MessageType::ReadLink => Operation::ReadLink {
                path: reader.read_string(encoding)?,
            },
            MessageType::SymLink => Operation::SymLink {
                link_path: reader.read_string(encoding)?,
                target_path: reader.read_string(encoding)?,
            },
            MessageType::Extended => Operation::Extended(ExtendedRequest::decode(reader, encoding)?),
            other => return Err(unexpected(other, "a request")),
        })
    }
}

/// A request: an operation tagged with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u32,
    pub op: Operation,
}

impl WireMessage for Request {
    fn message_type(&self) -> MessageType {
        self.op.message_type()
    }

    fn encode_body(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        buf.put_u32(self.id);
        self.op.encode(buf, encoding);
    }

    fn decode_body(
        tag: MessageType,
        reader: &mut WireReader<'_>,
        encoding: TextEncoding,
    ) -> Result<Self> {
        let id = reader.read_u32()?;
        let op = Operation::decode(tag, reader, encoding)?;
        Ok(Request { id, op })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    pub code: StatusCode,
    pub message: String,
    pub language: String,
}

impl StatusReply {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            language: "en".into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok, "Success")
    }

    /// `Ok(())` for a success code, the mapped error otherwise.
    pub fn into_result(self) -> Result<()> {
        match SftpError::from_status(self.code, &self.message) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Status(StatusReply),
    Handle(Handle),
    Data(Vec<u8>),
    Name(Vec<NameEntry>),
    Attrs(FileAttributes),
    /// Raw extension payload; its layout depends on the request it answers.
    ExtendedReply(Vec<u8>),
}

impl ResponseBody {
    pub fn kind(&self) -> ReplyKind {
        match self {
            ResponseBody::Status(_) => ReplyKind::Status,
            ResponseBody::Handle(_) => ReplyKind::Handle,
            ResponseBody::Data(_) => ReplyKind::Data,
            ResponseBody::Name(_) => ReplyKind::Name,
            ResponseBody::Attrs(_) => ReplyKind::Attrs,
            ResponseBody::ExtendedReply(_) => ReplyKind::ExtendedReply,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u32,
    pub body: ResponseBody,
}

impl Response {
    pub fn status(id: u32, status: StatusReply) -> Self {
        Self {
            id,
            body: ResponseBody::Status(status),
        }
    }
}

impl WireMessage for Response {
    fn message_type(&self) -> MessageType {
        match self.body {
            ResponseBody::Status(_) => MessageType::Status,
            ResponseBody::Handle(_) => MessageType::Handle,
            ResponseBody::Data(_) => MessageType::Data,
            ResponseBody::Name(_) => MessageType::Name,
            ResponseBody::Attrs(_) => MessageType::Attrs,
            ResponseBody::ExtendedReply(_) => MessageType::ExtendedReply,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        buf.put_u32(self.id);
        match &self.body {
            ResponseBody::Status(status) => {
                buf.put_u32(status.code.into());
                put_string(buf, &status.message, encoding);
                put_string(buf, &status.language, encoding);
            }
            ResponseBody::Handle(handle) => put_binary(buf, handle.as_bytes()),
            ResponseBody::Data(data) => put_binary(buf, data),
            ResponseBody::Name(entries) => {
                buf.put_u32(entries.len() as u32);
                for entry in entries {
                    entry.encode(buf, encoding);
                }
            }
            ResponseBody::Attrs(attrs) => attrs.encode(buf, encoding),
            ResponseBody::ExtendedReply(data) => buf.put_slice(data),
        }
    }

    fn decode_body(
        tag: MessageType,
        reader: &mut WireReader<'_>,
        encoding: TextEncoding,
    ) -> Result<Self> {
        let id = reader.read_u32()?;
        let body = match tag {
            MessageType::Status => {
                let code = StatusCode::from(reader.read_u32()?);
                // versions before 3 stop after the code
                let message = if reader.is_empty() {
                    String::new()
                } else {
                    reader.read_string(encoding)?
                };
                let language = if reader.is_empty() {
                    String::new()
                } else {
                    reader.read_string(encoding)?
                };
                ResponseBody::Status(StatusReply {
                    code,
                    message,
                    language,
                })
            }
            MessageType::Handle => ResponseBody::Handle(Handle(reader.read_binary()?)),
            MessageType::Data => ResponseBody::Data(reader.read_binary()?),
            MessageType::Name => {
                let count = reader.read_u32()?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    entries.push(NameEntry::decode(reader, encoding)?);
                }
                ResponseBody::Name(entries)
            }
            MessageType::Attrs => ResponseBody::Attrs(FileAttributes::decode(reader, encoding)?),
            MessageType::ExtendedReply => ResponseBody::ExtendedReply(reader.read_rest().to_vec()),
            other => return Err(unexpected(other, "a response")),
        };
        Ok(Response { id, body })
    }
}

/// Anything a server may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    Version(Version),
    Response(Response),
}

impl WireMessage for ServerPacket {
    fn message_type(&self) -> MessageType {
        match self {
            ServerPacket::Version(version) => version.message_type(),
            ServerPacket::Response(response) => response.message_type(),
        }
    }

    fn encode_body(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        match self {
            ServerPacket::Version(version) => version.encode_body(buf, encoding),
            ServerPacket::Response(response) => response.encode_body(buf, encoding),
        }
    }

    fn decode_body(
        tag: MessageType,
        reader: &mut WireReader<'_>,
        encoding: TextEncoding,
    ) -> Result<Self> {
        match tag {
            MessageType::Version => Version::decode_body(tag, reader, encoding).map(Self::Version),
            _ => Response::decode_body(tag, reader, encoding).map(Self::Response),
        }
    }
}

/// Anything a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    Init(Init),
    Request(Request),
}

impl WireMessage for ClientPacket {
    fn message_type(&self) -> MessageType {
        match self {
            ClientPacket::Init(init) => init.message_type(),
            ClientPacket::Request(request) => request.message_type(),
        }
    }

    fn encode_body(&self, buf: &mut BytesMut, encoding: TextEncoding) {
        match self {
            ClientPacket::Init(init) => init.encode_body(buf, encoding),
            ClientPacket::Request(request) => request.encode_body(buf, encoding),
        }
    }

    fn decode_body(
        tag: MessageType,
        reader: &mut WireReader<'_>,
        encoding: TextEncoding,
    ) -> Result<Self> {
        match tag {
            MessageType::Init => Init::decode_body(tag, reader, encoding).map(Self::Init),
            _ => Request::decode_body(tag, reader, encoding).map(Self::Request),
        }
    }
}
