use std::borrow::Cow;
use std::time::Duration;

/// Default time to wait for any single reply.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default chunk size for reads and writes, same as openssh-portable.
pub const DEFAULT_CHUNK_SIZE: u32 = 32768;

/// Largest READ length or WRITE payload sent, the OpenSSH server limit.
pub const MAX_CHUNK_SIZE: u32 = 255 * 1024;

/// How protocol strings (paths, messages, long names) map to bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextEncoding {
    /// Invalid sequences are replaced when decoding.
    #[default]
    Utf8,
    /// One byte per character; characters above U+00FF encode as `?`.
    Latin1,
}

impl TextEncoding {
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        match self {
            TextEncoding::Utf8 => Cow::Borrowed(text.as_bytes()),
            TextEncoding::Latin1 => Cow::Owned(
                text.chars()
                    .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                    .collect(),
            ),
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub operation_timeout: Duration,
    pub encoding: TextEncoding,
    /// Largest read requested per READ in downloads.
    pub max_read_chunk: u32,
    /// Largest payload sent per WRITE in uploads.
    pub max_write_chunk: u32,
    /// Servers answering with an older protocol version are refused.
    pub min_protocol_version: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            encoding: TextEncoding::Utf8,
            max_read_chunk: DEFAULT_CHUNK_SIZE,
            max_write_chunk: DEFAULT_CHUNK_SIZE,
            min_protocol_version: 0,
        }
    }
}

impl SessionConfig {
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_min_protocol_version(mut self, version: u32) -> Self {
        self.min_protocol_version = version;
        self
    }

    /// Sets both the read and the write chunk size, kept within
    /// `1..=MAX_CHUNK_SIZE`.
    pub fn with_chunk_size(mut self, size: u32) -> Self {
        self.max_read_chunk = size.clamp(1, MAX_CHUNK_SIZE);
        self.max_write_chunk = size.clamp(1, MAX_CHUNK_SIZE);
        self
    }

    pub(crate) fn read_chunk(&self) -> u32 {
        self.max_read_chunk.clamp(1, MAX_CHUNK_SIZE)
    }

    pub(crate) fn write_chunk(&self) -> u32 {
        self.max_write_chunk.clamp(1, MAX_CHUNK_SIZE)
    }
}
