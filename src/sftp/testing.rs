//! In-memory scripted peer for exercising the client session.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use super::codec::{FrameCodec, encode_frame};
use super::message::{
    ClientPacket, Init, Operation, Request, Response, ResponseBody, ServerPacket, Version,
    WireMessage,
};
use super::session::SftpSession;
use super::types::{FileAttributes, NameEntry};
use crate::config::{SessionConfig, TextEncoding};

pub(crate) struct ScriptedServer {
    stream: DuplexStream,
    codec: FrameCodec,
    frames: VecDeque<Bytes>,
    encoding: TextEncoding,
}

/// Client end and scripted server end of one in-memory channel.
pub(crate) fn pair() -> (DuplexStream, ScriptedServer) {
    pair_with_capacity(1 << 20)
}

/// Like [`pair`], but the pipe buffers at most `capacity` bytes each way.
pub(crate) fn pair_with_capacity(capacity: usize) -> (DuplexStream, ScriptedServer) {
    let (client, server) = tokio::io::duplex(capacity);
    (
        client,
        ScriptedServer {
            stream: server,
            codec: FrameCodec::new(),
            frames: VecDeque::new(),
            encoding: TextEncoding::Utf8,
        },
    )
}

/// Opens a session against a scripted server that answers the handshake.
pub(crate) async fn connect(
    version: u32,
    extensions: &[(&str, &str)],
    cwd: &str,
    config: SessionConfig,
) -> (SftpSession, ScriptedServer) {
    connect_over(pair(), version, extensions, cwd, config).await
}

pub(crate) async fn connect_over(
    (client, mut server): (DuplexStream, ScriptedServer),
    version: u32,
    extensions: &[(&str, &str)],
    cwd: &str,
    config: SessionConfig,
) -> (SftpSession, ScriptedServer) {
    let (session, ()) = tokio::join!(SftpSession::connect(client, config), async {
        server.expect_init().await;
        server.send_version(version, extensions).await;
        server.answer_realpath(cwd).await;
    });
    (session.expect("handshake succeeds"), server)
}

impl ScriptedServer {
    /// Next packet from the client, or `None` once it hangs up.
    pub(crate) async fn recv(&mut self) -> Option<ClientPacket> {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                return Some(
                    ClientPacket::from_payload(&frame, self.encoding)
                        .expect("client sent a decodable packet"),
                );
            }
            let mut buf = [0u8; 8192];
            let n = self.stream.read(&mut buf).await.expect("read from client");
            if n == 0 {
                return None;
            }
            let frames = self.codec.push(&buf[..n]).expect("client framing is valid");
            self.frames.extend(frames);
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `wait`.
    pub(crate) async fn recv_within(&mut self, wait: Duration) -> Option<ClientPacket> {
        tokio::time::timeout(wait, self.recv()).await.ok().flatten()
    }

    pub(crate) async fn expect_init(&mut self) -> Init {
        match self.recv().await {
            Some(ClientPacket::Init(init)) => init,
            other => panic!("expected INIT, got {other:?}"),
        }
    }

    pub(crate) async fn recv_request(&mut self) -> Request {
        match self.recv().await {
            Some(ClientPacket::Request(request)) => request,
            other => panic!("expected a request, got {other:?}"),
        }
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write to client");
    }

    async fn send_packet(&mut self, packet: &ServerPacket) {
        let frame = encode_frame(&packet.to_payload(self.encoding));
        self.send_raw(&frame).await;
    }

    pub(crate) async fn send_version(&mut self, version: u32, extensions: &[(&str, &str)]) {
        let version = Version {
            version,
            extensions: extensions
                .iter()
                .map(|(name, data)| (name.to_string(), data.to_string()))
                .collect(),
        };
        self.send_packet(&ServerPacket::Version(version)).await;
    }

    pub(crate) async fn send_response(&mut self, response: &Response) {
        self.send_packet(&ServerPacket::Response(response.clone()))
            .await;
    }

    pub(crate) async fn reply(&mut self, id: u32, body: ResponseBody) {
        self.send_response(&Response { id, body }).await;
    }

    /// Expects a REALPATH and answers it with `path`.
    pub(crate) async fn answer_realpath(&mut self, path: &str) {
        let request = self.recv_request().await;
        assert!(
            matches!(request.op, Operation::RealPath { .. }),
            "expected REALPATH, got {:?}",
            request.op
        );
        let entry = NameEntry {
            filename: path.to_string(),
            longname: path.to_string(),
            attrs: FileAttributes::default(),
        };
        self.reply(request.id, ResponseBody::Name(vec![entry])).await;
    }

    /// Closes the server's write side; the client reads end of stream.
    pub(crate) async fn hang_up(&mut self) {
        self.stream.shutdown().await.expect("shutdown");
    }
}
