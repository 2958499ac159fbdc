//! Pending-request table.
//!
//! Every outstanding request owns a oneshot channel keyed by its request id.
//! The receive path resolves entries purely by id, so replies may arrive in
//! any order. Insert and remove happen under one mutex which is never held
//! across an await.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::oneshot;

use super::message::{Operation, ReplyKind, Response};
use super::types::MessageType;
use crate::error::{Result, SftpError};

type Reply = Result<Response>;

/// Why the table stopped accepting requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    Closed,
    Faulted(String),
    Transport(io::ErrorKind, String),
}

impl CancelReason {
    pub fn to_error(&self) -> SftpError {
        match self {
            CancelReason::Closed => SftpError::SessionClosed,
            CancelReason::Faulted(reason) => SftpError::SessionFaulted(reason.clone()),
            CancelReason::Transport(kind, message) => {
                SftpError::Transport(io::Error::new(*kind, message.clone()))
            }
        }
    }
}

struct PendingEntry {
    op: MessageType,
    expects: ReplyKind,
    reply: oneshot::Sender<Reply>,
}

struct Table {
    next_id: u32,
    entries: HashMap<u32, PendingEntry>,
    cancelled: Option<CancelReason>,
}

pub struct Correlator {
    table: Mutex<Table>,
}

/// Caller side of one registered request.
#[derive(Debug)]
pub struct PendingReply {
    id: u32,
    op: MessageType,
    reply: oneshot::Receiver<Reply>,
}

impl PendingReply {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Waits for the reply. On timeout the table entry stays registered; a
    /// late reply is still matched and then dropped.
    pub async fn wait(self, timeout: Duration) -> Result<Response> {
        match tokio::time::timeout(timeout, self.reply).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(SftpError::SessionClosed),
            Err(_) => {
                warn!(
                    "request {} ({:?}) got no reply within {:?}",
                    self.id, self.op, timeout
                );
                Err(SftpError::Timeout(timeout))
            }
        }
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// The first id handed out is `last + 1`, wrapping.
    pub fn starting_after(last: u32) -> Self {
        Self {
            table: Mutex::new(Table {
                next_id: last,
                entries: HashMap::new(),
                cancelled: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // the table holds no invariants a panicking holder could break
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Assigns the next free request id and records the caller's slot.
    pub fn register(&self, op: &Operation) -> Result<PendingReply> {
        let mut table = self.lock();
        if let Some(reason) = &table.cancelled {
            return Err(reason.to_error());
        }

        let mut id = table.next_id.wrapping_add(1);
        while table.entries.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        table.next_id = id;

        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingEntry {
                op: op.message_type(),
                expects: op.reply_kind(),
                reply: tx,
            },
        );
        debug!("registered request {} ({:?})", id, op.message_type());

        Ok(PendingReply {
            id,
            op: op.message_type(),
            reply: rx,
        })
    }

    /// Hands a response to the caller that registered its id.
    ///
    /// An unknown id, or a reply of the wrong shape, is a protocol violation.
    pub fn resolve(&self, response: Response) -> Result<()> {
        let id = response.id;
        let entry = self.lock().entries.remove(&id);
        let Some(entry) = entry else {
            return Err(SftpError::Protocol(format!(
                "response for unknown request id {id}"
            )));
        };

        let kind = response.body.kind();
        if kind != ReplyKind::Status && kind != entry.expects {
            let message = format!(
                "request {id} ({:?}) expected {:?} reply, got {:?}",
                entry.op, entry.expects, kind
            );
            let _ = entry.reply.send(Err(SftpError::Protocol(message.clone())));
            return Err(SftpError::Protocol(message));
        }

        debug!("resolved request {} ({:?}) with {:?}", id, entry.op, kind);
        if entry.reply.send(Ok(response)).is_err() {
            warn!(
                "discarding late reply to request {} ({:?})",
                id, entry.op
            );
        }
        Ok(())
    }

    /// Fails every outstanding caller and refuses new registrations.
    /// Returns how many callers were failed.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut table = self.lock();
            if table.cancelled.is_none() {
                table.cancelled = Some(reason.clone());
            }
            table.entries.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.reply.send(Err(reason.to_error()));
        }
        if count > 0 {
            debug!("cancelled {count} outstanding requests: {reason:?}");
        }
        count
    }

    /// Set once the table has been cancelled.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.lock().cancelled.clone()
    }

    pub fn outstanding(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.lock().entries.contains_key(&id)
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}
