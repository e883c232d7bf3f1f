//! WebSocket transport seam.
//!
//! The WebSocket imports never open sockets themselves. They drive a
//! [`WebSocketTransport`], and the event loop polls it for open, message,
//! error, and close events to dispatch to the sandbox's handlers.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::error::HostError;

/// Close code reported when a close frame carried none.
pub const CLOSE_NO_STATUS: u16 = 1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u32);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Open(SocketId),
    Message(SocketId, Vec<u8>),
    Error(SocketId, String),
    Close {
        id: SocketId,
        code: u16,
        reason: String,
    },
}

impl SocketEvent {
    pub fn socket(&self) -> SocketId {
        match self {
            Self::Open(id) | Self::Message(id, _) | Self::Error(id, _) => *id,
            Self::Close { id, .. } => *id,
        }
    }
}

pub trait WebSocketTransport {
    /// Start connecting. Completion is reported later as [`SocketEvent::Open`].
    fn connect(&mut self, url: &str) -> Result<SocketId, HostError>;

    /// Send one binary frame.
    fn send(&mut self, id: SocketId, data: &[u8]) -> Result<(), HostError>;

    /// Begin the closing handshake.
    fn close(&mut self, id: SocketId, code: Option<u16>, reason: Option<&str>)
        -> Result<(), HostError>;

    /// Drain events that arrived since the last poll.
    fn poll(&mut self) -> Vec<SocketEvent>;
}

/// Transport for hosts without network access. Every connect fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTransport;

impl WebSocketTransport for DisabledTransport {
    fn connect(&mut self, url: &str) -> Result<SocketId, HostError> {
        Err(HostError::transport(format!(
            "websocket transport not configured (url: {})",
            url
        )))
    }

    fn send(&mut self, id: SocketId, _data: &[u8]) -> Result<(), HostError> {
        Err(HostError::transport(format!("{} is not open", id)))
    }

    fn close(
        &mut self,
        _id: SocketId,
        _code: Option<u16>,
        _reason: Option<&str>,
    ) -> Result<(), HostError> {
        Ok(())
    }

    fn poll(&mut self) -> Vec<SocketEvent> {
        Vec::new()
    }
}

// ── In-memory ──

#[derive(Debug, Default)]
struct MemConnection {
    url: String,
    sent: Vec<Vec<u8>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct MemInner {
    next_id: u32,
    connections: BTreeMap<SocketId, MemConnection>,
    pending: VecDeque<SocketEvent>,
}

/// Loopback transport for tests.
///
/// Connections open on the next poll. Frames the sandbox sends are recorded;
/// frames it receives are injected with [`MemTransport::deliver`].
#[derive(Debug, Clone, Default)]
pub struct MemTransport {
    inner: Rc<RefCell<MemInner>>,
}

impl MemTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an incoming binary message.
    pub fn deliver(&self, id: SocketId, data: impl Into<Vec<u8>>) {
        self.push_event(SocketEvent::Message(id, data.into()));
    }

    /// Queue an arbitrary event.
    pub fn push_event(&self, event: SocketEvent) {
        self.inner.borrow_mut().pending.push_back(event);
    }

    /// Frames sent on a connection, in order.
    pub fn sent(&self, id: SocketId) -> Vec<Vec<u8>> {
        self.inner
            .borrow()
            .connections
            .get(&id)
            .map(|c| c.sent.clone())
            .unwrap_or_default()
    }

    pub fn url(&self, id: SocketId) -> Option<String> {
        self.inner.borrow().connections.get(&id).map(|c| c.url.clone())
    }

    pub fn is_closed(&self, id: SocketId) -> bool {
        self.inner
            .borrow()
            .connections
            .get(&id)
            .map(|c| c.closed)
            .unwrap_or(true)
    }

    pub fn connections(&self) -> Vec<SocketId> {
        self.inner.borrow().connections.keys().copied().collect()
    }
}

impl WebSocketTransport for MemTransport {
    fn connect(&mut self, url: &str) -> Result<SocketId, HostError> {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = SocketId(inner.next_id);
        inner.connections.insert(
            id,
            MemConnection {
                url: url.to_string(),
                ..MemConnection::default()
            },
        );
        inner.pending.push_back(SocketEvent::Open(id));
        Ok(id)
    }

    fn send(&mut self, id: SocketId, data: &[u8]) -> Result<(), HostError> {
        let mut inner = self.inner.borrow_mut();
        match inner.connections.get_mut(&id) {
            Some(conn) if !conn.closed => {
                conn.sent.push(data.to_vec());
                Ok(())
            }
            _ => Err(HostError::transport(format!("{} is not open", id))),
        }
    }

    fn close(
        &mut self,
        id: SocketId,
        code: Option<u16>,
        reason: Option<&str>,
    ) -> Result<(), HostError> {
        let mut inner = self.inner.borrow_mut();
        let conn = inner
            .connections
            .get_mut(&id)
            .ok_or_else(|| HostError::transport(format!("unknown {}", id)))?;
        if conn.closed {
            return Ok(());
        }
        conn.closed = true;
        inner.pending.push_back(SocketEvent::Close {
            id,
            code: code.unwrap_or(CLOSE_NO_STATUS),
            reason: reason.unwrap_or_default().to_string(),
        });
        Ok(())
    }

    fn poll(&mut self) -> Vec<SocketEvent> {
        self.inner.borrow_mut().pending.drain(..).collect()
    }
}
