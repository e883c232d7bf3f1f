//! WebSocket objects handed to the sandbox.
//!
//! Each object fronts one connection on the bridge's [`WebSocketTransport`]
//! and carries the four `on*` handler slots. Transport events are turned
//! into event objects and dispatched from the event loop.
//!
//! [`WebSocketTransport`]: lightbridge_hostapi::WebSocketTransport

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use lightbridge_hostapi::{SocketEvent, SocketId};

use crate::error::SandboxError;
use crate::event_loop::call_detached;
use crate::state::Cx;
use crate::value::HostValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReadyState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerSlot {
    Open,
    Message,
    Error,
    Close,
}

#[derive(Default)]
struct Handlers {
    on_open: Option<HostValue>,
    on_message: Option<HostValue>,
    on_error: Option<HostValue>,
    on_close: Option<HostValue>,
}

impl Handlers {
    fn slot(&mut self, slot: HandlerSlot) -> &mut Option<HostValue> {
        match slot {
            HandlerSlot::Open => &mut self.on_open,
            HandlerSlot::Message => &mut self.on_message,
            HandlerSlot::Error => &mut self.on_error,
            HandlerSlot::Close => &mut self.on_close,
        }
    }
}

pub struct WebSocketObject {
    id: SocketId,
    url: String,
    binary_type: RefCell<String>,
    ready_state: Cell<ReadyState>,
    handlers: RefCell<Handlers>,
}

fn syntax_error(message: impl Into<String>) -> SandboxError {
    SandboxError::Thrown(HostValue::named_error("SyntaxError", message))
}

impl WebSocketObject {
    /// `new WebSocket(url)`
    pub fn connect(cx: &mut Cx<'_>, url: &str) -> Result<Rc<Self>, SandboxError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(syntax_error(format!(
                "The URL's scheme must be either 'ws' or 'wss'. '{}' is not allowed.",
                url
            )));
        }
        let id = cx
            .data_mut()
            .transport
            .connect(url)
            .map_err(SandboxError::host)?;
        let socket = Rc::new(Self {
            id,
            url: url.to_string(),
            binary_type: RefCell::new("blob".into()),
            ready_state: Cell::new(ReadyState::Connecting),
            handlers: RefCell::new(Handlers::default()),
        });
        cx.data_mut().events.sockets.insert(id, Rc::clone(&socket));
        tracing::debug!(%id, %url, "websocket connecting");
        Ok(socket)
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state.get()
    }

    pub fn binary_type(&self) -> String {
        self.binary_type.borrow().clone()
    }

    /// Only `blob` and `arraybuffer` are accepted; other values are ignored.
    pub fn set_binary_type(&self, value: &str) {
        if matches!(value, "blob" | "arraybuffer") {
            *self.binary_type.borrow_mut() = value.to_string();
        }
    }

    /// Install or clear a handler. Non-function values clear the slot.
    pub fn set_handler(&self, slot: HandlerSlot, handler: HostValue) {
        let handler = handler.is_function().then_some(handler);
        *self.handlers.borrow_mut().slot(slot) = handler;
    }

    pub fn handler(&self, slot: HandlerSlot) -> Option<HostValue> {
        self.handlers.borrow_mut().slot(slot).clone()
    }

    pub fn send(&self, cx: &mut Cx<'_>, data: &[u8]) -> Result<(), SandboxError> {
        if self.ready_state() == ReadyState::Connecting {
            return Err(SandboxError::Thrown(HostValue::named_error(
                "InvalidStateError",
                "Still in CONNECTING state.",
            )));
        }
        if self.ready_state() != ReadyState::Open {
            tracing::debug!(id = %self.id, "send on a closing socket discarded");
            return Ok(());
        }
        cx.data_mut()
            .transport
            .send(self.id, data)
            .map_err(SandboxError::host)
    }

    pub fn close(
        &self,
        cx: &mut Cx<'_>,
        code: Option<u16>,
        reason: Option<&str>,
    ) -> Result<(), SandboxError> {
        if let Some(code) = code {
            if code != 1000 && !(3000..=4999).contains(&code) {
                return Err(SandboxError::Thrown(HostValue::named_error(
                    "InvalidAccessError",
                    format!(
                        "The code must be either 1000, or between 3000 and 4999. {} is neither.",
                        code
                    ),
                )));
            }
        }
        if reason.is_some_and(|r| r.len() > 123) {
            return Err(syntax_error("The close reason must not be greater than 123 UTF-8 bytes."));
        }
        if matches!(self.ready_state(), ReadyState::Closing | ReadyState::Closed) {
            return Ok(());
        }
        self.ready_state.set(ReadyState::Closing);
        cx.data_mut()
            .transport
            .close(self.id, code, reason)
            .map_err(SandboxError::host)
    }
}

/// Deliver one transport event to its socket's handler.
pub fn dispatch(cx: &mut Cx<'_>, event: SocketEvent) -> Result<(), SandboxError> {
    let id = event.socket();
    let Some(socket) = cx.data().events.sockets.get(&id).cloned() else {
        tracing::trace!(%id, "event for unknown socket dropped");
        return Ok(());
    };
    let (slot, payload) = match event {
        SocketEvent::Open(_) => {
            socket.ready_state.set(ReadyState::Open);
            (HandlerSlot::Open, HostValue::object([("type", "open".into())]))
        }
        SocketEvent::Message(_, data) => (
            HandlerSlot::Message,
            HostValue::object([("type", "message".into()), ("data", HostValue::bytes(data))]),
        ),
        SocketEvent::Error(_, message) => (
            HandlerSlot::Error,
            HostValue::object([("type", "error".into()), ("message", message.into())]),
        ),
        SocketEvent::Close { code, reason, .. } => {
            socket.ready_state.set(ReadyState::Closed);
            cx.data_mut().events.sockets.remove(&id);
            (
                HandlerSlot::Close,
                HostValue::object([
                    ("type", "close".into()),
                    ("code", HostValue::Number(code as f64)),
                    ("reason", reason.into()),
                    ("wasClean", HostValue::Bool(code == 1000)),
                ]),
            )
        }
    };
    tracing::trace!(%id, ?slot, "socket event");
    match socket.handler(slot) {
        Some(handler) => call_detached(cx, &handler, &[payload], "websocket handler"),
        None => Ok(()),
    }
}
