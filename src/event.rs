//! Typed events and the explicit handler registration table.
//!
//! A [`Dispatcher`] is assembled once with [`DispatcherBuilder`] and shared
//! by every connection as an `Arc`. Handlers run synchronously, in
//! registration order, with mutable access to the connection that produced
//! the event.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::Result;
use crate::store::{ChannelId, UserId};

/// Discriminant used as the registration key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Raw,
    NewUser,
    NewChannel,
    SelfMessage,
    SelfNotice,
    Disconnected,
}

/// Something a connection observed or did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// One decoded line, exactly as received.
    Raw { line: String },
    /// A nickname was referenced for the first time.
    NewUser { id: UserId, nickname: String },
    /// A channel was referenced for the first time.
    NewChannel { id: ChannelId, name: String },
    /// We sent a `PRIVMSG`; the server does not echo it back.
    SelfMessage {
        target: String,
        message: String,
        action: bool,
        channel: bool,
    },
    /// We sent a `NOTICE`.
    SelfNotice {
        target: String,
        message: String,
        channel: bool,
    },
    /// The socket was closed.
    Disconnected,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Raw { .. } => EventKind::Raw,
            Self::NewUser { .. } => EventKind::NewUser,
            Self::NewChannel { .. } => EventKind::NewChannel,
            Self::SelfMessage { .. } => EventKind::SelfMessage,
            Self::SelfNotice { .. } => EventKind::SelfNotice,
            Self::Disconnected => EventKind::Disconnected,
        }
    }
}

/// Outcome of a pre-send hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendAction {
    /// Send the line unchanged.
    Keep,
    /// Send this text instead.
    Replace(String),
    /// Drop the line.
    Suppress,
}

/// Event handler.
pub type Handler = Box<dyn Fn(&mut Connection, &Event) -> Result<()> + Send + Sync>;

/// Hook run on every outbound line before it is queued.
pub type SendHook = Box<dyn Fn(&Connection, &str) -> SendAction + Send + Sync>;

/// Immutable handler table.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Vec<Handler>>,
    send_hooks: Vec<SendHook>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self.handlers.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("Dispatcher")
            .field("handlers", &counts)
            .field("send_hooks", &self.send_hooks.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// A dispatcher with only the built-in protocol handlers.
    pub fn core() -> Arc<Self> {
        Self::builder().with_core_handlers().build()
    }

    /// Run every handler registered for the event's kind.
    ///
    /// Stops at, and returns, the first handler error.
    pub fn dispatch(&self, connection: &mut Connection, event: &Event) -> Result<()> {
        if let Some(handlers) = self.handlers.get(&event.kind()) {
            for handler in handlers {
                handler(connection, event)?;
            }
        }
        Ok(())
    }

    /// Apply the send hooks in order; `None` means suppressed.
    pub fn preprocess_send(&self, connection: &Connection, line: &str) -> Option<String> {
        let mut current = line.to_owned();
        for hook in &self.send_hooks {
            match hook(connection, &current) {
                SendAction::Keep => {}
                SendAction::Replace(text) => current = text,
                SendAction::Suppress => return None,
            }
        }
        Some(current)
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

/// Builds a [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    dispatcher: Dispatcher,
}

impl DispatcherBuilder {
    /// Register a handler for one event kind.
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&mut Connection, &Event) -> Result<()> + Send + Sync + 'static,
    {
        self.dispatcher
            .handlers
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Register a pre-send hook.
    pub fn on_send<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Connection, &str) -> SendAction + Send + Sync + 'static,
    {
        self.dispatcher.send_hooks.push(Box::new(hook));
        self
    }

    /// Register the handlers that keep connection state in sync with the
    /// protocol (PING, CAP, SASL, registration, membership, buffers).
    pub fn with_core_handlers(self) -> Self {
        self.on(EventKind::Raw, crate::handlers::handle_raw)
    }

    pub fn build(self) -> Arc<Dispatcher> {
        Arc::new(self.dispatcher)
    }
}
