//! # slirc-engine
//!
//! The connection engine of an IRC client or bot: one [`Connection`] per
//! server, owning the socket and everything needed to keep a session
//! healthy.
//!
//! ## Features
//!
//! - Byte stream framing with primary/fallback text decoding ([`FrameCodec`])
//! - Sliding-window outbound rate limiting ([`OutboundThrottler`])
//! - Keepalive pings and read timeouts ([`LivenessMonitor`])
//! - IRCv3 `CAP` negotiation with SASL PLAIN or EXTERNAL ([`CapabilityNegotiator`])
//! - Case-mapped user and channel tracking ([`EntityRegistry`])
//! - Plain TCP or rustls TLS, optional client certificates
//! - An explicit event/handler table ([`Dispatcher`]) instead of dynamic hooks
//! - Many connections on one task with automatic reconnects ([`Reactor`])

#![deny(clippy::all)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use slirc_engine::{Connection, Dispatcher, Event, EventKind, MemoryStore, Reactor, ServerConfig};
//!
//! # async fn demo() -> slirc_engine::Result<()> {
//! let dispatcher = Dispatcher::builder()
//!     .with_core_handlers()
//!     .on(EventKind::Raw, |conn, event| {
//!         if let Event::Raw { line } = event {
//!             if line.contains(" 001 ") {
//!                 conn.send_join("#rust", None);
//!             }
//!         }
//!         Ok(())
//!     })
//!     .build();
//!
//! let mut config = ServerConfig::new(1, "irc.libera.chat", 6697, "slirc-bot");
//! config.tls = true;
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut reactor = Reactor::new();
//! reactor.add(Connection::from_store(config, store, dispatcher)?);
//! reactor.run().await;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod caps;
pub mod casemap;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
mod handlers;
pub mod isupport;
pub mod liveness;
pub mod message;
pub mod reactor;
pub mod registry;
pub mod sasl;
pub mod store;
pub mod throttle;
pub mod tls;
pub mod transport;
pub mod util;

pub use self::buffer::{Buffer, BufferLine, BUFFER_CAPACITY};
pub use self::caps::{CapabilityNegotiator, NegotiationState};
pub use self::casemap::{irc_eq, irc_to_lower, CaseMapping};
pub use self::codec::{FrameCodec, MAX_LINE_BYTES};
pub use self::config::{EngineSettings, SaslCredentials, ServerConfig};
pub use self::connection::{Connection, ConnectionState};
pub use self::error::{ConfigError, EngineError, MessageParseError, Result};
pub use self::event::{Dispatcher, DispatcherBuilder, Event, EventKind, SendAction};
pub use self::liveness::LivenessMonitor;
pub use self::message::{IrcLine, Source, Tags};
pub use self::reactor::{Outcome, Reactor};
pub use self::registry::{Channel, EntityRegistry, User};
pub use self::store::{ChannelId, IdentityStore, MemoryStore, ServerId, SettingScope, UserId};
pub use self::throttle::{OutboundThrottler, RateLimit};
pub use self::transport::Transport;
