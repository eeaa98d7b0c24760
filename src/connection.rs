//! One IRC server connection.
//!
//! [`Connection`] owns the socket together with the [`FrameCodec`],
//! [`OutboundThrottler`], [`LivenessMonitor`], [`CapabilityNegotiator`] and
//! [`EntityRegistry`] for that server. All of its state is mutated from the
//! single task that drives it, either through [`Connection::run`] or by
//! calling the read and write entry points directly.
//!
//! ```text
//! Disconnected --connect()--> Connecting --> CapabilityHandshake --001--> Registered
//!      ^                                                                    |
//!      +---------------- disconnect() / EOF / socket error -----------------+
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, error, info, trace, warn};

use crate::caps::{CapabilityNegotiator, NegotiationState};
use crate::casemap::CaseMapping;
use crate::codec::FrameCodec;
use crate::config::{EngineSettings, ServerConfig};
use crate::error::{EngineError, Result};
use crate::event::{Dispatcher, Event};
use crate::liveness::LivenessMonitor;
use crate::message::Tags;
use crate::registry::{EntityRegistry, RegistryEvent};
use crate::store::{IdentityStore, ServerId, SettingScope};
use crate::throttle::OutboundThrottler;
use crate::tls;
use crate::transport::Transport;
use crate::util::ctcp_action;

/// Bytes requested from the socket per read.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Limit for TCP connect and the TLS handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix modes assumed before `PREFIX` is seen.
const DEFAULT_PREFIXES: [(char, char); 2] = [('o', '@'), ('v', '+')];

/// Connection lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// Socket open, `CAP`/`NICK`/`USER` sent, waiting for `001`.
    CapabilityHandshake,
    Registered,
}

/// A connection to one IRC server.
pub struct Connection {
    config: ServerConfig,
    settings: EngineSettings,
    store: Arc<dyn IdentityStore>,
    dispatcher: Arc<Dispatcher>,
    state: ConnectionState,
    transport: Option<Transport>,
    codec: FrameCodec,
    throttler: OutboundThrottler,
    liveness: LivenessMonitor,
    caps: CapabilityNegotiator,
    registry: EntityRegistry,
    nickname: String,
    own_modes: BTreeMap<char, Option<String>>,
    prefix_modes: Vec<(char, char)>,
    isupport: HashMap<String, Option<String>>,
    server_name: Option<String>,
    quitting: bool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.to_string())
            .field("state", &self.state)
            .field("nickname", &self.nickname)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.config, f)
    }
}

impl Connection {
    pub fn new(
        config: ServerConfig,
        settings: EngineSettings,
        store: Arc<dyn IdentityStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let registry = EntityRegistry::new(config.id, Arc::clone(&store));
        let nickname = config.nickname.clone();
        Self {
            throttler: OutboundThrottler::new(settings.rate_limit()),
            liveness: LivenessMonitor::new(
                Instant::now(),
                settings.ping_interval,
                settings.read_timeout,
            ),
            config,
            settings,
            store,
            dispatcher,
            state: ConnectionState::Disconnected,
            transport: None,
            codec: FrameCodec::default(),
            caps: CapabilityNegotiator::new(),
            registry,
            nickname,
            own_modes: BTreeMap::new(),
            prefix_modes: DEFAULT_PREFIXES.to_vec(),
            isupport: HashMap::new(),
            server_name: None,
            quitting: false,
        }
    }

    /// Create a connection whose [`EngineSettings`] come from the store.
    pub fn from_store(
        config: ServerConfig,
        store: Arc<dyn IdentityStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let settings = EngineSettings::from_store(store.as_ref(), config.id)?;
        Ok(Self::new(config, settings, store, dispatcher))
    }

    pub fn id(&self) -> ServerId {
        self.config.id
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Server name from the `001` source, once registered.
    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub(crate) fn set_server_name(&mut self, name: &str) {
        self.server_name = Some(name.to_owned());
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn throttler(&self) -> &OutboundThrottler {
        &self.throttler
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    pub fn capabilities(&self) -> &CapabilityNegotiator {
        &self.caps
    }

    pub(crate) fn capabilities_mut(&mut self) -> &mut CapabilityNegotiator {
        &mut self.caps
    }

    pub fn case_mapping(&self) -> CaseMapping {
        self.registry.case_mapping()
    }

    // ---- lifecycle -------------------------------------------------------

    /// Open the socket and start registration.
    ///
    /// Sends `CAP LS`, then `PASS` if configured, then `USER` and `NICK`,
    /// without waiting for the handshake.
    ///
    /// # Errors
    ///
    /// Configuration errors (encoding, TLS files) and network errors; the
    /// connection is left `Disconnected` in either case.
    pub async fn connect(&mut self) -> Result<()> {
        if self.transport.is_some() {
            self.disconnect().await;
        }
        self.state = ConnectionState::Connecting;
        match self.open().await {
            Ok((codec, transport)) => {
                self.transport = Some(transport);
                self.codec = codec;
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        }

        self.throttler = OutboundThrottler::new(self.settings.rate_limit());
        self.liveness = LivenessMonitor::new(
            Instant::now(),
            self.settings.ping_interval,
            self.settings.read_timeout,
        );
        self.registry.clear();
        self.own_modes.clear();
        self.prefix_modes = DEFAULT_PREFIXES.to_vec();
        self.isupport.clear();
        self.server_name = None;
        self.quitting = false;
        let nickname = self.config.nickname.clone();
        self.set_own_nickname(&nickname);
        self.state = ConnectionState::CapabilityHandshake;
        info!(server = %self, "connected");

        self.send_capability_ls();
        if let Some(password) = self.config.password.clone() {
            self.send_pass(&password);
        }
        let username = self.config.username().to_owned();
        let realname = self.config.realname().to_owned();
        self.send_user(&username, &realname);
        self.send_nick(&nickname);
        Ok(())
    }

    async fn open(&self) -> Result<(FrameCodec, Transport)> {
        let codec = FrameCodec::new(&self.settings.encoding, &self.settings.fallback_encoding)?;
        let tls = if self.config.tls {
            let config = tls::client_config(&self.settings)?;
            let name = tls::server_name(&self.config.hostname)?;
            Some((TlsConnector::from(Arc::new(config)), name))
        } else {
            None
        };

        let stream = self.open_tcp().await?;
        let transport = match tls {
            Some((connector, name)) => {
                let stream = timeout(CONNECT_TIMEOUT, connector.connect(name, stream))
                    .await
                    .map_err(|_| EngineError::ConnectTimeout(self.to_string()))??;
                Transport::tls(stream)
            }
            None => Transport::plain(stream),
        };
        Ok((codec, transport))
    }

    async fn open_tcp(&self) -> Result<TcpStream> {
        let host = self.config.hostname.as_str();
        let port = self.config.port;
        let ipv4 = self.config.ipv4;
        let resolve_error = || EngineError::Resolve {
            host: host.to_owned(),
            port,
            family: if ipv4 { "IPv4" } else { "IPv6" },
        };

        let addrs: Vec<SocketAddr> = lookup_host((host, port))
            .await?
            .filter(|addr| addr.is_ipv4() == ipv4)
            .collect();

        let mut last_error = None;
        for addr in addrs {
            match self.connect_addr(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(server = %self, %addr, "connect failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(resolve_error))
    }

    async fn connect_addr(&self, addr: SocketAddr) -> Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        if let Some(ip) = self.config.bindhost {
            socket.bind(SocketAddr::new(ip, 0))?;
        }
        let stream = timeout(CONNECT_TIMEOUT, socket.connect(addr))
            .await
            .map_err(|_| EngineError::ConnectTimeout(addr.to_string()))??;
        Ok(stream)
    }

    /// Close the socket. Shutdown errors are ignored.
    pub async fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        self.throttler.clear();
        self.codec.clear();

        match timeout(CONNECT_TIMEOUT, transport.shutdown()).await {
            Ok(Err(e)) => debug!(server = %self, "shutdown failed: {}", e),
            Err(_) => debug!(server = %self, "shutdown timed out"),
            Ok(Ok(())) => {}
        }
        drop(transport);
        info!(server = %self, "disconnected");

        let dispatcher = Arc::clone(&self.dispatcher);
        if let Err(e) = dispatcher.dispatch(self, &Event::Disconnected) {
            error!(server = %self, "disconnect handler failed: {}", e);
        }
    }

    // ---- read path -------------------------------------------------------

    /// Read once from the socket and return the complete lines.
    ///
    /// `None` means the connection was lost and is now disconnected.
    pub async fn read(&mut self) -> Option<Vec<String>> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let transport = self.transport.as_mut()?;
        let result = transport.read(&mut chunk).await;
        self.handle_read(result, &chunk).await
    }

    async fn handle_read(&mut self, result: io::Result<usize>, chunk: &[u8]) -> Option<Vec<String>> {
        let n = match result {
            Ok(0) => {
                info!(server = %self, "connection closed by peer");
                self.disconnect().await;
                return None;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(server = %self, "read failed: {}", e);
                self.disconnect().await;
                return None;
            }
        };
        let lines = self.codec.feed(&chunk[..n]);
        self.liveness.record_read(Instant::now());
        Some(lines)
    }

    /// Dispatch one decoded line, then prune transient users.
    ///
    /// # Errors
    ///
    /// The first handler error, typically an
    /// [`EngineError::InvariantViolation`].
    pub fn parse_data(&mut self, line: &str) -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        debug!(server = %self, "< {}", line);

        let dispatcher = Arc::clone(&self.dispatcher);
        dispatcher.dispatch(
            self,
            &Event::Raw {
                line: line.to_owned(),
            },
        )?;
        self.emit_registry_events()?;
        self.check_users();
        Ok(())
    }

    fn check_users(&mut self) {
        for nickname in self.registry.prune_transient_users() {
            trace!(server = %self, %nickname, "pruned transient user");
        }
    }

    fn emit_registry_events(&mut self) -> Result<()> {
        let events = self.registry.take_events();
        if events.is_empty() {
            return Ok(());
        }
        let dispatcher = Arc::clone(&self.dispatcher);
        for event in events {
            let event = match event {
                RegistryEvent::NewUser { id, nickname } => Event::NewUser { id, nickname },
                RegistryEvent::NewChannel { id, name } => Event::NewChannel { id, name },
            };
            dispatcher.dispatch(self, &event)?;
        }
        Ok(())
    }

    /// Read and dispatch everything available from one socket read.
    ///
    /// Returns `false` once the connection is lost.
    pub async fn process_read(&mut self) -> Result<bool> {
        let Some(lines) = self.read().await else {
            return Ok(false);
        };
        for line in lines {
            self.parse_data(&line)?;
        }
        Ok(true)
    }

    // ---- write path ------------------------------------------------------

    /// Queue a line after the send hooks have seen it.
    pub fn send(&mut self, line: &str) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let Some(line) = dispatcher.preprocess_send(self, line) else {
            trace!(server = %self, %line, "send suppressed by hook");
            return;
        };
        let frame = self.codec.encode_line(&line);
        debug!(server = %self, "> {}", String::from_utf8_lossy(&frame).trim_end());
        self.throttler.enqueue(frame);
    }

    /// Whether a line is in flight or queued.
    pub fn waiting_send(&self) -> bool {
        self.throttler.has_pending_work()
    }

    /// Zero when a line may be written now.
    pub fn send_throttle_timeout(&mut self) -> Duration {
        self.throttler.time_until_send_allowed(Instant::now())
    }

    /// Write one chunk if the throttle allows.
    ///
    /// Returns `false` once the connection is lost.
    pub async fn write(&mut self) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        let result = self.throttler.try_send(transport, Instant::now()).await;
        if let Err(e) = result {
            warn!(server = %self, "write failed: {}", e);
            self.disconnect().await;
            return false;
        }
        true
    }

    /// Write every line the throttle currently allows.
    ///
    /// Returns `false` once the connection is lost.
    pub async fn flush(&mut self) -> bool {
        let mut wrote = false;
        while self.throttler.has_pending_work() && self.send_throttle_timeout().is_zero() {
            if !self.write().await {
                return false;
            }
            wrote = true;
        }
        if !wrote {
            return self.is_connected();
        }
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        let result = transport.flush().await;
        if let Err(e) = result {
            warn!(server = %self, "flush failed: {}", e);
            self.disconnect().await;
            return false;
        }
        true
    }

    fn next_wakeup(&mut self, now: Instant) -> Duration {
        let mut wait = self.liveness.time_until_read_timeout(now);
        if let Some(ping) = self.liveness.time_until_ping_due(now) {
            wait = wait.min(ping);
        }
        if self.throttler.has_pending_work() {
            wait = wait.min(self.throttler.time_until_send_allowed(now));
        }
        wait
    }

    /// Drive the connection until it disconnects.
    ///
    /// Sends keepalive pings, enforces the read timeout, writes queued
    /// lines as the throttle allows and dispatches everything read. A write
    /// still blocked when the read timeout expires also disconnects.
    ///
    /// # Errors
    ///
    /// A handler error; the connection is disconnected first.
    pub async fn run(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        while self.is_connected() {
            let now = Instant::now();
            if self.liveness.is_read_timed_out(now) {
                warn!(
                    server = %self,
                    timeout = ?self.settings.read_timeout,
                    "read timed out"
                );
                self.disconnect().await;
                break;
            }
            if self.liveness.ping_due(now) {
                self.send_ping("hello");
                self.liveness.record_ping_sent();
            }
            let stall = self.liveness.time_until_read_timeout(now);
            match timeout(stall, self.flush()).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    warn!(
                        server = %self,
                        timeout = ?self.settings.read_timeout,
                        "write stalled"
                    );
                    self.disconnect().await;
                    break;
                }
            }

            let wait = self.next_wakeup(Instant::now());
            let Some(transport) = self.transport.as_mut() else {
                break;
            };
            let Ok(result) = timeout(wait, transport.read(&mut chunk)).await else {
                continue;
            };
            let Some(lines) = self.handle_read(result, &chunk).await else {
                break;
            };
            for line in lines {
                if let Err(e) = self.parse_data(&line) {
                    error!(server = %self, "handler failed: {}", e);
                    self.disconnect().await;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    // ---- own identity ----------------------------------------------------

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn set_own_nickname(&mut self, nickname: &str) {
        self.nickname = nickname.to_owned();
    }

    pub fn is_own_nickname(&self, nickname: &str) -> bool {
        self.registry.case_mapping().equals(nickname, &self.nickname)
    }

    pub fn own_modes(&self) -> &BTreeMap<char, Option<String>> {
        &self.own_modes
    }

    pub fn add_own_mode(&mut self, mode: char, arg: Option<&str>) {
        self.own_modes.insert(mode, arg.map(str::to_owned));
    }

    pub fn remove_own_mode(&mut self, mode: char) {
        self.own_modes.remove(&mode);
    }

    pub fn change_own_mode(&mut self, remove: bool, mode: char, arg: Option<&str>) {
        if remove {
            self.remove_own_mode(mode);
        } else {
            self.add_own_mode(mode, arg);
        }
    }

    // ---- server support --------------------------------------------------

    /// `(mode, symbol)` pairs from `PREFIX`, highest rank first.
    pub fn prefix_modes(&self) -> &[(char, char)] {
        &self.prefix_modes
    }

    pub(crate) fn set_prefix_modes(&mut self, pairs: Vec<(char, char)>) {
        self.prefix_modes = pairs;
    }

    pub fn prefix_mode_for_symbol(&self, symbol: char) -> Option<char> {
        self.prefix_modes
            .iter()
            .find(|(_, s)| *s == symbol)
            .map(|(m, _)| *m)
    }

    pub fn is_prefix_mode(&self, mode: char) -> bool {
        self.prefix_modes.iter().any(|(m, _)| *m == mode)
    }

    /// A raw `RPL_ISUPPORT` token value.
    pub fn isupport(&self, key: &str) -> Option<Option<&str>> {
        self.isupport
            .get(&key.to_ascii_uppercase())
            .map(|v| v.as_deref())
    }

    pub(crate) fn record_isupport(&mut self, key: &str, value: Option<&str>) {
        self.isupport
            .insert(key.to_ascii_uppercase(), value.map(str::to_owned));
    }

    // ---- capabilities ----------------------------------------------------

    pub fn send_capability_ls(&mut self) {
        let line = self.caps.start();
        self.send(&line);
    }

    pub fn queue_capability(&mut self, capability: &str) {
        self.caps.queue(capability);
    }

    pub fn queue_capabilities<I, S>(&mut self, capabilities: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.caps.queue_all(capabilities);
    }

    pub fn has_capability_queue(&self) -> bool {
        self.caps.has_queue()
    }

    /// Request everything queued in one `CAP REQ`.
    pub fn send_capability_queue(&mut self) {
        if let Some(line) = self.caps.flush() {
            self.send(&line);
        }
    }

    pub fn send_capability_request(&mut self, capabilities: &str) {
        self.send(&format!("CAP REQ :{}", capabilities));
    }

    /// Send `CAP END` unless negotiation already ended.
    pub fn send_capability_end(&mut self) {
        if let Some(line) = self.caps.end() {
            self.send(&line);
        }
    }

    pub fn wait_for_capability(&mut self, capability: &str) {
        self.caps.wait_for(capability);
    }

    pub fn waiting_for_capabilities(&self) -> bool {
        self.caps.waiting_for_capabilities()
    }

    /// Finish a capability; sends `CAP END` after the last one.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvariantViolation`] if `capability` was not awaiting.
    pub fn capability_done(&mut self, capability: &str) -> Result<()> {
        if let Some(line) = self.caps.capability_done(capability)? {
            self.send(&line);
        }
        Ok(())
    }

    pub fn negotiation_state(&self) -> NegotiationState {
        self.caps.state()
    }

    /// Whether the server acknowledged `capability`.
    pub fn has_capability(&self, capability: &str) -> bool {
        self.caps.is_enabled(capability)
    }

    /// Value the server advertised for `capability`.
    pub fn server_capability(&self, capability: &str) -> Option<Option<&str>> {
        self.caps
            .offered()
            .get(capability)
            .map(|value| value.as_deref())
    }

    // ---- settings --------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.store.get_setting(SettingScope::Server(self.config.id), key)
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.store
            .set_setting(SettingScope::Server(self.config.id), key, value);
    }

    pub fn del_setting(&self, key: &str) {
        self.store
            .delete_setting(SettingScope::Server(self.config.id), key);
    }

    fn user_scope(&self, nickname: &str) -> SettingScope {
        let key = self.registry.fold(nickname);
        SettingScope::User(self.store.get_or_create_user_id(self.config.id, &key))
    }

    fn channel_scope(&self, name: &str) -> SettingScope {
        let key = self.registry.fold(name);
        SettingScope::Channel(self.store.get_or_create_channel_id(self.config.id, &key))
    }

    pub fn get_user_setting(&self, nickname: &str, key: &str) -> Option<String> {
        self.store.get_setting(self.user_scope(nickname), key)
    }

    pub fn set_user_setting(&self, nickname: &str, key: &str, value: &str) {
        self.store.set_setting(self.user_scope(nickname), key, value);
    }

    pub fn del_user_setting(&self, nickname: &str, key: &str) {
        self.store.delete_setting(self.user_scope(nickname), key);
    }

    pub fn get_channel_setting(&self, name: &str, key: &str) -> Option<String> {
        self.store.get_setting(self.channel_scope(name), key)
    }

    pub fn set_channel_setting(&self, name: &str, key: &str, value: &str) {
        self.store.set_setting(self.channel_scope(name), key, value);
    }

    pub fn del_channel_setting(&self, name: &str, key: &str) {
        self.store.delete_setting(self.channel_scope(name), key);
    }

    // ---- commands --------------------------------------------------------

    pub fn send_user(&mut self, username: &str, realname: &str) {
        self.send(&format!("USER {} 0 * :{}", username, realname));
    }

    pub fn send_nick(&mut self, nickname: &str) {
        self.send(&format!("NICK {}", nickname));
    }

    pub fn send_pass(&mut self, password: &str) {
        self.send(&format!("PASS {}", password));
    }

    pub fn send_authenticate(&mut self, text: &str) {
        self.send(&format!("AUTHENTICATE {}", text));
    }

    pub fn send_ping(&mut self, nonce: &str) {
        self.send(&format!("PING :{}", nonce));
    }

    pub fn send_pong(&mut self, nonce: &str) {
        self.send(&format!("PONG :{}", nonce));
    }

    pub fn send_join(&mut self, channel: &str, key: Option<&str>) {
        match key {
            Some(key) => self.send(&format!("JOIN {} {}", channel, key)),
            None => self.send(&format!("JOIN {}", channel)),
        }
    }

    pub fn send_part(&mut self, channel: &str, reason: Option<&str>) {
        match reason {
            Some(reason) => self.send(&format!("PART {} :{}", channel, reason)),
            None => self.send(&format!("PART {}", channel)),
        }
    }

    /// `QUIT`, with "Leaving" when no reason is given.
    ///
    /// The connection is then considered intentionally closed and is not
    /// reconnected by the [`Reactor`](crate::Reactor).
    pub fn send_quit(&mut self, reason: Option<&str>) {
        self.quitting = true;
        self.send(&format!("QUIT :{}", reason.unwrap_or("Leaving")));
    }

    /// Whether `QUIT` was sent on this connection.
    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    pub fn send_mode(&mut self, target: &str, mode: Option<&str>, args: Option<&str>) {
        let mut line = format!("MODE {}", target);
        for part in [mode, args].into_iter().flatten() {
            line.push(' ');
            line.push_str(part);
        }
        self.send(&line);
    }

    pub fn send_topic(&mut self, channel: &str, topic: &str) {
        self.send(&format!("TOPIC {} :{}", channel, topic));
    }

    pub fn send_kick(&mut self, channel: &str, target: &str, reason: Option<&str>) {
        match reason {
            Some(reason) => self.send(&format!("KICK {} {} :{}", channel, target, reason)),
            None => self.send(&format!("KICK {} {}", channel, target)),
        }
    }

    pub fn send_names(&mut self, channel: &str) {
        self.send(&format!("NAMES {}", channel));
    }

    pub fn send_list(&mut self, search_for: Option<&str>) {
        match search_for {
            Some(search) => self.send(&format!("LIST {}", search)),
            None => self.send("LIST"),
        }
    }

    pub fn send_invite(&mut self, target: &str, channel: &str) {
        self.send(&format!("INVITE {} {}", target, channel));
    }

    pub fn send_whois(&mut self, target: &str) {
        self.send(&format!("WHOIS {}", target));
    }

    pub fn send_whowas(&mut self, target: &str, amount: Option<u32>, server: Option<&str>) {
        let mut line = format!("WHOWAS {}", target);
        if let Some(amount) = amount {
            line.push_str(&format!(" {}", amount));
        }
        if let Some(server) = server {
            line.push_str(&format!(" :{}", server));
        }
        self.send(&line);
    }

    pub fn send_who(&mut self, filter: Option<&str>) {
        match filter {
            Some(filter) => self.send(&format!("WHO {}", filter)),
            None => self.send("WHO"),
        }
    }

    /// WHOX query: `WHO <mask> <filter>%<fields>[,<label>]`.
    pub fn send_whox(&mut self, mask: &str, filter: &str, fields: &str, label: Option<&str>) {
        let label = label.map(|l| format!(",{}", l)).unwrap_or_default();
        self.send(&format!("WHO {} {}%{}{}", mask, filter, fields, label));
    }

    /// Send a `PRIVMSG` and record it locally, since the server does not
    /// echo our own messages.
    ///
    /// # Errors
    ///
    /// The first [`Event::SelfMessage`] handler error.
    pub fn send_message(
        &mut self,
        target: &str,
        message: &str,
        prefix: Option<&str>,
        tags: &Tags,
    ) -> Result<()> {
        let full_message = match prefix {
            Some(prefix) => format!("{}{}", prefix, message),
            None => message.to_owned(),
        };
        self.send(&format!("{}PRIVMSG {} :{}", tags.to_prefix(), target, full_message));

        let (text, action) = match ctcp_action(&full_message) {
            Some(inner) => (inner, true),
            None => (message, false),
        };
        let channel = self.registry.has_channel(target);
        if channel {
            if let Some(channel) = self.registry.channel_mut(target) {
                channel.buffer.add_message(None, text, action, tags, true);
            }
        } else if let Some(user) = self.registry.get_user(target, true) {
            user.buffer.add_message(None, text, action, tags, true);
        }

        self.emit_registry_events()?;
        let dispatcher = Arc::clone(&self.dispatcher);
        dispatcher.dispatch(
            self,
            &Event::SelfMessage {
                target: target.to_owned(),
                message: full_message,
                action,
                channel,
            },
        )
    }

    /// Send a `NOTICE` and record it locally.
    ///
    /// # Errors
    ///
    /// The first [`Event::SelfNotice`] handler error.
    pub fn send_notice(
        &mut self,
        target: &str,
        message: &str,
        prefix: Option<&str>,
        tags: &Tags,
    ) -> Result<()> {
        let full_message = match prefix {
            Some(prefix) => format!("{}{}", prefix, message),
            None => message.to_owned(),
        };
        self.send(&format!("{}NOTICE {} :{}", tags.to_prefix(), target, full_message));

        let channel = self.registry.has_channel(target);
        if channel {
            if let Some(channel) = self.registry.channel_mut(target) {
                channel.buffer.add_notice(None, message, tags, true);
            }
        } else if let Some(user) = self.registry.get_user(target, true) {
            user.buffer.add_notice(None, message, tags, true);
        }

        self.emit_registry_events()?;
        let dispatcher = Arc::clone(&self.dispatcher);
        dispatcher.dispatch(
            self,
            &Event::SelfNotice {
                target: target.to_owned(),
                message: full_message,
                channel,
            },
        )
    }
}
