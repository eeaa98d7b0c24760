//! Drives many connections from one task.
//!
//! Each [`Connection`] runs as its own future inside a
//! [`FuturesUnordered`]; on a current-thread runtime this is the
//! single-threaded cooperative reactor. Connections lost to network faults
//! are reconnected after [`Reactor::reconnect_delay`]; configuration errors,
//! handler failures and connections we `QUIT` are not retried.

use std::time::Duration;

use futures_util::future::{FutureExt, LocalBoxFuture};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{error, info, warn};

use crate::connection::Connection;
use crate::error::EngineError;

/// Delay before a lost connection is re-established.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// How one run of a connection ended.
#[derive(Debug)]
pub enum Outcome {
    /// Lost to a network fault; will be retried.
    Lost,
    /// Closed on purpose after `QUIT`.
    Quit,
    /// A fault that retrying will not fix.
    Failed(EngineError),
}

/// Owns and drives a set of connections.
#[derive(Debug)]
pub struct Reactor {
    connections: Vec<Connection>,
    reconnect_delay: Duration,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn add(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Run until no connection is left to retry.
    ///
    /// Returns every connection with the outcome that ended it.
    pub async fn run(self) -> Vec<(Connection, Outcome)> {
        let mut pending: FuturesUnordered<LocalBoxFuture<'static, (Connection, Outcome)>> =
            FuturesUnordered::new();
        for connection in self.connections {
            pending.push(drive(connection, Duration::ZERO).boxed_local());
        }

        let mut finished = Vec::new();
        while let Some((connection, outcome)) = pending.next().await {
            match outcome {
                Outcome::Lost => {
                    info!(
                        server = %connection,
                        delay = ?self.reconnect_delay,
                        "connection lost, reconnecting"
                    );
                    pending.push(drive(connection, self.reconnect_delay).boxed_local());
                }
                Outcome::Quit => {
                    info!(server = %connection, "connection closed");
                    finished.push((connection, outcome));
                }
                Outcome::Failed(ref e) => {
                    error!(server = %connection, "giving up: {}", e);
                    finished.push((connection, outcome));
                }
            }
        }
        finished
    }
}

/// Connect (after `delay`) and run one connection to completion.
async fn drive(mut connection: Connection, delay: Duration) -> (Connection, Outcome) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if let Err(e) = connection.connect().await {
        if e.is_network() {
            warn!(server = %connection, "connect failed: {}", e);
            return (connection, Outcome::Lost);
        }
        return (connection, Outcome::Failed(e));
    }

    let outcome = match connection.run().await {
        Ok(()) if connection.is_quitting() => Outcome::Quit,
        Ok(()) => Outcome::Lost,
        Err(e) if e.is_network() => Outcome::Lost,
        Err(e) => Outcome::Failed(e),
    };
    (connection, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use crate::config::{EngineSettings, ServerConfig};
    use crate::event::{Dispatcher, Event, EventKind};
    use crate::store::MemoryStore;

    fn connection(port: u16, settings: EngineSettings, dispatcher: Arc<Dispatcher>) -> Connection {
        Connection::new(
            ServerConfig::new(1, "127.0.0.1", port, "bot"),
            settings,
            Arc::new(MemoryStore::new()),
            dispatcher,
        )
    }

    #[tokio::test]
    async fn test_config_error_not_retried() {
        let settings = EngineSettings {
            fallback_encoding: "bogus".into(),
            ..EngineSettings::default()
        };
        let mut reactor = Reactor::new().with_reconnect_delay(Duration::from_millis(10));
        reactor.add(connection(1, settings, Dispatcher::core()));

        let finished = tokio::time::timeout(Duration::from_secs(5), reactor.run())
            .await
            .unwrap();
        assert_eq!(finished.len(), 1);
        assert!(matches!(finished[0].1, Outcome::Failed(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_quit_after_welcome() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            write.write_all(b":irc 001 bot :Welcome\r\n").await.unwrap();

            let mut lines = BufReader::new(read).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                if line.starts_with("QUIT") {
                    return line;
                }
            }
            String::new()
        });

        let dispatcher = Dispatcher::builder()
            .with_core_handlers()
            .on(EventKind::Raw, |conn, event| {
                if let Event::Raw { line } = event {
                    if line.contains(" 001 ") {
                        conn.send_quit(Some("done"));
                    }
                }
                Ok(())
            })
            .build();
        let mut reactor = Reactor::new();
        reactor.add(connection(port, EngineSettings::default(), dispatcher));

        let finished = tokio::time::timeout(Duration::from_secs(10), reactor.run())
            .await
            .unwrap();
        assert_eq!(server.await.unwrap(), "QUIT :done");
        assert!(matches!(finished[0].1, Outcome::Quit));
    }
}
