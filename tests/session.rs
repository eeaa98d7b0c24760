//! End-to-end sessions against a scripted local server.
//!
//! The client side is driven step by step through the public read/write
//! entry points so every assertion sees a settled state.

use std::sync::Arc;
use std::time::Duration;

use slirc_engine::{
    Connection, ConnectionState, Dispatcher, EngineSettings, Event, EventKind, MemoryStore,
    NegotiationState, SaslCredentials, ServerConfig,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::time::timeout;

struct Server {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl Server {
    async fn send(&mut self, line: &str) {
        self.write
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn expect(&mut self, expected: &str) {
        let line = timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for client line")
            .unwrap()
            .expect("client closed the connection");
        assert_eq!(line, expected);
    }
}

async fn setup(
    config: impl FnOnce(&mut ServerConfig),
    dispatcher: Arc<Dispatcher>,
) -> (Connection, Server) {
    let settings = EngineSettings {
        throttle_lines: 100,
        ..EngineSettings::default()
    };
    setup_with(settings, config, dispatcher).await
}

async fn setup_with(
    settings: EngineSettings,
    config: impl FnOnce(&mut ServerConfig),
    dispatcher: Arc<Dispatcher>,
) -> (Connection, Server) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut server_config = ServerConfig::new(1, "127.0.0.1", port, "bot");
    config(&mut server_config);
    let mut conn = Connection::new(
        server_config,
        settings,
        Arc::new(MemoryStore::new()),
        dispatcher,
    );

    let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
    conn.connect().await.unwrap();
    let stream = accept.await.unwrap();
    let (read, write) = stream.into_split();
    let server = Server {
        lines: BufReader::new(read).lines(),
        write,
    };
    (conn, server)
}

/// Read until every line the server sent so far has been dispatched.
async fn pump(conn: &mut Connection, lines: usize) {
    let mut seen = 0;
    while seen < lines {
        let read = timeout(Duration::from_secs(5), conn.read())
            .await
            .expect("timed out waiting for server line")
            .expect("connection lost");
        for line in read {
            conn.parse_data(&line).unwrap();
            seen += 1;
        }
    }
    assert!(conn.flush().await);
}

#[tokio::test]
async fn test_registration_burst_order() {
    let (mut conn, mut server) = setup(
        |c| {
            c.password = Some("secret".into());
            c.realname = Some("Engine Bot".into());
        },
        Dispatcher::core(),
    )
    .await;
    assert_eq!(conn.state(), ConnectionState::CapabilityHandshake);
    assert!(conn.flush().await);

    server.expect("CAP LS 302").await;
    server.expect("PASS secret").await;
    server.expect("USER bot 0 * :Engine Bot").await;
    server.expect("NICK bot").await;
}

#[tokio::test]
async fn test_sasl_negotiation_single_cap_end() {
    let (mut conn, mut server) = setup(
        |c| {
            c.sasl = Some(SaslCredentials {
                account: "bot".into(),
                password: "hunter2".into(),
            })
        },
        Dispatcher::core(),
    )
    .await;
    assert!(conn.flush().await);
    server.expect("CAP LS 302").await;
    server.expect("USER bot 0 * :bot").await;
    server.expect("NICK bot").await;

    server.send(":server CAP * LS :sasl").await;
    pump(&mut conn, 1).await;
    server.expect("CAP REQ :sasl").await;

    server.send(":server CAP * ACK :sasl").await;
    pump(&mut conn, 1).await;
    server.expect("AUTHENTICATE PLAIN").await;
    assert!(conn.has_capability("sasl"));
    assert_eq!(conn.negotiation_state(), NegotiationState::Negotiating);

    conn.capability_done("sasl").unwrap();
    assert!(conn.flush().await);
    server.expect("CAP END").await;
    assert_eq!(conn.negotiation_state(), NegotiationState::Done);

    // A second completion is a handler defect, and nothing more is sent.
    assert!(conn.capability_done("sasl").is_err());
    server.send(":server 001 bot :Welcome").await;
    pump(&mut conn, 1).await;
    assert_eq!(conn.state(), ConnectionState::Registered);
    assert!(!conn.waiting_send());
}

#[tokio::test]
async fn test_membership_and_transient_pruning() {
    let (mut conn, mut server) = setup(|_| {}, Dispatcher::core()).await;
    server.send(":server 001 bot :Welcome").await;
    server.send(":bot!b@host JOIN #rust").await;
    server.send(":alice!a@host JOIN #rust").await;
    server.send(":passer!p@host PRIVMSG bot :hello").await;
    pump(&mut conn, 4).await;

    let registry = conn.registry();
    assert!(registry.has_channel("#RUST"));
    assert!(registry.has_user("ALICE"));
    assert!(!registry.has_user("passer"));
    assert_eq!(registry.channel("#rust").unwrap().member_count(), 2);
}

#[tokio::test]
async fn test_ping_answered_and_fragments_joined() {
    let (mut conn, mut server) = setup(|_| {}, Dispatcher::core()).await;
    assert!(conn.flush().await);
    for expected in ["CAP LS 302", "USER bot 0 * :bot", "NICK bot"] {
        server.expect(expected).await;
    }

    server.write.write_all(b"PING :tok").await.unwrap();
    server.write.flush().await.unwrap();
    let first = timeout(Duration::from_secs(5), conn.read())
        .await
        .unwrap()
        .unwrap();
    assert!(first.is_empty());

    server.write.write_all(b"en\r\n").await.unwrap();
    pump(&mut conn, 1).await;
    server.expect("PONG :token").await;
}

#[tokio::test]
async fn test_disconnect_on_close_emits_event() {
    let dispatcher = Dispatcher::builder()
        .with_core_handlers()
        .on(EventKind::Disconnected, |conn, event| {
            assert_eq!(event, &Event::Disconnected);
            conn.set_setting("last-disconnect", "seen");
            Ok(())
        })
        .build();
    let (mut conn, server) = setup(|_| {}, dispatcher).await;
    drop(server);

    let read = timeout(Duration::from_secs(5), conn.read()).await.unwrap();
    assert!(read.is_none());
    assert!(!conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.get_setting("last-disconnect").as_deref(), Some("seen"));
}

#[tokio::test]
async fn test_silent_server_pinged_then_dropped() {
    let settings = EngineSettings {
        throttle_lines: 100,
        ping_interval: Duration::from_millis(200),
        read_timeout: Duration::from_secs(1),
        ..EngineSettings::default()
    };
    let (mut conn, mut server) = setup_with(settings, |_| {}, Dispatcher::core()).await;

    let (result, ()) = tokio::join!(timeout(Duration::from_secs(5), conn.run()), async {
        for expected in ["CAP LS 302", "USER bot 0 * :bot", "NICK bot", "PING :hello"] {
            server.expect(expected).await;
        }
    });
    let result = result.expect("run did not notice the silent server");
    assert!(result.is_ok());
    assert!(!conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    drop(server);
}

#[tokio::test]
async fn test_stalled_write_disconnects() {
    let settings = EngineSettings {
        throttle_lines: 1,
        throttle_window: Duration::ZERO,
        read_timeout: Duration::from_secs(1),
        ..EngineSettings::default()
    };
    let (mut conn, server) = setup_with(settings, |_| {}, Dispatcher::core()).await;

    // The server never reads, so the socket buffers fill long before this
    // queue drains.
    let text = "x".repeat(400);
    for _ in 0..100_000 {
        conn.send(&format!("PRIVMSG #void :{}", text));
    }

    let result = timeout(Duration::from_secs(8), conn.run())
        .await
        .expect("run blocked on a peer that stopped reading");
    assert!(result.is_ok());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(!conn.waiting_send());
    drop(server);
}
