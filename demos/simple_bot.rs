//! Simple IRC bot
//!
//! Connects to one server, joins a channel once registered and echoes
//! anything addressed to it. Settings come from the environment:
//!
//! ```text
//! IRC_HOST=irc.libera.chat IRC_PORT=6697 IRC_TLS=1 IRC_NICK=slirc-bot \
//! IRC_CHANNEL='#slirc-test' RUST_LOG=slirc_engine=debug \
//!     cargo run --example simple_bot
//! ```

use std::env;
use std::sync::Arc;

use anyhow::Context;
use slirc_engine::{
    Connection, Dispatcher, Event, EventKind, IrcLine, MemoryStore, Outcome, Reactor,
    ServerConfig, Tags,
};
use tracing_subscriber::EnvFilter;

fn on_raw(
    channel: String,
) -> impl Fn(&mut Connection, &Event) -> slirc_engine::Result<()> + Send + Sync + 'static {
    move |conn, event| {
        let Event::Raw { line } = event else {
            return Ok(());
        };
        let Ok(line) = IrcLine::parse(line) else {
            return Ok(());
        };

        if line.numeric() == Some(1) {
            conn.send_join(&channel, None);
            return Ok(());
        }

        if line.is("PRIVMSG") {
            let (Some(sender), Some(target), Some(text)) =
                (line.source_nick(), line.arg(0), line.arg(1))
            else {
                return Ok(());
            };
            let mention = format!("{}:", conn.nickname());
            if conn.is_own_nickname(target) {
                conn.send_message(sender, text, None, &Tags::new())?;
            } else if let Some(rest) = text.strip_prefix(&mention) {
                let reply = format!("{}: {}", sender, rest.trim());
                conn.send_message(target, &reply, None, &Tags::new())?;
            }
        }
        Ok(())
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = env::var("IRC_HOST").unwrap_or_else(|_| "irc.libera.chat".into());
    let port = env::var("IRC_PORT")
        .unwrap_or_else(|_| "6697".into())
        .parse()
        .context("IRC_PORT must be a port number")?;
    let nickname = env::var("IRC_NICK").unwrap_or_else(|_| "slirc-bot".into());
    let channel = env::var("IRC_CHANNEL").unwrap_or_else(|_| "#slirc-test".into());

    let mut config = ServerConfig::new(1, &host, port, &nickname);
    config.tls = env::var("IRC_TLS").map(|v| v != "0").unwrap_or(true);
    config.capabilities = vec!["server-time".into(), "message-tags".into()];

    let dispatcher = Dispatcher::builder()
        .with_core_handlers()
        .on(EventKind::Raw, on_raw(channel))
        .on(EventKind::Disconnected, |conn, _| {
            tracing::warn!(server = %conn, "disconnected");
            Ok(())
        })
        .build();

    let store = Arc::new(MemoryStore::new());
    let mut reactor = Reactor::new();
    reactor.add(Connection::from_store(config, store, dispatcher)?);

    for (connection, outcome) in reactor.run().await {
        if let Outcome::Failed(e) = outcome {
            anyhow::bail!("{} failed: {}", connection, e);
        }
    }
    Ok(())
}
