//! Built-in protocol handlers.
//!
//! These keep the connection's own state (capabilities, SASL, registration,
//! membership, activity buffers) consistent with what the server says.
//! They are installed by [`DispatcherBuilder::with_core_handlers`] and run
//! for every [`Event::Raw`].
//!
//! [`DispatcherBuilder::with_core_handlers`]: crate::event::DispatcherBuilder::with_core_handlers

use tracing::{debug, info, warn};

use crate::caps::{parse_cap_list, NegotiationState};
use crate::connection::{Connection, ConnectionState};
use crate::error::Result;
use crate::event::Event;
use crate::isupport::Isupport;
use crate::message::{IrcLine, Source};
use crate::sasl::{authenticate_chunks, encode_external, encode_plain, SaslMechanism};
use crate::util::ctcp_action;

const RPL_WELCOME: u16 = 1;
const RPL_ISUPPORT: u16 = 5;
const RPL_TOPIC: u16 = 332;
const RPL_NAMREPLY: u16 = 353;
const ERR_NICKNAMEINUSE: u16 = 433;
const ERR_NICKLOCKED: u16 = 902;
const RPL_SASLSUCCESS: u16 = 903;
const RPL_SASLMECHS: u16 = 908;

const SASL: &str = "sasl";

pub(crate) fn handle_raw(conn: &mut Connection, event: &Event) -> Result<()> {
    let Event::Raw { line } = event else {
        return Ok(());
    };
    let line = match IrcLine::parse(line) {
        Ok(line) => line,
        Err(e) => {
            debug!(server = %conn, "ignoring unparsable line: {}", e);
            return Ok(());
        }
    };

    if let Some(numeric) = line.numeric() {
        return handle_numeric(conn, numeric, &line);
    }

    match line.command.to_ascii_uppercase().as_str() {
        "PING" => {
            conn.send_pong(line.arg(0).unwrap_or_default());
            Ok(())
        }
        "CAP" => handle_cap(conn, &line),
        "AUTHENTICATE" => {
            handle_authenticate(conn, &line);
            Ok(())
        }
        "JOIN" => handle_join(conn, &line),
        "PART" => {
            if let (Some(nick), Some(channel)) = (line.source_nick(), line.arg(0)) {
                leave(conn, nick, channel);
            }
            Ok(())
        }
        "KICK" => {
            if let (Some(channel), Some(target)) = (line.arg(0), line.arg(1)) {
                leave(conn, target, channel);
            }
            Ok(())
        }
        "QUIT" => {
            if let Some(nick) = line.source_nick() {
                if !conn.is_own_nickname(nick) {
                    conn.registry_mut().remove_user(nick);
                }
            }
            Ok(())
        }
        "NICK" => {
            handle_nick(conn, &line);
            Ok(())
        }
        "PRIVMSG" => {
            record_message(conn, &line, false);
            Ok(())
        }
        "NOTICE" => {
            record_message(conn, &line, true);
            Ok(())
        }
        "MODE" => {
            handle_mode(conn, &line);
            Ok(())
        }
        "TOPIC" => {
            if let (Some(channel), Some(topic)) = (line.arg(0), line.arg(1)) {
                if let Some(channel) = conn.registry_mut().channel_mut(channel) {
                    channel.topic = Some(topic.to_owned());
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn handle_numeric(conn: &mut Connection, numeric: u16, line: &IrcLine<'_>) -> Result<()> {
    match numeric {
        RPL_WELCOME => {
            if let Some(nick) = line.arg(0) {
                conn.set_own_nickname(nick);
            }
            if let Some(source) = line.source {
                conn.set_server_name(source.nickname);
            }
            conn.set_state(ConnectionState::Registered);
            info!(server = %conn, nickname = conn.nickname(), "registered");
        }
        RPL_ISUPPORT => handle_isupport(conn, line),
        RPL_TOPIC => {
            if let (Some(channel), Some(topic)) = (line.arg(1), line.arg(2)) {
                if let Some(channel) = conn.registry_mut().channel_mut(channel) {
                    channel.topic = Some(topic.to_owned());
                }
            }
        }
        RPL_NAMREPLY => handle_names(conn, line)?,
        ERR_NICKNAMEINUSE if conn.state() != ConnectionState::Registered => {
            let retry = format!("{}_", conn.nickname());
            warn!(server = %conn, nickname = conn.nickname(), "nickname in use, trying {}", retry);
            conn.set_own_nickname(&retry);
            conn.send_nick(&retry);
        }
        ERR_NICKLOCKED..=RPL_SASLMECHS => {
            // 903 succeeded; the rest end the exchange unsuccessfully.
            if numeric != RPL_SASLSUCCESS {
                warn!(server = %conn, numeric, "SASL authentication failed");
            }
            if conn.capabilities().is_waiting(SASL) {
                conn.capability_done(SASL)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn handle_cap(conn: &mut Connection, line: &IrcLine<'_>) -> Result<()> {
    let Some(subcommand) = line.arg(1) else {
        return Ok(());
    };
    // `CAP * LS * :list` marks a continuation of a multiline reply.
    let multiline = line.params.len() >= 4 && line.arg(2) == Some("*");
    let list = line.params.last().copied().unwrap_or_default();

    match subcommand.to_ascii_uppercase().as_str() {
        "LS" => {
            conn.capabilities_mut().record_offered(list);
            if !multiline && conn.negotiation_state() == NegotiationState::Listing {
                request_capabilities(conn);
            }
        }
        "ACK" => {
            for (name, _) in parse_cap_list(list) {
                if let Some(name) = name.strip_prefix('-') {
                    conn.capabilities_mut().disable(name);
                    continue;
                }
                conn.capabilities_mut().enable(name);
                if name == SASL && conn.capabilities().is_held(SASL) {
                    if let Some(mechanism) = sasl_mechanism(conn) {
                        conn.send_authenticate(mechanism.as_str());
                    }
                } else if conn.capabilities().is_waiting(name) && !conn.capabilities().is_held(name) {
                    conn.capability_done(name)?;
                }
            }
        }
        "NAK" => {
            for (name, _) in parse_cap_list(list) {
                if conn.capabilities().is_waiting(name) {
                    conn.capability_done(name)?;
                }
            }
        }
        "NEW" => conn.capabilities_mut().record_offered(list),
        "DEL" => conn.capabilities_mut().record_withdrawn(list),
        _ => {}
    }
    Ok(())
}

/// Request every wanted capability the server offered, or end negotiation.
fn request_capabilities(conn: &mut Connection) {
    let mut wanted: Vec<String> = conn
        .config()
        .capabilities
        .iter()
        .filter(|cap| conn.capabilities().is_offered(cap))
        .cloned()
        .collect();

    let sasl_offered = sasl_mechanism(conn).is_some_and(|mechanism| {
        conn.capabilities().offered_value(SASL).map_or(true, |mechs| {
            mechs
                .split(',')
                .any(|m| m.eq_ignore_ascii_case(mechanism.as_str()))
        })
    });
    if conn.capabilities().is_offered(SASL) && sasl_offered {
        conn.wait_for_capability(SASL);
        if !wanted.iter().any(|cap| cap == SASL) {
            wanted.push(SASL.to_owned());
        }
    }

    if wanted.is_empty() {
        conn.send_capability_end();
        return;
    }
    conn.queue_capabilities(wanted);
    conn.send_capability_queue();
}

/// PLAIN when credentials are configured, else EXTERNAL when a TLS client
/// certificate will be presented.
fn sasl_mechanism(conn: &Connection) -> Option<SaslMechanism> {
    if conn.config().sasl.is_some() {
        Some(SaslMechanism::Plain)
    } else if conn.config().tls && conn.settings().client_auth().is_some() {
        Some(SaslMechanism::External)
    } else {
        None
    }
}

fn handle_authenticate(conn: &mut Connection, line: &IrcLine<'_>) {
    if line.arg(0) != Some("+") || !conn.capabilities().is_waiting(SASL) {
        return;
    }
    let payload = match (sasl_mechanism(conn), conn.config().sasl.as_ref()) {
        (Some(SaslMechanism::Plain), Some(credentials)) => {
            encode_plain(&credentials.account, &credentials.password)
        }
        (Some(SaslMechanism::External), _) => encode_external(None),
        _ => return,
    };
    for chunk in authenticate_chunks(&payload) {
        conn.send_authenticate(&chunk);
    }
}

fn handle_isupport(conn: &mut Connection, line: &IrcLine<'_>) {
    let Some(isupport) = Isupport::from_reply_params(&line.params) else {
        return;
    };
    for entry in isupport.iter() {
        conn.record_isupport(entry.key, entry.value);
    }
    if let Some(mapping) = isupport.casemapping() {
        conn.registry_mut().set_case_mapping(mapping);
    }
    if let Some(types) = isupport.chantypes() {
        conn.registry_mut().set_channel_types(types);
    }
    if let Some(prefix) = isupport.prefix() {
        conn.set_prefix_modes(prefix.pairs().collect());
    }
}

fn handle_join(conn: &mut Connection, line: &IrcLine<'_>) -> Result<()> {
    let (Some(source), Some(channels)) = (line.source, line.arg(0)) else {
        return Ok(());
    };
    for channel in channels.split(',') {
        if !conn.registry().is_channel_name(channel) {
            continue;
        }
        conn.registry_mut().join(source.nickname, channel, "")?;
    }
    remember_host(conn, &source);
    Ok(())
}

/// Remove `nickname` from `channel`; our own departure drops the channel.
///
/// Any other user left with no shared channel is forgotten.
fn leave(conn: &mut Connection, nickname: &str, channel: &str) {
    if conn.is_own_nickname(nickname) {
        let Some(channel) = conn.registry_mut().remove_channel(channel) else {
            return;
        };
        let orphaned: Vec<String> = channel
            .members()
            .filter(|member| !conn.is_own_nickname(member))
            .filter(|member| conn.registry().user(member).is_some_and(|u| u.channel_count() == 0))
            .map(str::to_owned)
            .collect();
        for member in orphaned {
            conn.registry_mut().remove_user(&member);
        }
        return;
    }
    let registry = conn.registry_mut();
    registry.part(nickname, channel);
    if registry.user(nickname).is_some_and(|u| u.channel_count() == 0) {
        registry.remove_user(nickname);
    }
}

fn handle_nick(conn: &mut Connection, line: &IrcLine<'_>) {
    let (Some(old), Some(new)) = (line.source_nick(), line.arg(0)) else {
        return;
    };
    if conn.is_own_nickname(old) {
        conn.set_own_nickname(new);
    }
    if conn.registry().has_user(old) {
        if let Err(e) = conn.registry_mut().change_user_nickname(old, new) {
            debug!(server = %conn, "nick change ignored: {}", e);
        }
    }
}

fn handle_names(conn: &mut Connection, line: &IrcLine<'_>) -> Result<()> {
    // <client> <symbol> <channel> :<names>
    let (Some(channel), Some(names)) = (line.arg(2), line.arg(3)) else {
        return Ok(());
    };
    if !conn.registry().has_channel(channel) {
        return Ok(());
    }
    for name in names.split_whitespace() {
        let mut modes = String::new();
        let mut rest = name;
        while let Some(c) = rest.chars().next() {
            match conn.prefix_mode_for_symbol(c) {
                Some(mode) => {
                    modes.push(mode);
                    rest = &rest[c.len_utf8()..];
                }
                None => break,
            }
        }
        let source = Source::parse(rest);
        if source.nickname.is_empty() {
            continue;
        }
        conn.registry_mut().join(source.nickname, channel, &modes)?;
        remember_host(conn, &source);
    }
    Ok(())
}

fn remember_host(conn: &mut Connection, source: &Source<'_>) {
    if source.username.is_none() && source.hostname.is_none() {
        return;
    }
    if let Some(user) = conn.registry_mut().user_mut(source.nickname) {
        if let Some(username) = source.username {
            user.username = Some(username.to_owned());
        }
        if let Some(hostname) = source.hostname {
            user.hostname = Some(hostname.to_owned());
        }
    }
}

fn record_message(conn: &mut Connection, line: &IrcLine<'_>, notice: bool) {
    let (Some(source), Some(target), Some(message)) = (line.source, line.arg(0), line.arg(1)) else {
        return;
    };
    if !source.is_user() {
        return;
    }
    let tags = line.tags();
    let (text, action) = match ctcp_action(message) {
        Some(inner) if !notice => (inner, true),
        _ => (message, false),
    };

    let registry = conn.registry_mut();
    if registry.get_user(source.nickname, true).is_none() {
        return;
    }
    remember_host(conn, &source);

    let registry = conn.registry_mut();
    let buffer = if registry.has_channel(target) {
        registry.channel_mut(target).map(|c| &mut c.buffer)
    } else {
        registry.user_mut(source.nickname).map(|u| &mut u.buffer)
    };
    if let Some(buffer) = buffer {
        if notice {
            buffer.add_notice(Some(source.nickname), text, &tags, false);
        } else {
            buffer.add_message(Some(source.nickname), text, action, &tags, false);
        }
    }
}

/// Track our own user modes and channel prefix modes.
fn handle_mode(conn: &mut Connection, line: &IrcLine<'_>) {
    let (Some(target), Some(modes)) = (line.arg(0), line.arg(1)) else {
        return;
    };
    let mut args = line.params.iter().skip(2).copied();

    if conn.is_own_nickname(target) {
        let mut remove = false;
        for c in modes.chars() {
            match c {
                '+' => remove = false,
                '-' => remove = true,
                mode => conn.change_own_mode(remove, mode, None),
            }
        }
        return;
    }
    if !conn.registry().has_channel(target) {
        return;
    }

    // CHANMODES=A,B,C,D: A and B always take a parameter, C only when set.
    let chanmodes = conn
        .isupport("CHANMODES")
        .flatten()
        .unwrap_or_default()
        .to_owned();
    let groups: Vec<&str> = chanmodes.split(',').collect();
    let in_group = |index: usize, mode: char| groups.get(index).is_some_and(|g| g.contains(mode));

    let mut adding = true;
    for c in modes.chars() {
        match c {
            '+' => adding = true,
            '-' => adding = false,
            mode if conn.is_prefix_mode(mode) => {
                let Some(nickname) = args.next() else {
                    break;
                };
                let key = conn.registry().fold(nickname);
                if let Some(channel) = conn.registry_mut().channel_mut(target) {
                    channel.set_member_mode(&key, mode, adding);
                }
            }
            mode if in_group(0, mode) || in_group(1, mode) || (adding && in_group(2, mode)) => {
                args.next();
            }
            _ => {}
        }
    }
}
