//! Parsed view of an incoming IRC line.

mod nom_parser;
pub mod tags;

pub use self::nom_parser::ParsedLine;
pub use self::tags::Tags;

use crate::error::MessageParseError;

/// Message source (`nick!user@host` or a server name).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Source<'a> {
    /// The full source as sent.
    pub raw: &'a str,
    /// Nickname, or the server name for server sources.
    pub nickname: &'a str,
    /// Username part, if present.
    pub username: Option<&'a str>,
    /// Hostname part, if present.
    pub hostname: Option<&'a str>,
}

impl<'a> Source<'a> {
    /// Split a raw source string.
    pub fn parse(raw: &'a str) -> Self {
        let (rest, hostname) = match raw.split_once('@') {
            Some((rest, host)) => (rest, Some(host)),
            None => (raw, None),
        };
        let (nickname, username) = match rest.split_once('!') {
            Some((nick, user)) => (nick, Some(user)),
            None => (rest, None),
        };
        Self {
            raw,
            nickname,
            username,
            hostname,
        }
    }

    /// Whether this source names a user rather than a server.
    pub fn is_user(&self) -> bool {
        self.username.is_some() || self.hostname.is_some() || !self.nickname.contains('.')
    }
}

/// A parsed incoming line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrcLine<'a> {
    /// Raw tag section (without `@`).
    pub tags: Option<&'a str>,
    /// Message source.
    pub source: Option<Source<'a>>,
    /// Command name or three-digit numeric.
    pub command: &'a str,
    /// Parameters, trailing included.
    pub params: Vec<&'a str>,
    /// The line as received.
    pub raw: &'a str,
}

impl<'a> IrcLine<'a> {
    /// Parse a decoded line.
    pub fn parse(raw: &'a str) -> Result<Self, MessageParseError> {
        let parsed = ParsedLine::parse(raw)?;
        Ok(Self {
            tags: parsed.tags,
            source: parsed.source.map(Source::parse),
            command: parsed.command,
            params: parsed.params,
            raw,
        })
    }

    /// Parameter at `index`.
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.params.get(index).copied()
    }

    /// Case-insensitive command comparison.
    pub fn is(&self, command: &str) -> bool {
        self.command.eq_ignore_ascii_case(command)
    }

    /// The numeric reply code, for three-digit commands.
    pub fn numeric(&self) -> Option<u16> {
        if self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit()) {
            self.command.parse().ok()
        } else {
            None
        }
    }

    /// Nickname of the source, when the source is a user.
    pub fn source_nick(&self) -> Option<&'a str> {
        self.source
            .filter(|s| s.is_user())
            .map(|s| s.nickname)
    }

    /// Owned, unescaped tags.
    pub fn tags(&self) -> Tags {
        self.tags.map(Tags::parse).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_forms() {
        let full = Source::parse("nick!user@host.example");
        assert_eq!(full.nickname, "nick");
        assert_eq!(full.username, Some("user"));
        assert_eq!(full.hostname, Some("host.example"));
        assert!(full.is_user());

        let server = Source::parse("irc.example.net");
        assert_eq!(server.nickname, "irc.example.net");
        assert!(!server.is_user());

        assert!(Source::parse("nick").is_user());
    }

    #[test]
    fn test_line_accessors() {
        let line = IrcLine::parse("@msgid=x :alice!a@h PRIVMSG #rust :hi there").unwrap();
        assert!(line.is("privmsg"));
        assert_eq!(line.source_nick(), Some("alice"));
        assert_eq!(line.arg(1), Some("hi there"));
        assert_eq!(line.tags().get("msgid"), Some(Some("x")));
        assert_eq!(line.numeric(), None);
    }

    #[test]
    fn test_numeric() {
        let line = IrcLine::parse(":irc.example.net 001 bot :Welcome").unwrap();
        assert_eq!(line.numeric(), Some(1));
        assert_eq!(line.source_nick(), None);
    }
}
