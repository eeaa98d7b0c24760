//! IRC case-mapping functions.
//!
//! IRC uses a special case-insensitive comparison where some characters
//! are considered equivalent (e.g., `[` and `{`). The server advertises
//! which rule it uses through the `CASEMAPPING` ISUPPORT token; `rfc1459`
//! is assumed until told otherwise.

/// Case-mapping rule negotiated with the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CaseMapping {
    /// Only `A-Z` fold to `a-z`.
    Ascii,
    /// ASCII plus `[]\^` fold to `{}|~`.
    #[default]
    Rfc1459,
    /// ASCII plus `[]\` fold to `{}|`.
    StrictRfc1459,
}

impl CaseMapping {
    /// Parse a `CASEMAPPING` token value.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "ascii" => Some(Self::Ascii),
            "rfc1459" => Some(Self::Rfc1459),
            "strict-rfc1459" => Some(Self::StrictRfc1459),
            _ => None,
        }
    }

    /// The token name of this mapping.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Rfc1459 => "rfc1459",
            Self::StrictRfc1459 => "strict-rfc1459",
        }
    }

    /// Fold one character to its lowercase form.
    #[inline]
    pub fn fold_char(self, c: char) -> char {
        match (self, c) {
            (_, 'A'..='Z') => c.to_ascii_lowercase(),
            (Self::Rfc1459 | Self::StrictRfc1459, '[') => '{',
            (Self::Rfc1459 | Self::StrictRfc1459, ']') => '}',
            (Self::Rfc1459 | Self::StrictRfc1459, '\\') => '|',
            (Self::Rfc1459, '^') => '~',
            _ => c,
        }
    }

    /// Convert a string to its lowercase lookup key.
    pub fn to_lower(self, s: &str) -> String {
        s.chars().map(|c| self.fold_char(c)).collect()
    }

    /// Compare two strings under this mapping.
    pub fn equals(self, a: &str, b: &str) -> bool {
        if a.len() != b.len() {
            return false;
        }
        a.chars()
            .zip(b.chars())
            .all(|(ca, cb)| self.fold_char(ca) == self.fold_char(cb))
    }
}

impl std::fmt::Display for CaseMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Convert a string to IRC lowercase using RFC 1459 case mapping.
pub fn irc_to_lower(s: &str) -> String {
    CaseMapping::Rfc1459.to_lower(s)
}

/// Compare two strings using RFC 1459 case-insensitive comparison.
pub fn irc_eq(a: &str, b: &str) -> bool {
    CaseMapping::Rfc1459.equals(a, b)
}
