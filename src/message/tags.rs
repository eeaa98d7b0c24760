//! IRCv3 message tags: escaping and the owned [`Tags`] collection.

use std::fmt::{Result as FmtResult, Write};

/// Escape a tag value for serialization.
///
/// Escapes special characters according to the IRCv3 message-tags spec.
pub fn escape_tag_value(f: &mut dyn Write, value: &str) -> FmtResult {
    for c in value.chars() {
        match c {
            ';' => f.write_str("\\:")?,
            ' ' => f.write_str("\\s")?,
            '\\' => f.write_str("\\\\")?,
            '\r' => f.write_str("\\r")?,
            '\n' => f.write_str("\\n")?,
            c => f.write_char(c)?,
        }
    }
    Ok(())
}

/// Unescape a tag value from wire format.
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(c) => c,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

/// An ordered, owned set of message tags.
///
/// Values are immutable once built: [`Tags::with`] consumes and returns
/// the collection, so a `Tags` handed to a send call is never shared
/// mutable state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tags(Vec<(String, Option<String>)>);

impl Tags {
    /// An empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tag.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        let key = key.into();
        let value = value.map(str::to_owned);
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
        self
    }

    /// Parse the raw tag section of an incoming line (without the `@`).
    pub fn parse(raw: &str) -> Self {
        let tags = raw
            .split(';')
            .filter(|t| !t.is_empty())
            .map(|t| match t.split_once('=') {
                Some((k, v)) if !v.is_empty() => (k.to_owned(), Some(unescape_tag_value(v))),
                Some((k, _)) => (k.to_owned(), None),
                None => (t.to_owned(), None),
            })
            .collect();
        Self(tags)
    }

    /// Look up a tag. The outer `Option` is presence, the inner the value.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    /// Iterate tags in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render the outbound prefix `@tag=value,tag2 `, or an empty string.
    pub fn to_prefix(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let mut out = String::from("@");
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(key);
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                out.push('=');
                // Writing into a String cannot fail.
                let _ = escape_tag_value(&mut out, value);
            }
        }
        out.push(' ');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_combined() {
        let input = "a\\:b\\sc\\\\d\\re\\nf";
        assert_eq!(unescape_tag_value(input), "a;b c\\d\re\nf");
    }

    #[test]
    fn test_unescape_trailing_backslash() {
        assert_eq!(unescape_tag_value("test\\"), "test");
    }

    #[test]
    fn test_parse_tags() {
        let tags = Tags::parse("time=2023-01-01T00:00:00Z;+draft/reply=a\\sb;bot");
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.get("time"), Some(Some("2023-01-01T00:00:00Z")));
        assert_eq!(tags.get("+draft/reply"), Some(Some("a b")));
        assert_eq!(tags.get("bot"), Some(None));
        assert_eq!(tags.get("msgid"), None);
    }

    #[test]
    fn test_prefix_format() {
        assert_eq!(Tags::new().to_prefix(), "");

        let tags = Tags::new()
            .with("+draft/reply", Some("abc"))
            .with("+typing", None);
        assert_eq!(tags.to_prefix(), "@+draft/reply=abc,+typing ");
    }

    #[test]
    fn test_with_replaces_and_escapes() {
        let tags = Tags::new().with("k", Some("one")).with("k", Some("a b"));
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.to_prefix(), "@k=a\\sb ");
    }
}
