//! `RPL_ISUPPORT` (005) token parsing.
//!
//! Only the tokens the engine acts on get typed accessors; everything else
//! is reachable through [`Isupport::get`].

use crate::casemap::CaseMapping;

/// One `KEY[=VALUE]` token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IsupportEntry<'a> {
    pub key: &'a str,
    pub value: Option<&'a str>,
}

/// Tokens from a single 005 line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Isupport<'a> {
    entries: Vec<IsupportEntry<'a>>,
}

impl<'a> Isupport<'a> {
    pub fn parse_params(params: &[&'a str]) -> Self {
        let entries = params
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((key, value)) => IsupportEntry {
                    key,
                    value: Some(value),
                },
                None => IsupportEntry { key: p, value: None },
            })
            .collect();
        Isupport { entries }
    }

    /// Build from 005 parameters: `<client> <tokens...> :are supported`.
    pub fn from_reply_params(params: &[&'a str]) -> Option<Self> {
        if params.len() < 2 {
            return None;
        }
        let mut tokens = &params[1..];
        if let Some(last) = tokens.last() {
            if last.contains(' ') {
                tokens = &tokens[..tokens.len() - 1];
            }
        }
        Some(Self::parse_params(tokens))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IsupportEntry<'a>> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<Option<&'a str>> {
        self.entries
            .iter()
            .rfind(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value)
    }

    pub fn casemapping(&self) -> Option<CaseMapping> {
        self.get("CASEMAPPING")
            .flatten()
            .and_then(CaseMapping::from_token)
    }

    pub fn chantypes(&self) -> Option<&'a str> {
        self.get("CHANTYPES").flatten()
    }

    pub fn network(&self) -> Option<&'a str> {
        self.get("NETWORK").flatten()
    }

    pub fn prefix(&self) -> Option<PrefixSpec<'a>> {
        self.get("PREFIX").flatten().and_then(PrefixSpec::parse)
    }
}

/// `PREFIX=(modes)symbols`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefixSpec<'a> {
    pub modes: &'a str,
    pub prefixes: &'a str,
}

impl<'a> PrefixSpec<'a> {
    pub fn parse(s: &'a str) -> Option<Self> {
        let rest = s.strip_prefix('(')?;
        let (modes, prefixes) = rest.split_once(')')?;
        if modes.is_empty() || modes.chars().count() != prefixes.chars().count() {
            return None;
        }
        Some(PrefixSpec { modes, prefixes })
    }

    /// `(mode, symbol)` pairs in rank order.
    pub fn pairs(&self) -> impl Iterator<Item = (char, char)> + 'a {
        self.modes.chars().zip(self.prefixes.chars())
    }
}
