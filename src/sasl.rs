//! SASL payload encoding for `AUTHENTICATE`.
//!
//! Only the mechanisms a bot needs at registration are provided: PLAIN
//! (account and password) and EXTERNAL (TLS client certificate).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Maximum payload bytes per `AUTHENTICATE` line.
pub const SASL_CHUNK_SIZE: usize = 400;

/// Supported SASL mechanisms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslMechanism {
    /// `PLAIN` (RFC 4616).
    Plain,
    /// `EXTERNAL` (RFC 4422 appendix A).
    External,
}

impl SaslMechanism {
    /// Mechanism name as sent in `AUTHENTICATE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::External => "EXTERNAL",
        }
    }
}

/// Encode PLAIN credentials: `base64("\0account\0password")`.
pub fn encode_plain(account: &str, password: &str) -> String {
    BASE64.encode(format!("\0{}\0{}", account, password))
}

/// Encode an EXTERNAL response; `+` when no authzid is given.
pub fn encode_external(authzid: Option<&str>) -> String {
    match authzid {
        Some(id) if !id.is_empty() => BASE64.encode(id),
        _ => "+".to_owned(),
    }
}

/// Split an encoded response into `AUTHENTICATE` arguments.
///
/// A response whose length is an exact multiple of [`SASL_CHUNK_SIZE`] is
/// followed by a lone `+`.
pub fn authenticate_chunks(encoded: &str) -> Vec<String> {
    let mut chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(SASL_CHUNK_SIZE)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    if encoded.is_empty() || encoded.len() % SASL_CHUNK_SIZE == 0 {
        chunks.push("+".to_owned());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_plain() {
        assert_eq!(encode_plain("bot", "hunter2"), "AGJvdABodW50ZXIy");
    }

    #[test]
    fn test_encode_external() {
        assert_eq!(encode_external(None), "+");
        assert_eq!(encode_external(Some("")), "+");
        assert_eq!(encode_external(Some("bot")), "Ym90");
    }

    #[test]
    fn test_chunking() {
        assert_eq!(authenticate_chunks("abc"), vec!["abc"]);

        let exact = "a".repeat(SASL_CHUNK_SIZE);
        let chunks = authenticate_chunks(&exact);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "+");

        let long = "b".repeat(SASL_CHUNK_SIZE + 10);
        let chunks = authenticate_chunks(&long);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 10);
    }
}
