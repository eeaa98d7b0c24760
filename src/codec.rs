//! Line framing for the IRC byte stream.
//!
//! [`FrameCodec`] splits incoming bytes on LF, strips a trailing CR and
//! decodes each line with the configured primary encoding, falling back to
//! a second encoding. Lines that decode under neither are dropped. An
//! incomplete trailing fragment is kept until the rest of it arrives.
//!
//! Outbound lines are cut at the first LF, truncated to
//! [`MAX_LINE_BYTES`] encoded bytes and terminated with CRLF.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use encoding::Encoding;
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::ConfigError;
use crate::util::truncate_utf8_safe;

/// Maximum encoded length of an outbound line, before CRLF.
pub const MAX_LINE_BYTES: usize = 450;

/// Default primary encoding label.
pub const DEFAULT_ENCODING: &str = "utf-8";

/// Default fallback encoding label.
pub const DEFAULT_FALLBACK_ENCODING: &str = "latin1";

/// Resolve an `encoding_rs` label.
pub fn lookup_encoding(label: &str) -> Result<&'static Encoding, ConfigError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| ConfigError::UnknownEncoding(label.to_string()))
}

/// Byte stream to text line codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    encoding: &'static Encoding,
    fallback: &'static Encoding,
    buffer: BytesMut,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            encoding: encoding::UTF_8,
            fallback: encoding::WINDOWS_1252,
            buffer: BytesMut::new(),
        }
    }
}

impl FrameCodec {
    /// Create a codec from encoding labels.
    pub fn new(encoding: &str, fallback: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            encoding: lookup_encoding(encoding)?,
            fallback: lookup_encoding(fallback)?,
            buffer: BytesMut::new(),
        })
    }

    /// The primary encoding.
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// The fallback encoding.
    pub fn fallback(&self) -> &'static Encoding {
        self.fallback
    }

    /// Bytes held back from the last [`feed`](Self::feed).
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop any partial line (used when a connection is re-established).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append newly read bytes and return every complete line.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Ok(Some(line)) = self.decode(&mut buffer) {
            lines.push(line);
        }

        if !buffer.is_empty() {
            trace!(
                fragment = ?String::from_utf8_lossy(&buffer),
                "buffered incomplete line"
            );
        }
        self.buffer = buffer;
        lines
    }

    /// Decode one complete line (terminator already removed).
    pub fn decode_line(&self, raw: &[u8]) -> Option<String> {
        if let Some(line) = self
            .encoding
            .decode_without_bom_handling_and_without_replacement(raw)
        {
            return Some(line.into_owned());
        }

        trace!(encoding = self.encoding.name(), "can't decode line, falling back");
        let line = self
            .fallback
            .decode_without_bom_handling_and_without_replacement(raw)
            .map(Cow::into_owned);
        if line.is_none() {
            trace!(fallback = self.fallback.name(), "dropping undecodable line");
        }
        line
    }

    /// Encode an outbound line, truncated and CRLF terminated.
    pub fn encode_line(&self, line: &str) -> Bytes {
        let line = line.split('\n').next().unwrap_or_default();
        let line = line.trim_matches('\r');

        let mut out = BytesMut::with_capacity(line.len().min(MAX_LINE_BYTES) + 2);
        if self.encoding == encoding::UTF_8 {
            out.put_slice(truncate_utf8_safe(line, MAX_LINE_BYTES).as_bytes());
        } else {
            let (encoded, _, _) = self.encoding.encode(line);
            out.put_slice(&encoded[..encoded.len().min(MAX_LINE_BYTES)]);
        }
        out.put_slice(b"\r\n");
        out.freeze()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(pos) = src.iter().position(|&b| b == b'\n') {
            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }

            if let Some(decoded) = self.decode_line(&line) {
                return Ok(Some(decoded));
            }
        }
        Ok(None)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&self.encode_line(&item));
        Ok(())
    }
}
