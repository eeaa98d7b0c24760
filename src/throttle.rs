//! Outbound line queue with a sliding-window rate limit.
//!
//! At most [`RateLimit::lines`] lines may *start* within any trailing
//! [`RateLimit::window`]. A line that has started is always finished first,
//! without further throttling, so partial socket writes never interleave or
//! reorder lines.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Default number of lines per window.
pub const DEFAULT_THROTTLE_LINES: usize = 4;

/// Default window length.
pub const DEFAULT_THROTTLE_WINDOW: Duration = Duration::from_secs(1);

/// Rate limit parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimit {
    /// Lines that may start within one window.
    pub lines: usize,
    /// Trailing window length.
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            lines: DEFAULT_THROTTLE_LINES,
            window: DEFAULT_THROTTLE_WINDOW,
        }
    }
}

/// FIFO of encoded lines released under a [`RateLimit`].
#[derive(Debug, Default)]
pub struct OutboundThrottler {
    limit: RateLimit,
    queue: VecDeque<Bytes>,
    in_flight: Bytes,
    recent_sends: VecDeque<Instant>,
    last_send: Option<Instant>,
}

impl OutboundThrottler {
    /// Create an empty throttler.
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// The configured limit.
    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Append a fully encoded line (CRLF included).
    pub fn enqueue(&mut self, frame: Bytes) {
        self.queue.push_back(frame);
    }

    /// Lines waiting to start.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Lines waiting to start, oldest first.
    pub fn queued_frames(&self) -> impl Iterator<Item = &Bytes> {
        self.queue.iter()
    }

    /// Whether a line is in flight or queued.
    pub fn has_pending_work(&self) -> bool {
        !self.in_flight.is_empty() || !self.queue.is_empty()
    }

    /// When the most recent line was started.
    pub fn last_send(&self) -> Option<Instant> {
        self.last_send
    }

    /// Zero when a line may be written now, else the remaining wait.
    ///
    /// Timestamps older than the window are pruned as a side effect.
    pub fn time_until_send_allowed(&mut self, now: Instant) -> Duration {
        if !self.in_flight.is_empty() {
            return Duration::ZERO;
        }

        let window = self.limit.window;
        while let Some(&sent) = self.recent_sends.front() {
            if now.saturating_duration_since(sent) >= window {
                self.recent_sends.pop_front();
            } else {
                break;
            }
        }

        if self.recent_sends.len() < self.limit.lines {
            return Duration::ZERO;
        }
        match self.recent_sends.front() {
            Some(&oldest) => (oldest + window).saturating_duration_since(now),
            None => window,
        }
    }

    /// Bytes to write now, starting the next queued line if allowed.
    pub fn next_chunk(&mut self, now: Instant) -> Option<&[u8]> {
        if self.in_flight.is_empty() {
            if self.queue.is_empty() || !self.time_until_send_allowed(now).is_zero() {
                return None;
            }
            self.in_flight = self.queue.pop_front()?;
            self.recent_sends.push_back(now);
            self.last_send = Some(now);
        }
        Some(&self.in_flight)
    }

    /// Mark `written` bytes of the in-flight line as sent.
    pub fn advance(&mut self, written: usize) {
        self.in_flight.advance(written.min(self.in_flight.len()));
    }

    /// Write as much of the current line as the socket accepts.
    ///
    /// Returns the number of bytes written; zero means nothing was allowed
    /// or nothing was pending.
    pub async fn try_send<W>(&mut self, writer: &mut W, now: Instant) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(chunk) = self.next_chunk(now) else {
            return Ok(0);
        };
        let written = writer.write(chunk).await?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        self.advance(written);
        Ok(written)
    }

    /// Drop everything queued or in flight.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.in_flight.clear();
        self.recent_sends.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(text: &str) -> Bytes {
        Bytes::from(format!("{}\r\n", text))
    }

    fn send_whole(throttler: &mut OutboundThrottler, now: Instant) -> bool {
        match throttler.next_chunk(now) {
            Some(chunk) => {
                let n = chunk.len();
                throttler.advance(n);
                true
            }
            None => false,
        }
    }

    #[test]
    fn test_four_per_window() {
        let start = Instant::now();
        let mut throttler = OutboundThrottler::new(RateLimit::default());
        for i in 0..10 {
            throttler.enqueue(line(&format!("PRIVMSG #c :{}", i)));
        }

        for _ in 0..4 {
            assert_eq!(throttler.time_until_send_allowed(start), Duration::ZERO);
            assert!(send_whole(&mut throttler, start));
        }

        let wait = throttler.time_until_send_allowed(start);
        assert!(wait > Duration::ZERO);
        assert_eq!(wait, Duration::from_secs(1));
        assert!(!send_whole(&mut throttler, start));
        assert_eq!(throttler.queued(), 6);

        let later = start + Duration::from_millis(1000);
        assert_eq!(throttler.time_until_send_allowed(later), Duration::ZERO);
        assert!(send_whole(&mut throttler, later));
    }

    #[test]
    fn test_partial_line_not_throttled() {
        let start = Instant::now();
        let mut throttler = OutboundThrottler::new(RateLimit {
            lines: 1,
            window: Duration::from_secs(10),
        });
        throttler.enqueue(line("NICK bot"));
        throttler.enqueue(line("USER bot 0 * :bot"));

        assert_eq!(throttler.next_chunk(start).map(<[u8]>::len), Some(10));
        throttler.advance(4);

        // The started line always finishes, even with the window full.
        assert_eq!(throttler.time_until_send_allowed(start), Duration::ZERO);
        assert_eq!(throttler.next_chunk(start), Some(&b" bot\r\n"[..]));
        throttler.advance(6);

        assert!(throttler.next_chunk(start).is_none());
        assert!(throttler.has_pending_work());
    }

    #[test]
    fn test_fifo_order() {
        let now = Instant::now();
        let mut throttler = OutboundThrottler::new(RateLimit {
            lines: 100,
            window: Duration::from_secs(1),
        });
        throttler.enqueue(line("A"));
        throttler.enqueue(line("B"));

        assert_eq!(throttler.next_chunk(now), Some(&b"A\r\n"[..]));
        throttler.advance(3);
        assert_eq!(throttler.next_chunk(now), Some(&b"B\r\n"[..]));
        throttler.advance(3);
        assert!(!throttler.has_pending_work());
    }

    #[tokio::test]
    async fn test_try_send_writes_frames() {
        let now = Instant::now();
        let mut throttler = OutboundThrottler::new(RateLimit::default());
        throttler.enqueue(line("CAP LS 302"));
        throttler.enqueue(line("NICK bot"));

        let mut out: Vec<u8> = Vec::new();
        while throttler.try_send(&mut out, now).await.unwrap() > 0 {}

        assert_eq!(out, b"CAP LS 302\r\nNICK bot\r\n");
        assert_eq!(throttler.last_send(), Some(now));
    }
}
