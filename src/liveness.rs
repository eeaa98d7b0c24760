//! Read-recency tracking: keepalive pings and read timeouts.

use std::time::{Duration, Instant};

/// Default idle time before a `PING` is due.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default idle time after which the connection is considered dead.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Tracks the last successful read and whether a ping is outstanding.
#[derive(Clone, Debug)]
pub struct LivenessMonitor {
    last_read: Instant,
    ping_sent: bool,
    ping_interval: Duration,
    read_timeout: Duration,
}

impl LivenessMonitor {
    /// Start tracking from `now`.
    pub fn new(now: Instant, ping_interval: Duration, read_timeout: Duration) -> Self {
        Self {
            last_read: now,
            ping_sent: false,
            ping_interval,
            read_timeout,
        }
    }

    /// Restart tracking, e.g. after a reconnect.
    pub fn reset(&mut self, now: Instant) {
        self.last_read = now;
        self.ping_sent = false;
    }

    /// Record a successful read. Clears any outstanding ping.
    pub fn record_read(&mut self, now: Instant) {
        self.last_read = now;
        self.ping_sent = false;
    }

    /// Record that a ping was sent.
    pub fn record_ping_sent(&mut self) {
        self.ping_sent = true;
    }

    /// Whether a ping is outstanding.
    pub fn ping_sent(&self) -> bool {
        self.ping_sent
    }

    /// Instant of the last successful read.
    pub fn last_read(&self) -> Instant {
        self.last_read
    }

    /// Time until a ping is due; `None` while one is outstanding.
    pub fn time_until_ping_due(&self, now: Instant) -> Option<Duration> {
        if self.ping_sent {
            return None;
        }
        Some((self.last_read + self.ping_interval).saturating_duration_since(now))
    }

    /// Whether a ping should be sent now.
    pub fn ping_due(&self, now: Instant) -> bool {
        self.time_until_ping_due(now) == Some(Duration::ZERO)
    }

    /// Time left before the read timeout fires.
    pub fn time_until_read_timeout(&self, now: Instant) -> Duration {
        (self.last_read + self.read_timeout).saturating_duration_since(now)
    }

    /// Whether nothing has been read for the whole read timeout.
    pub fn is_read_timed_out(&self, now: Instant) -> bool {
        self.time_until_read_timeout(now).is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(start: Instant) -> LivenessMonitor {
        LivenessMonitor::new(start, DEFAULT_PING_INTERVAL, DEFAULT_READ_TIMEOUT)
    }

    #[test]
    fn test_ping_due_after_interval() {
        let start = Instant::now();
        let m = monitor(start);
        assert_eq!(
            m.time_until_ping_due(start + Duration::from_secs(10)),
            Some(Duration::from_secs(20))
        );
        assert!(!m.ping_due(start + Duration::from_secs(29)));
        assert!(m.ping_due(start + Duration::from_secs(30)));
        assert!(m.ping_due(start + Duration::from_secs(90)));
    }

    #[test]
    fn test_no_duplicate_ping_until_read() {
        let start = Instant::now();
        let mut m = monitor(start);
        m.record_ping_sent();
        assert_eq!(m.time_until_ping_due(start + Duration::from_secs(60)), None);
        assert!(!m.ping_due(start + Duration::from_secs(60)));

        let read_at = start + Duration::from_secs(61);
        m.record_read(read_at);
        assert!(!m.ping_sent());
        assert_eq!(m.time_until_ping_due(read_at), Some(DEFAULT_PING_INTERVAL));
    }

    #[test]
    fn test_read_timeout_ignores_ping_state() {
        let start = Instant::now();
        let mut m = monitor(start);
        m.record_ping_sent();
        assert!(!m.is_read_timed_out(start + Duration::from_secs(119)));
        assert!(m.is_read_timed_out(start + Duration::from_secs(120)));
        assert_eq!(
            m.time_until_read_timeout(start + Duration::from_secs(100)),
            Duration::from_secs(20)
        );
    }
}
