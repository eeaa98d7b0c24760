//! Typed configuration records.
//!
//! [`ServerConfig`] describes where and as whom to connect. [`EngineSettings`]
//! holds the tunables the engine reads from the settings store, each with a
//! concrete type and a default.

use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::codec::{DEFAULT_ENCODING, DEFAULT_FALLBACK_ENCODING};
use crate::error::ConfigError;
use crate::liveness::{DEFAULT_PING_INTERVAL, DEFAULT_READ_TIMEOUT};
use crate::store::{IdentityStore, ServerId, SettingScope};
use crate::throttle::{RateLimit, DEFAULT_THROTTLE_LINES, DEFAULT_THROTTLE_WINDOW};

/// Setting key for the primary text encoding.
pub const ENCODING_KEY: &str = "encoding";
/// Setting key for the fallback text encoding.
pub const FALLBACK_ENCODING_KEY: &str = "fallback-encoding";
/// Setting key controlling peer certificate verification.
pub const SSL_VERIFY_KEY: &str = "ssl-verify";
/// Setting key for the client certificate chain (PEM).
pub const TLS_CERTIFICATE_KEY: &str = "tls-certificate";
/// Setting key for the client private key (PEM).
pub const TLS_KEY_KEY: &str = "tls-key";
/// Setting key for lines per throttle window.
pub const THROTTLE_LINES_KEY: &str = "throttle-lines";
/// Setting key for the throttle window, in seconds.
pub const THROTTLE_SECONDS_KEY: &str = "throttle-seconds";
/// Setting key for the keepalive interval, in seconds.
pub const PING_INTERVAL_KEY: &str = "ping-interval";
/// Setting key for the read timeout, in seconds.
pub const READ_TIMEOUT_KEY: &str = "read-timeout";

/// SASL PLAIN credentials.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SaslCredentials {
    pub account: String,
    pub password: String,
}

impl std::fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("account", &self.account)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One configured server.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerConfig {
    /// Store id of this server.
    pub id: ServerId,
    /// Display name; empty means `host:port`.
    pub alias: String,
    pub hostname: String,
    pub port: u16,
    pub tls: bool,
    /// Prefer IPv4 addresses (IPv6 otherwise).
    pub ipv4: bool,
    /// Local address to bind before connecting.
    pub bindhost: Option<IpAddr>,
    /// Server password sent with `PASS`.
    pub password: Option<String>,
    pub nickname: String,
    pub username: Option<String>,
    pub realname: Option<String>,
    /// Capabilities to request when the server offers them.
    pub capabilities: Vec<String>,
    pub sasl: Option<SaslCredentials>,
}

impl ServerConfig {
    /// A plaintext IPv4 server with everything optional unset.
    pub fn new(
        id: ServerId,
        hostname: impl Into<String>,
        port: u16,
        nickname: impl Into<String>,
    ) -> Self {
        Self {
            id,
            alias: String::new(),
            hostname: hostname.into(),
            port,
            tls: false,
            ipv4: true,
            bindhost: None,
            password: None,
            nickname: nickname.into(),
            username: None,
            realname: None,
            capabilities: Vec::new(),
            sasl: None,
        }
    }

    /// Username, defaulting to the nickname.
    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nickname)
    }

    /// Realname, defaulting to the nickname.
    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nickname)
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.alias.is_empty() {
            return f.write_str(&self.alias);
        }
        write!(
            f,
            "{}:{}{}",
            self.hostname,
            if self.tls { "+" } else { "" },
            self.port
        )
    }
}

/// Per-server engine tunables.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineSettings {
    pub encoding: String,
    pub fallback_encoding: String,
    pub ssl_verify: bool,
    pub tls_certificate: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub throttle_lines: usize,
    pub throttle_window: Duration,
    pub ping_interval: Duration,
    pub read_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            encoding: DEFAULT_ENCODING.to_owned(),
            fallback_encoding: DEFAULT_FALLBACK_ENCODING.to_owned(),
            ssl_verify: true,
            tls_certificate: None,
            tls_key: None,
            throttle_lines: DEFAULT_THROTTLE_LINES,
            throttle_window: DEFAULT_THROTTLE_WINDOW,
            ping_interval: DEFAULT_PING_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl EngineSettings {
    /// Load from server-scoped settings, using defaults for absent keys.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidSetting`] for a value that does not parse, or a
    /// zero line count, ping interval or read timeout.
    pub fn from_store(store: &dyn IdentityStore, server: ServerId) -> Result<Self, ConfigError> {
        let scope = SettingScope::Server(server);
        let get = |key: &str| store.get_setting(scope, key);
        let defaults = Self::default();

        let throttle_lines = get(THROTTLE_LINES_KEY);
        let ping_interval = get(PING_INTERVAL_KEY);
        let read_timeout = get(READ_TIMEOUT_KEY);

        Ok(Self {
            encoding: get(ENCODING_KEY).unwrap_or(defaults.encoding),
            fallback_encoding: get(FALLBACK_ENCODING_KEY).unwrap_or(defaults.fallback_encoding),
            ssl_verify: match get(SSL_VERIFY_KEY) {
                Some(value) => parse_bool(SSL_VERIFY_KEY, &value)?,
                None => defaults.ssl_verify,
            },
            tls_certificate: get(TLS_CERTIFICATE_KEY).map(PathBuf::from),
            tls_key: get(TLS_KEY_KEY).map(PathBuf::from),
            throttle_lines: nonzero(
                THROTTLE_LINES_KEY,
                throttle_lines.as_deref(),
                parse_or(THROTTLE_LINES_KEY, throttle_lines.clone(), defaults.throttle_lines)?,
            )?,
            throttle_window: seconds_or(THROTTLE_SECONDS_KEY, get(THROTTLE_SECONDS_KEY), defaults.throttle_window)?,
            ping_interval: nonzero(
                PING_INTERVAL_KEY,
                ping_interval.as_deref(),
                seconds_or(PING_INTERVAL_KEY, ping_interval.clone(), defaults.ping_interval)?,
            )?,
            read_timeout: nonzero(
                READ_TIMEOUT_KEY,
                read_timeout.as_deref(),
                seconds_or(READ_TIMEOUT_KEY, read_timeout.clone(), defaults.read_timeout)?,
            )?,
        })
    }

    /// The outbound rate limit these settings describe.
    pub fn rate_limit(&self) -> RateLimit {
        RateLimit {
            lines: self.throttle_lines,
            window: self.throttle_window,
        }
    }

    /// Client certificate and key paths, when both are set.
    pub fn client_auth(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_certificate.as_ref().zip(self.tls_key.as_ref())
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn parse_or<T: FromStr>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(value) => value.trim().parse().map_err(|_| invalid(key, &value)),
        None => Ok(default),
    }
}

fn seconds_or(
    key: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| invalid(key, &value)),
        None => Ok(default),
    }
}

/// Reject a parsed zero; `raw` is the stored text it came from.
fn nonzero<T: Default + PartialEq>(
    key: &'static str,
    raw: Option<&str>,
    value: T,
) -> Result<T, ConfigError> {
    if value == T::default() {
        return Err(invalid(key, raw.unwrap_or_default()));
    }
    Ok(value)
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        key,
        value: value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_defaults_when_store_empty() {
        let store = MemoryStore::new();
        let settings = EngineSettings::from_store(&store, 1).unwrap();
        assert_eq!(settings, EngineSettings::default());
        assert_eq!(settings.rate_limit(), RateLimit::default());
        assert!(settings.client_auth().is_none());
    }

    #[test]
    fn test_overrides_from_store() {
        let store = MemoryStore::new();
        let scope = SettingScope::Server(7);
        store.set_setting(scope, ENCODING_KEY, "latin1");
        store.set_setting(scope, SSL_VERIFY_KEY, "false");
        store.set_setting(scope, THROTTLE_LINES_KEY, "10");
        store.set_setting(scope, PING_INTERVAL_KEY, "2.5");
        store.set_setting(scope, TLS_CERTIFICATE_KEY, "/etc/bot/cert.pem");
        store.set_setting(scope, TLS_KEY_KEY, "/etc/bot/key.pem");

        let settings = EngineSettings::from_store(&store, 7).unwrap();
        assert_eq!(settings.encoding, "latin1");
        assert!(!settings.ssl_verify);
        assert_eq!(settings.throttle_lines, 10);
        assert_eq!(settings.ping_interval, Duration::from_millis(2500));
        assert!(settings.client_auth().is_some());
    }

    #[test]
    fn test_malformed_value() {
        let store = MemoryStore::new();
        store.set_setting(SettingScope::Server(1), READ_TIMEOUT_KEY, "never");
        let err = EngineSettings::from_store(&store, 1).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting { key: READ_TIMEOUT_KEY, .. }
        ));

        store.set_setting(SettingScope::Server(1), READ_TIMEOUT_KEY, "-3");
        assert!(EngineSettings::from_store(&store, 1).is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        for (key, value) in [
            (THROTTLE_LINES_KEY, "0"),
            (PING_INTERVAL_KEY, "0"),
            (READ_TIMEOUT_KEY, "0.0"),
        ] {
            let store = MemoryStore::new();
            store.set_setting(SettingScope::Server(1), key, value);
            let err = EngineSettings::from_store(&store, 1).unwrap_err();
            assert!(
                matches!(&err, ConfigError::InvalidSetting { key: k, value: v } if *k == key && v == value),
                "{} = {} accepted",
                key,
                value
            );
        }

        // A zero window just disables throttling.
        let store = MemoryStore::new();
        store.set_setting(SettingScope::Server(1), THROTTLE_SECONDS_KEY, "0");
        assert_eq!(
            EngineSettings::from_store(&store, 1).unwrap().throttle_window,
            Duration::ZERO
        );
    }

    #[test]
    fn test_server_display() {
        let mut config = ServerConfig::new(1, "irc.example.net", 6697, "bot");
        config.tls = true;
        assert_eq!(config.to_string(), "irc.example.net:+6697");
        assert_eq!(config.username(), "bot");

        config.alias = "example".into();
        assert_eq!(config.to_string(), "example");
    }
}
