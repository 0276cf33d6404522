//! Server configuration
//!
//! Settings are read from the process environment with sensible defaults,
//! then injected into the engine as an owned value.

use std::env;
use std::time::Duration;

/// Default bind host
const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port
const DEFAULT_PORT: u16 = 8000;

/// Reports required before a session is banned
const DEFAULT_REPORTS_TO_BAN: usize = 2;

/// Ban duration in seconds
const DEFAULT_BAN_TIME: u64 = 60 * 10;

/// How long delivered/cancelled messages stay in the history store, seconds
const DEFAULT_MESSAGE_TTL: u64 = 60 * 60;

/// Maximum number of messages returned by `history`
const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Runtime configuration for the chat server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind the TCP listener to
    pub host: String,
    /// Port to bind the TCP listener to
    pub port: u16,
    /// Number of distinct reporters that triggers a ban
    pub reports_to_ban: usize,
    /// How long a ban lasts before the automatic unban
    pub ban_time: Duration,
    /// Retention window for finished/cancelled messages
    pub message_ttl: Duration,
    /// Upper bound on the `history` reply
    pub history_limit: usize,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Recognized variables: `SERVER_HOST`, `SERVER_PORT`, `REPORTS_TO_BAN`,
    /// `BAN_TIME`, `MESSAGE_TTL` (the last three as plain integers, seconds
    /// where applicable). Unset variables fall back to defaults; values that
    /// fail to parse are reported as errors rather than silently ignored.
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: read_parsed("SERVER_PORT", DEFAULT_PORT)?,
            reports_to_ban: read_parsed("REPORTS_TO_BAN", DEFAULT_REPORTS_TO_BAN)?,
            ban_time: Duration::from_secs(read_parsed("BAN_TIME", DEFAULT_BAN_TIME)?),
            message_ttl: Duration::from_secs(read_parsed("MESSAGE_TTL", DEFAULT_MESSAGE_TTL)?),
            history_limit: DEFAULT_HISTORY_LIMIT,
        })
    }

    /// The `host:port` address to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reports_to_ban: DEFAULT_REPORTS_TO_BAN,
            ban_time: Duration::from_secs(DEFAULT_BAN_TIME),
            message_ttl: Duration::from_secs(DEFAULT_MESSAGE_TTL),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

fn read_parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| format!("invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}
