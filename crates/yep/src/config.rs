//! Server configuration.

use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use yep_protocol::Level;
use yep_registry::{DEFAULT_OUTBOX_CAPACITY, DEFAULT_WRITE_TIMEOUT};

use crate::ConfigError;

/// Per-level message length caps, in bytes. `None` is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPolicy {
    a: Option<usize>,
    b: Option<usize>,
    c: Option<usize>,
}

impl LevelPolicy {
    /// No limits for any level.
    pub fn unlimited() -> Self {
        Self {
            a: None,
            b: None,
            c: None,
        }
    }

    /// Sets the cap for one level.
    pub fn with_limit(mut self, level: Level, max_len: Option<usize>) -> Self {
        *self.slot(level) = max_len;
        self
    }

    pub fn max_len(&self, level: Level) -> Option<usize> {
        match level {
            Level::A => self.a,
            Level::B => self.b,
            Level::C => self.c,
        }
    }

    fn slot(&mut self, level: Level) -> &mut Option<usize> {
        match level {
            Level::A => &mut self.a,
            Level::B => &mut self.b,
            Level::C => &mut self.c,
        }
    }
}

impl Default for LevelPolicy {
    /// Level C is capped at 100 characters; A and B are unlimited.
    fn default() -> Self {
        Self::unlimited().with_limit(Level::C, Some(100))
    }
}

/// Everything a [`YepServer`](crate::YepServer) needs to know up front.
#[derive(Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// HMAC key for session and refresh tokens.
    pub token_secret: Vec<u8>,
    /// Salt mixed into phone fingerprints.
    pub phone_salt: String,
    pub level_policy: LevelPolicy,
    /// Wrong codes tolerated per pending verification.
    pub max_code_attempts: u32,
    /// How long a pending verification survives.
    pub pending_ttl: Duration,
    /// How often abandoned verifications are swept.
    pub sweep_interval: Duration,
    pub handshake_timeout: Duration,
    /// A session that sends nothing for this long is dropped.
    pub idle_timeout: Duration,
    pub outbox_capacity: usize,
    pub write_timeout: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("level_policy", &self.level_policy)
            .field("max_code_attempts", &self.max_code_attempts)
            .field("pending_ttl", &self.pending_ttl)
            .field("sweep_interval", &self.sweep_interval)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("outbox_capacity", &self.outbox_capacity)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            token_secret: random_secret(),
            phone_salt: "yep-default-salt".to_string(),
            level_policy: LevelPolicy::default(),
            max_code_attempts: 5,
            pending_ttl: Duration::from_secs(15 * 60),
            sweep_interval: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Reads overrides from `YEP_*` environment variables on top of the
    /// defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("YEP_BIND") {
            config.bind_addr = addr;
        }
        match lookup("YEP_TOKEN_SECRET") {
            Some(secret) if !secret.is_empty() => config.token_secret = secret.into_bytes(),
            _ => tracing::warn!(
                "YEP_TOKEN_SECRET not set, using a random secret; tokens will not survive a restart"
            ),
        }
        if let Some(salt) = lookup("YEP_PHONE_SALT") {
            config.phone_salt = salt;
        }
        if let Some(max) = parse::<usize>(&lookup, "YEP_LEVEL_C_MAX_CHARS")? {
            config.level_policy = config
                .level_policy
                .with_limit(Level::C, (max > 0).then_some(max));
        }
        if let Some(attempts) = parse::<u32>(&lookup, "YEP_MAX_CODE_ATTEMPTS")? {
            config.max_code_attempts = attempts;
        }
        if let Some(secs) = parse::<u64>(&lookup, "YEP_PENDING_TTL_SECS")? {
            config.pending_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "YEP_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

fn random_secret() -> Vec<u8> {
    let bytes: [u8; 32] = rand::rng().random();
    bytes.to_vec()
}
