//! Wire types for the YEP chat protocol.
//!
//! Every frame is a JSON object with a `type` discriminant. Decoding goes
//! through serde's internally tagged enums, so a frame with a missing or
//! unknown `type` fails to decode instead of being guessed at from the
//! keys it happens to carry.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A user's unique, stable identifier (`yui` on the wire).
///
/// Assigned once at user creation and never reused. Primary key of the
/// session registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Coarse privilege tier of a user.
///
/// `A` is the highest tier, `C` the lowest. The tier is fixed at
/// registration and only affects message-size policy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Level {
    A,
    B,
    #[default]
    C,
}

impl Level {
    /// The lowest tier.
    pub const LOWEST: Level = Level::C;

    /// Returns the single-letter wire form.
    pub fn as_str(self) -> &'static str {
        match self {
            Level::A => "A",
            Level::B => "B",
            Level::C => "C",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Level::A),
            "B" => Ok(Level::B),
            "C" => Ok(Level::C),
            other => Err(format!("unknown level {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake — the first frame on every connection
// ---------------------------------------------------------------------------

/// The credential set carried by an `AUTH` handshake.
///
/// `is_login` selects between logging in and registering. Every other
/// field is optional on the wire and defaults to empty; the credential
/// service decides what is actually required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub level: Level,
    #[serde(default)]
    pub is_login: bool,
}

/// The first message a client sends.
///
/// ```json
/// {"type":"TOKEN","token":"..."}
/// {"type":"AUTH","email":"a@x.com","phone":"+1 555 0100","password":"p","level":"C","is_login":false}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Handshake {
    /// Resume with a previously issued session token.
    #[serde(rename = "TOKEN")]
    Token { token: String },

    /// Log in or register with credentials.
    #[serde(rename = "AUTH")]
    Credentials(Credentials),
}

// ---------------------------------------------------------------------------
// Client → server after the handshake
// ---------------------------------------------------------------------------

/// Messages a client may send once the handshake has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// A chat message for everyone else.
    Message { content: String },

    /// Keep-alive; answered with [`ServerMessage::Pong`].
    Ping,

    /// A one-time code submitted while verification is pending.
    OtpVerify { code: String },
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Messages the server sends. `timestamp` fields are Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// The connection is authenticated; carries a fresh session token.
    AuthSuccess {
        yui: UserId,
        level: Level,
        content: String,
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
        timestamp: i64,
    },

    /// Something was rejected. The connection may or may not stay open.
    Error { content: String },

    /// The offered session token was rejected; log in again.
    TokenExpired { content: String },

    /// Phone ownership must be proven with a one-time code.
    VerificationRequired { content: String, yui: UserId },

    /// Another user came online.
    UserJoin { content: String, timestamp: i64 },

    /// Another user went offline.
    UserLeave { content: String, timestamp: i64 },

    /// Snapshot of who is online, sent once after authentication.
    OnlineUsers {
        content: String,
        data: Vec<String>,
        timestamp: i64,
    },

    /// A chat message from another user.
    Message {
        content: String,
        yui: UserId,
        level: Level,
        timestamp: i64,
    },

    /// Reply to [`ClientMessage::Ping`].
    Pong { timestamp: i64 },
}

impl ServerMessage {
    /// Shorthand for an [`ServerMessage::Error`] with the given text.
    pub fn error(content: impl Into<String>) -> Self {
        ServerMessage::Error {
            content: content.into(),
        }
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

// =========================================================================
// Tests
// =========================================================================
