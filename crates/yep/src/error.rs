//! Error types for the session core, plus the unified [`YepError`].

use std::time::Duration;

use yep_auth::{AuthError, VerificationError};
use yep_protocol::{Level, ProtocolError};
use yep_registry::DeliveryError;
use yep_transport::TransportError;

/// The first frame on a connection was not a usable handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The client closed before sending anything.
    #[error("connection closed before handshake")]
    Missing,

    #[error("handshake timed out after {0:?}")]
    TimedOut(Duration),

    /// Undecodable, or an unknown `type` discriminant.
    #[error("malformed handshake: {0}")]
    Malformed(String),

    /// A recognizable message arrived, but not one allowed in this state.
    #[error("unexpected {0} message")]
    OutOfOrder(&'static str),
}

/// A chat message broke its sender's level policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("Level {level}: max {max} chars")]
    TooLong {
        level: Level,
        max: usize,
        actual: usize,
    },
}

/// Invalid server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum YepError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
