//! Signed, time-bounded session and refresh tokens.
//!
//! Both are HS256 JWTs signed with the same secret. Claims carry an issuer
//! string so a refresh token can never be replayed as a session token.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use yep_protocol::{Level, UserId, unix_now};

use crate::{TokenError, User};

/// Issuer of session tokens.
pub const SESSION_ISSUER: &str = "yep-protocol";
/// Issuer of refresh tokens.
pub const REFRESH_ISSUER: &str = "yep-protocol-refresh";

/// Default session token lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default refresh token lifetime.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Claims inside a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub yui: UserId,
    pub email: String,
    pub level: Level,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Claims inside a refresh token. Identity only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: UserId,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Mints and validates tokens with a shared HMAC secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("session_ttl", &self.session_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Creates an issuer with the default lifetimes (24h / 7d).
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let secret = secret.as_ref();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            session_ttl: DEFAULT_SESSION_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
        }
    }

    /// Overrides the session token lifetime.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    /// Overrides the refresh token lifetime.
    pub fn with_refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    /// Issues a session token for `user`, valid from now.
    pub fn issue(&self, user: &User) -> Result<String, TokenError> {
        self.issue_at(user, unix_now())
    }

    /// Issues a session token as if the current time were `now`.
    pub fn issue_at(&self, user: &User, now: i64) -> Result<String, TokenError> {
        let claims = SessionClaims {
            yui: user.id.clone(),
            email: user.email.clone(),
            level: user.level,
            iat: now,
            exp: now + self.session_ttl.as_secs() as i64,
            iss: SESSION_ISSUER.to_string(),
        };
        self.sign(&claims)
    }

    /// Issues a refresh token for `id`, valid from now.
    pub fn issue_refresh(&self, id: &UserId) -> Result<String, TokenError> {
        let now = unix_now();
        let claims = RefreshClaims {
            sub: id.clone(),
            iat: now,
            exp: now + self.refresh_ttl.as_secs() as i64,
            iss: REFRESH_ISSUER.to_string(),
        };
        self.sign(&claims)
    }

    /// Validates a session token: signature, issuer, and expiry.
    pub fn validate(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.open(token, SESSION_ISSUER)
    }

    /// Validates a refresh token: signature, issuer, and expiry.
    pub fn validate_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        self.open(token, REFRESH_ISSUER)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(TokenError::Sign)
    }

    fn open<T: DeserializeOwned>(&self, token: &str, issuer: &str) -> Result<T, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = 0;
        let data = jsonwebtoken::decode::<T>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }
}
