//! Error types for the auth layer.

use yep_protocol::UserId;

/// Failures reported by a storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique key (email, phone fingerprint) is already taken.
    #[error("duplicate {0}")]
    Duplicate(&'static str),

    /// The backing store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Why a signed token was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Not a JWT, or the claims don't decode.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// The signature doesn't match the header and claims.
    #[error("invalid token signature")]
    BadSignature,

    /// The token is well-formed and signed but past its expiry.
    #[error("token expired")]
    Expired,

    /// Signed by us, but for a different purpose (e.g. a refresh token
    /// presented as a session token).
    #[error("unexpected token issuer")]
    WrongIssuer,

    /// Signing failed.
    #[error("token signing failed: {0}")]
    Sign(#[source] jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature => TokenError::BadSignature,
            ErrorKind::InvalidIssuer => TokenError::WrongIssuer,
            _ => TokenError::Malformed(err.to_string()),
        }
    }
}

/// Errors from registration, login, and token resolution.
///
/// All of these end the connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown user or wrong password. Deliberately indistinguishable.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The email or phone is already bound to another account.
    #[error("{0} already registered")]
    AlreadyRegistered(&'static str),

    /// A required field is missing or empty.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A token referenced a user that no longer exists.
    #[error("user {0} not found")]
    UserNotFound(UserId),

    /// The account is inactive and cannot be activated from here.
    #[error("account {0} is not active")]
    Inactive(UserId),

    /// The session token was rejected.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Password hashing failed or its worker panicked.
    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// A storage collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from one-time-code verification.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// No code is stored for this fingerprint.
    #[error("no verification code issued")]
    NoCode,

    /// The submitted code doesn't match the stored one.
    #[error("invalid verification code")]
    WrongCode,

    /// The stored code is past its expiry.
    #[error("verification code expired")]
    CodeExpired,

    /// Too many wrong submissions for one pending verification.
    #[error("too many verification attempts ({0})")]
    TooManyAttempts(u32),

    /// The pending verification record was swept or never existed.
    #[error("verification for {0} is no longer pending")]
    PendingExpired(UserId),

    /// No user is registered under this fingerprint.
    #[error("no user registered for this phone")]
    UnknownFingerprint,

    /// A storage collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VerificationError {
    /// Returns `true` if the client may submit another code.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VerificationError::NoCode
                | VerificationError::WrongCode
                | VerificationError::CodeExpired
        )
    }
}
