//! The session gatekeeper: resolves who a connection belongs to before it
//! may chat.
//!
//! [`Gate`] is a per-connection state machine with no I/O of its own. The
//! connection handler feeds it the handshake and, while verification is
//! pending, every following client message; each call returns a [`Step`]
//! or a [`GateError`] carrying the reply the client should get.
//!
//! ```text
//! Anonymous ──TOKEN──→ TokenAuth ──────────────────────────→ Authenticated
//!     │
//!     ├──AUTH(register)──→ Registering ──┬─(active)────────→ Authenticated
//!     │                                  └─(inactive)─┐
//!     └──AUTH(login)─────→ LoggingIn ────┬─(active)───┼────→ Authenticated
//!                                        └─(inactive)─┴─→ PendingVerification
//!                                                              │ OTP_VERIFY ok
//!                                                              └──→ Authenticated
//! any terminal error ──→ Closed
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;
use yep_auth::{
    AuthError, CodeStore, CredentialService, LoginIdentifier, PendingVerifications,
    PhoneFingerprinter, TokenError, TokenIssuer, User, UserStore, VerificationError,
    VerificationFlow,
};
use yep_protocol::{ClientMessage, Credentials, Handshake, ServerMessage, UserId, unix_now};

use crate::{HandshakeError, ServerConfig, YepError};

/// Reply sent alongside `VERIFICATION_REQUIRED`.
pub const VERIFICATION_PROMPT: &str = "Please verify your phone via @YEPVerifyBot on Telegram";

/// The identity services every connection shares.
pub struct AuthServices<U, K> {
    pub credentials: CredentialService<U>,
    pub verification: VerificationFlow<U, K>,
    pub tokens: TokenIssuer,
    pending: Mutex<PendingVerifications>,
    max_code_attempts: u32,
}

impl<U: UserStore, K: CodeStore> AuthServices<U, K> {
    pub fn new(users: Arc<U>, codes: Arc<K>, config: &ServerConfig) -> Self {
        Self {
            credentials: CredentialService::new(
                Arc::clone(&users),
                PhoneFingerprinter::new(config.phone_salt.clone()),
            ),
            verification: VerificationFlow::new(users, codes),
            tokens: TokenIssuer::new(&config.token_secret),
            pending: Mutex::new(PendingVerifications::new(config.pending_ttl)),
            max_code_attempts: config.max_code_attempts,
        }
    }

    /// Builds the `AUTH_SUCCESS` reply with fresh session and refresh tokens.
    pub fn auth_success(&self, user: &User) -> Result<ServerMessage, TokenError> {
        Ok(ServerMessage::AuthSuccess {
            yui: user.id.clone(),
            level: user.level,
            content: format!("Welcome to YEP! Level: {}", user.level),
            token: self.tokens.issue(user)?,
            refresh_token: Some(self.tokens.issue_refresh(&user.id)?),
            timestamp: unix_now(),
        })
    }

    /// Drops pending verifications older than the configured TTL.
    pub async fn sweep_pending(&self) -> Vec<UserId> {
        self.pending.lock().await.sweep()
    }

    /// Number of users currently mid-verification.
    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Where a connection is in the authentication flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Anonymous,
    Registering,
    LoggingIn,
    TokenAuth,
    PendingVerification(UserId),
    Authenticated(UserId),
    Closed,
}

/// A successful transition.
#[derive(Debug)]
pub enum Step {
    /// The connection may join the chat as this (active) user.
    Authenticated(User),
    /// The user must submit a one-time code; reply with
    /// `VERIFICATION_REQUIRED` and keep reading.
    VerificationRequired(UserId),
}

/// A rejected transition. [`reply`](Self::reply) is what the client gets;
/// [`is_terminal`](Self::is_terminal) says whether the connection closes.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Any failure on the token path.
    #[error("token rejected: {0}")]
    Token(#[source] AuthError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Something other than `OTP_VERIFY` arrived during verification.
    #[error("verification code expected")]
    AwaitingCode,
}

impl GateError {
    /// Returns `true` if the connection must close after the reply.
    pub fn is_terminal(&self) -> bool {
        match self {
            GateError::Verification(e) => !e.is_retryable(),
            GateError::AwaitingCode => false,
            _ => true,
        }
    }

    /// The message to send the client.
    pub fn reply(&self) -> ServerMessage {
        match self {
            GateError::Token(AuthError::Token(TokenError::Expired)) => ServerMessage::TokenExpired {
                content: "Token expired, please login again".into(),
            },
            GateError::Token(e) => ServerMessage::TokenExpired {
                content: format!("Invalid token ({e}), please login again"),
            },
            GateError::Handshake(e) => ServerMessage::error(format!("Invalid handshake: {e}")),
            GateError::Auth(AuthError::InvalidCredentials) => {
                ServerMessage::error("Invalid credentials")
            }
            GateError::Auth(AuthError::Inactive(_)) => {
                ServerMessage::error("Account is not active and cannot be verified")
            }
            GateError::Auth(e @ (AuthError::AlreadyRegistered(_) | AuthError::InvalidInput(_))) => {
                ServerMessage::error(e.to_string())
            }
            GateError::Auth(e) => {
                tracing::warn!(error = %e, "authentication failed internally");
                ServerMessage::error("Authentication failed")
            }
            GateError::Verification(VerificationError::WrongCode) => {
                ServerMessage::error("Invalid verification code")
            }
            GateError::Verification(VerificationError::NoCode) => {
                ServerMessage::error("No verification code has been issued yet")
            }
            GateError::Verification(VerificationError::CodeExpired) => {
                ServerMessage::error("Verification code expired, request a new one")
            }
            GateError::Verification(VerificationError::TooManyAttempts(_)) => {
                ServerMessage::error("Too many verification attempts")
            }
            GateError::Verification(VerificationError::PendingExpired(_)) => {
                ServerMessage::error("Verification window expired, please login again")
            }
            GateError::Verification(e) => {
                tracing::warn!(error = %e, "verification failed internally");
                ServerMessage::error("Verification failed")
            }
            GateError::AwaitingCode => {
                ServerMessage::error("Verification required: send OTP_VERIFY with your code")
            }
        }
    }
}

impl From<GateError> for YepError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Handshake(e) => YepError::Handshake(e),
            GateError::Token(e) | GateError::Auth(e) => YepError::Auth(e),
            GateError::Verification(e) => YepError::Verification(e),
            GateError::AwaitingCode => YepError::Handshake(HandshakeError::OutOfOrder("non-OTP")),
        }
    }
}

/// Per-connection authentication state machine.
pub struct Gate<'a, U, K> {
    services: &'a AuthServices<U, K>,
    state: GateState,
}

impl<'a, U: UserStore, K: CodeStore> Gate<'a, U, K> {
    pub fn new(services: &'a AuthServices<U, K>) -> Self {
        Self {
            services,
            state: GateState::Anonymous,
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    /// Handles the first frame of the connection.
    pub async fn handshake(&mut self, handshake: Handshake) -> Result<Step, GateError> {
        if self.state != GateState::Anonymous {
            return self.fail(HandshakeError::OutOfOrder("handshake").into());
        }
        let result = match handshake {
            Handshake::Token { token } => {
                self.state = GateState::TokenAuth;
                self.token_auth(&token).await
            }
            Handshake::Credentials(creds) if creds.is_login => {
                self.state = GateState::LoggingIn;
                self.login(&creds).await
            }
            Handshake::Credentials(creds) => {
                self.state = GateState::Registering;
                self.register(&creds).await
            }
        };
        self.settle(result)
    }

    /// Handles a message received while verification is pending.
    pub async fn submit(&mut self, message: ClientMessage) -> Result<Step, GateError> {
        let GateState::PendingVerification(user_id) = self.state.clone() else {
            return self.fail(HandshakeError::OutOfOrder("verification").into());
        };
        let ClientMessage::OtpVerify { code } = message else {
            return Err(GateError::AwaitingCode);
        };
        let result = self.verify(&user_id, &code).await;
        self.settle(result)
    }

    async fn token_auth(&self, token: &str) -> Result<Step, GateError> {
        let claims = self
            .services
            .tokens
            .validate(token)
            .map_err(|e| GateError::Token(e.into()))?;
        let user = self
            .services
            .credentials
            .user(&claims.yui)
            .await
            .map_err(GateError::Token)?;
        if !user.active {
            return Err(GateError::Token(AuthError::Inactive(user.id)));
        }
        tracing::debug!(user_id = %user.id, "token accepted");
        Ok(Step::Authenticated(user))
    }

    async fn register(&self, creds: &Credentials) -> Result<Step, GateError> {
        let user = self
            .services
            .credentials
            .register(&creds.email, &creds.phone, &creds.password, creds.level)
            .await?;
        self.admit(user).await
    }

    async fn login(&self, creds: &Credentials) -> Result<Step, GateError> {
        let identifier = LoginIdentifier::from_parts(&creds.email, &creds.phone)
            .ok_or_else(|| AuthError::InvalidInput("email or phone is required".into()))?;
        let user = self
            .services
            .credentials
            .login(identifier, &creds.password)
            .await?;
        self.admit(user).await
    }

    /// Active users go straight in; inactive ones owe a code.
    async fn admit(&self, user: User) -> Result<Step, GateError> {
        if user.active {
            return Ok(Step::Authenticated(user));
        }
        if !user.can_verify() {
            return Err(AuthError::Inactive(user.id).into());
        }
        let id = user.id.clone();
        self.services.pending.lock().await.insert(user);
        Ok(Step::VerificationRequired(id))
    }

    async fn verify(&self, user_id: &UserId, code: &str) -> Result<Step, GateError> {
        let fingerprint = {
            let pending = self.services.pending.lock().await;
            let record = pending
                .get_live(user_id)
                .ok_or_else(|| VerificationError::PendingExpired(user_id.clone()))?;
            record.user.phone_fingerprint.clone()
        }
        .ok_or_else(|| AuthError::Inactive(user_id.clone()))?;

        match self.services.verification.verify(&fingerprint, code).await {
            Ok(()) => {
                let user = self.complete_verification(user_id).await?;
                tracing::info!(%user_id, "verification succeeded");
                Ok(Step::Authenticated(user))
            }
            Err(e) if e.is_retryable() => {
                let attempts = {
                    let mut pending = self.services.pending.lock().await;
                    let attempts = pending
                        .record_failure(user_id)
                        .ok_or_else(|| VerificationError::PendingExpired(user_id.clone()))?;
                    if attempts > self.services.max_code_attempts {
                        pending.discard(user_id);
                    }
                    attempts
                };
                if attempts > self.services.max_code_attempts {
                    tracing::warn!(%user_id, attempts, "verification attempts exhausted");
                    self.services.verification.revoke_code(&fingerprint).await?;
                    return Err(VerificationError::TooManyAttempts(attempts).into());
                }
                tracing::debug!(%user_id, attempts, error = %e, "verification code rejected");
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Consumes the pending record after the code was accepted. The code is
    /// already spent and the user activated in the store by now, so a record
    /// swept in the meantime falls back to the stored user.
    async fn complete_verification(&self, user_id: &UserId) -> Result<User, GateError> {
        let completed = self.services.pending.lock().await.complete(user_id);
        match completed {
            Some(user) => Ok(user),
            None => {
                tracing::debug!(%user_id, "pending record gone after verification, reloading user");
                Ok(self.services.credentials.user(user_id).await?)
            }
        }
    }

    /// Moves to the state a result implies.
    fn settle(&mut self, result: Result<Step, GateError>) -> Result<Step, GateError> {
        match &result {
            Ok(Step::Authenticated(user)) => {
                self.state = GateState::Authenticated(user.id.clone());
            }
            Ok(Step::VerificationRequired(id)) => {
                self.state = GateState::PendingVerification(id.clone());
            }
            Err(e) if e.is_terminal() => self.state = GateState::Closed,
            Err(_) => {}
        }
        result
    }

    fn fail(&mut self, err: GateError) -> Result<Step, GateError> {
        self.state = GateState::Closed;
        Err(err)
    }
}
