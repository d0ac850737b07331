//! `YepServer` builder and server loop.
//!
//! This is the entry point for running a YEP chat server. It ties together
//! all the layers: transport → gatekeeper → registry.

use std::sync::Arc;

use yep_auth::{CodeStore, UserStore, VerificationError};
use yep_protocol::{Codec, JsonCodec, UserId};
use yep_registry::Registry;
use yep_transport::{Transport, WebSocketTransport};

use crate::gatekeeper::AuthServices;
use crate::handler::handle_connection;
use crate::history::MessageLog;
use crate::{ServerConfig, YepError};

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
pub(crate) struct ServerState<U: UserStore, K: CodeStore, M: MessageLog, C: Codec> {
    pub(crate) auth: AuthServices<U, K>,
    pub(crate) registry: Registry,
    pub(crate) history: Arc<M>,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a YEP server.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use yep::prelude::*;
///
/// # async fn start() -> Result<(), YepError> {
/// let server = YepServerBuilder::new()
///     .bind("0.0.0.0:8080")
///     .build(
///         Arc::new(MemoryUserStore::new()),
///         Arc::new(MemoryCodeStore::new()),
///         Arc::new(MemoryMessageLog::new()),
///     )
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct YepServerBuilder {
    config: ServerConfig,
}

impl YepServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the token signing secret.
    pub fn token_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.config.token_secret = secret.into();
        self
    }

    /// Binds the listener and wires the services to the given stores.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build<U, K, M>(
        self,
        users: Arc<U>,
        codes: Arc<K>,
        history: Arc<M>,
    ) -> Result<YepServer<U, K, M, JsonCodec>, YepError>
    where
        U: UserStore,
        K: CodeStore,
        M: MessageLog,
    {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let state = Arc::new(ServerState {
            auth: AuthServices::new(users, codes, &self.config),
            registry: Registry::new(),
            history,
            codec: JsonCodec,
            config: self.config,
        });

        Ok(YepServer { transport, state })
    }
}

impl Default for YepServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A YEP chat server, bound but not yet accepting.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct YepServer<U: UserStore, K: CodeStore, M: MessageLog, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<U, K, M, C>>,
}

impl<U, K, M, C> YepServer<U, K, M, C>
where
    U: UserStore,
    K: CodeStore,
    M: MessageLog,
    C: Codec,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle for out-of-band operations that stays valid after
    /// [`run()`](Self::run) takes the server.
    pub fn handle(&self) -> YepHandle<U, K, M, C> {
        YepHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the server accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// The sweeper that expires abandoned verifications runs alongside and
    /// stops when this future is dropped.
    pub async fn run(mut self) -> Result<(), YepError> {
        tracing::info!(addr = %self.state.config.bind_addr, "YEP server running");

        let state = Arc::clone(&self.state);
        tokio::select! {
            () = sweep_forever(&state) => {}
            () = self.accept_forever() => {}
        }
        Ok(())
    }

    async fn accept_forever(&mut self) {
        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

async fn sweep_forever<U, K, M, C>(state: &ServerState<U, K, M, C>)
where
    U: UserStore,
    K: CodeStore,
    M: MessageLog,
    C: Codec,
{
    let mut interval = tokio::time::interval(state.config.sweep_interval);
    loop {
        interval.tick().await;
        state.auth.sweep_pending().await;
    }
}

/// Out-of-band access to a server's services.
///
/// This is where the code delivery channel plugs in: it hands codes to
/// [`deliver_code`](Self::deliver_code) (or lets the server mint one via
/// [`issue_code`](Self::issue_code)) and sends them to the user itself.
pub struct YepHandle<U: UserStore, K: CodeStore, M: MessageLog, C: Codec> {
    state: Arc<ServerState<U, K, M, C>>,
}

impl<U: UserStore, K: CodeStore, M: MessageLog, C: Codec> Clone for YepHandle<U, K, M, C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<U, K, M, C> YepHandle<U, K, M, C>
where
    U: UserStore,
    K: CodeStore,
    M: MessageLog,
    C: Codec,
{
    /// Stores `code` for the user registered with `phone`.
    pub async fn deliver_code(&self, phone: &str, code: &str) -> Result<(), VerificationError> {
        let fingerprint = self.fingerprint(phone)?;
        self.state.auth.verification.deliver_code(&fingerprint, code).await
    }

    /// Generates and stores a fresh code for `phone`, returning it.
    pub async fn issue_code(&self, phone: &str) -> Result<String, VerificationError> {
        let fingerprint = self.fingerprint(phone)?;
        self.state.auth.verification.issue_code(&fingerprint).await
    }

    /// Returns `true` if a user is registered with `phone`.
    pub async fn phone_registered(&self, phone: &str) -> Result<bool, YepError> {
        let Some(fingerprint) = self.state.auth.credentials.fingerprinter().fingerprint(phone)
        else {
            return Ok(false);
        };
        let user = self
            .state
            .auth
            .credentials
            .find_by_fingerprint(&fingerprint)
            .await?;
        Ok(user.is_some())
    }

    /// Contact identities of everyone connected.
    pub async fn online(&self) -> Vec<String> {
        self.state.registry.online().await
    }

    /// Returns `true` if `user_id` has a live session.
    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.state.registry.contains(user_id).await
    }

    /// The history store the server appends to.
    pub fn history(&self) -> &M {
        &self.state.history
    }

    /// Runs one sweep of abandoned verifications now.
    pub async fn sweep_pending(&self) -> Vec<UserId> {
        self.state.auth.sweep_pending().await
    }

    fn fingerprint(&self, phone: &str) -> Result<String, VerificationError> {
        self.state
            .auth
            .credentials
            .fingerprinter()
            .fingerprint(phone)
            .ok_or(VerificationError::UnknownFingerprint)
    }
}
