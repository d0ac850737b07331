//! Per-connection handler: handshake, verification, and the chat loop.
//!
//! Each accepted connection gets its own Tokio task running this handler,
//! plus a writer task that owns the send half. The flow is:
//!   1. Receive the handshake → drive the [`Gate`] until authenticated
//!   2. Send `AUTH_SUCCESS`, register, announce `USER_JOIN`, send `ONLINE_USERS`
//!   3. Loop: receive client messages → process → broadcast
//!   4. On exit, deregister and announce `USER_LEAVE`

use std::sync::Arc;
use std::time::Duration;

use yep_auth::{CodeStore, User, UserStore};
use yep_protocol::{ClientMessage, Codec, Handshake, ServerMessage, UserId, unix_now};
use yep_registry::{Frame, Outbox, SessionHandle, spawn_writer};
use yep_transport::{Connection, ConnectionId, TransportError};

use crate::gatekeeper::{Gate, GateError, Step, VERIFICATION_PROMPT};
use crate::history::{ChatRecord, MessageLog};
use crate::processor::{Author, Processed, process};
use crate::server::ServerState;
use crate::{HandshakeError, YepError};

/// Drop guard that deregisters the session when the handler exits.
///
/// Cleanup runs even if the handler panics. `Drop` is synchronous, so the
/// removal and the `USER_LEAVE` broadcast run in a spawned task. Nothing is
/// announced if a newer connection has already replaced this one.
struct RegistrationGuard<U: UserStore, K: CodeStore, M: MessageLog, C: Codec> {
    user_id: UserId,
    contact: String,
    conn_id: ConnectionId,
    state: Arc<ServerState<U, K, M, C>>,
}

impl<U: UserStore, K: CodeStore, M: MessageLog, C: Codec> Drop for RegistrationGuard<U, K, M, C> {
    fn drop(&mut self) {
        let user_id = self.user_id.clone();
        let contact = std::mem::take(&mut self.contact);
        let conn_id = self.conn_id;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            if state.registry.remove(&user_id, conn_id).await.is_none() {
                tracing::debug!(%user_id, %conn_id, "session already replaced, no leave notice");
                return;
            }
            let leave = ServerMessage::UserLeave {
                content: format!("{contact} left the chat"),
                timestamp: unix_now(),
            };
            match encode(&state.codec, &leave) {
                Ok(frame) => {
                    state.registry.broadcast(frame, None).await;
                }
                Err(e) => tracing::warn!(%user_id, error = %e, "failed to encode leave notice"),
            }
            let online = state.registry.len().await;
            tracing::info!(%user_id, online, "user left");
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<T, U, K, M, C>(
    conn: T,
    state: Arc<ServerState<U, K, M, C>>,
) -> Result<(), YepError>
where
    T: Connection,
    U: UserStore,
    K: CodeStore,
    M: MessageLog,
    C: Codec,
{
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let (outbox, writer) = spawn_writer(
        Arc::clone(&conn),
        state.config.outbox_capacity,
        state.config.write_timeout,
    );

    let result = run_session(conn.as_ref(), &outbox, &state).await;

    // Flush whatever is queued (including a final error reply), then let
    // the writer close the connection.
    outbox.close();
    drop(outbox);
    if let Err(e) = writer.await {
        tracing::warn!(%conn_id, error = %e, "writer task failed");
    }
    result
}

async fn run_session<T, U, K, M, C>(
    conn: &T,
    outbox: &Outbox,
    state: &Arc<ServerState<U, K, M, C>>,
) -> Result<(), YepError>
where
    T: Connection,
    U: UserStore,
    K: CodeStore,
    M: MessageLog,
    C: Codec,
{
    let conn_id = conn.id();

    // --- Step 1: Handshake and verification ---
    let user = authenticate(conn, outbox, state).await?;
    tracing::info!(%conn_id, user_id = %user.id, level = %user.level, "user authenticated");

    // --- Step 2: Join ---
    let success = state.auth.auth_success(&user).map_err(yep_auth::AuthError::from)?;
    reply(outbox, &state.codec, &success).await?;

    let previous = state
        .registry
        .insert(SessionHandle {
            user_id: user.id.clone(),
            identity: user.contact().to_string(),
            level: user.level,
            conn_id,
            outbox: outbox.clone(),
        })
        .await;
    let _guard = RegistrationGuard {
        user_id: user.id.clone(),
        contact: user.contact().to_string(),
        conn_id,
        state: Arc::clone(state),
    };
    if let Some(old) = previous {
        if let Err(e) = evict(&old, &state.codec) {
            tracing::warn!(
                user_id = %old.user_id,
                conn_id = %old.conn_id,
                error = %e,
                "eviction notice not delivered"
            );
        }
    }

    let join = ServerMessage::UserJoin {
        content: format!("{} joined the chat", user.contact()),
        timestamp: unix_now(),
    };
    state
        .registry
        .broadcast(encode(&state.codec, &join)?, Some(&user.id))
        .await;

    let online = state.registry.online().await;
    tracing::info!(user_id = %user.id, online = online.len(), "user joined");
    let online = ServerMessage::OnlineUsers {
        content: format!("Online: {} users", online.len()),
        data: online,
        timestamp: unix_now(),
    };
    reply(outbox, &state.codec, &online).await?;

    // --- Step 3: Message loop ---
    let author = Author {
        user_id: user.id.clone(),
        contact: user.contact().to_string(),
        level: user.level,
    };

    loop {
        let data = tokio::select! {
            _ = outbox.closed() => {
                tracing::info!(user_id = %author.user_id, "session closed by server");
                break;
            }
            received = recv_within(conn, state.config.idle_timeout) => match received {
                Received::Frame(data) => data,
                Received::Closed => {
                    tracing::info!(user_id = %author.user_id, "connection closed cleanly");
                    break;
                }
                Received::Failed(e) => {
                    tracing::debug!(user_id = %author.user_id, error = %e, "recv error");
                    break;
                }
                Received::TimedOut => {
                    tracing::info!(user_id = %author.user_id, "connection idle, dropping");
                    break;
                }
            },
        };

        let message: ClientMessage = match state.codec.decode(&data) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(user_id = %author.user_id, error = %e, "failed to decode message");
                reply(outbox, &state.codec, &ServerMessage::error("Invalid message format")).await?;
                continue;
            }
        };

        match message {
            ClientMessage::Message { content } => {
                handle_chat_message(outbox, state, &author, content).await?;
            }
            ClientMessage::Ping => {
                reply(outbox, &state.codec, &ServerMessage::Pong { timestamp: unix_now() }).await?;
            }
            ClientMessage::OtpVerify { .. } => {
                reply(outbox, &state.codec, &ServerMessage::error("Already verified")).await?;
            }
        }
    }

    // _guard drops here → deregistration and leave notice fire.
    Ok(())
}

/// Reads the handshake and drives the gate until the connection is
/// authenticated or must close.
async fn authenticate<T, U, K, M, C>(
    conn: &T,
    outbox: &Outbox,
    state: &Arc<ServerState<U, K, M, C>>,
) -> Result<User, YepError>
where
    T: Connection,
    U: UserStore,
    K: CodeStore,
    M: MessageLog,
    C: Codec,
{
    let handshake_timeout = state.config.handshake_timeout;
    let data = match recv_within(conn, handshake_timeout).await {
        Received::Frame(data) => data,
        Received::Closed => return Err(HandshakeError::Missing.into()),
        Received::Failed(e) => return Err(e.into()),
        Received::TimedOut => {
            let err = HandshakeError::TimedOut(handshake_timeout);
            send_error(outbox, &state.codec, &format!("Invalid handshake: {err}")).await?;
            return Err(err.into());
        }
    };

    let mut gate = Gate::new(&state.auth);
    let mut step = match state.codec.decode::<Handshake>(&data) {
        Ok(handshake) => gate.handshake(handshake).await,
        Err(e) => Err(GateError::Handshake(HandshakeError::Malformed(e.to_string()))),
    };

    loop {
        match step {
            Ok(Step::Authenticated(user)) => return Ok(user),
            Ok(Step::VerificationRequired(yui)) => {
                tracing::info!(conn_id = %conn.id(), user_id = %yui, "verification required");
                let prompt = ServerMessage::VerificationRequired {
                    content: VERIFICATION_PROMPT.to_string(),
                    yui,
                };
                reply(outbox, &state.codec, &prompt).await?;
            }
            Err(e) => {
                reply(outbox, &state.codec, &e.reply()).await?;
                if e.is_terminal() {
                    tracing::info!(conn_id = %conn.id(), error = %e, "authentication rejected");
                    return Err(e.into());
                }
                tracing::debug!(conn_id = %conn.id(), error = %e, "verification retry");
            }
        }

        let data = match recv_within(conn, state.config.idle_timeout).await {
            Received::Frame(data) => data,
            Received::Closed => {
                return Err(TransportError::ConnectionClosed("closed during verification".into()).into());
            }
            Received::Failed(e) => return Err(e.into()),
            Received::TimedOut => {
                return Err(HandshakeError::TimedOut(state.config.idle_timeout).into());
            }
        };
        step = match state.codec.decode::<ClientMessage>(&data) {
            Ok(message) => gate.submit(message).await,
            Err(_) => Err(GateError::AwaitingCode),
        };
    }
}

async fn handle_chat_message<U, K, M, C>(
    outbox: &Outbox,
    state: &Arc<ServerState<U, K, M, C>>,
    author: &Author,
    content: String,
) -> Result<(), YepError>
where
    U: UserStore,
    K: CodeStore,
    M: MessageLog,
    C: Codec,
{
    let now = unix_now();
    match process(&content, author, &state.config.level_policy, now) {
        Processed::Broadcast(message) => {
            let report = state
                .registry
                .broadcast(encode(&state.codec, &message)?, Some(&author.user_id))
                .await;
            tracing::debug!(
                user_id = %author.user_id,
                delivered = report.delivered,
                dropped = report.dropped,
                "message broadcast"
            );

            let record = ChatRecord {
                from: author.user_id.clone(),
                content,
                level: author.level,
                timestamp: now,
            };
            if let Err(e) = state.history.append(record).await {
                tracing::warn!(user_id = %author.user_id, error = %e, "failed to store message");
            }
        }
        Processed::Rejected { reply: message, error } => {
            tracing::debug!(user_id = %author.user_id, error = %error, "message rejected by policy");
            reply(outbox, &state.codec, &message).await?;
        }
    }
    Ok(())
}

/// Tells a replaced session why it is going away and closes it.
///
/// The outbox is closed even when the notice can't be queued; the error
/// says why the client never saw it.
fn evict(old: &SessionHandle, codec: &impl Codec) -> Result<(), YepError> {
    tracing::info!(user_id = %old.user_id, conn_id = %old.conn_id, "evicting replaced session");
    let notice = ServerMessage::error("Signed in from another connection");
    let queued = encode(codec, &notice)
        .and_then(|frame| old.outbox.try_deliver(frame).map_err(YepError::from));
    old.outbox.close();
    queued
}

enum Received {
    Frame(Vec<u8>),
    Closed,
    Failed(TransportError),
    TimedOut,
}

async fn recv_within<T: Connection>(conn: &T, limit: Duration) -> Received {
    match tokio::time::timeout(limit, conn.recv()).await {
        Ok(Ok(Some(data))) => Received::Frame(data),
        Ok(Ok(None)) => Received::Closed,
        Ok(Err(e)) => Received::Failed(e),
        Err(_) => Received::TimedOut,
    }
}

fn encode(codec: &impl Codec, message: &ServerMessage) -> Result<Frame, YepError> {
    Ok(Frame::from(codec.encode(message)?))
}

/// Queues a message for this connection's own client.
async fn reply(outbox: &Outbox, codec: &impl Codec, message: &ServerMessage) -> Result<(), YepError> {
    outbox.send(encode(codec, message)?).await?;
    Ok(())
}

/// Queues an `ERROR` for this connection's own client.
async fn send_error(outbox: &Outbox, codec: &impl Codec, content: &str) -> Result<(), YepError> {
    reply(outbox, codec, &ServerMessage::error(content)).await
}
