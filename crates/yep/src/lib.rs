//! # YEP
//!
//! Real-time chat session core.
//!
//! A connection opens with a handshake (a session token, or credentials
//! for login or registration). New or inactive accounts with a phone
//! number prove ownership with a one-time code. Once authenticated the
//! session is registered and every chat message it sends is checked
//! against its level policy and broadcast to everyone else.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use yep::prelude::*;
//!
//! # async fn start() -> Result<(), YepError> {
//! let server = YepServerBuilder::new()
//!     .config(ServerConfig::from_env()?)
//!     .build(
//!         Arc::new(MemoryUserStore::new()),
//!         Arc::new(MemoryCodeStore::new()),
//!         Arc::new(MemoryMessageLog::new()),
//!     )
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod gatekeeper;
mod handler;
mod history;
mod processor;
mod server;

pub use config::{LevelPolicy, ServerConfig};
pub use error::{ConfigError, HandshakeError, PolicyError, YepError};
pub use gatekeeper::{AuthServices, Gate, GateError, GateState, Step, VERIFICATION_PROMPT};
pub use history::{ChatRecord, MemoryMessageLog, MessageLog};
pub use processor::{Author, Processed, process};
pub use server::{YepHandle, YepServer, YepServerBuilder};

/// Everything needed to run a server with the in-memory stores.
pub mod prelude {
    pub use crate::{
        LevelPolicy, MemoryMessageLog, MessageLog, ServerConfig, YepError, YepHandle, YepServer,
        YepServerBuilder,
    };
    pub use yep_auth::{CodeStore, MemoryCodeStore, MemoryUserStore, UserStore};
    pub use yep_protocol::{ClientMessage, Codec, Handshake, JsonCodec, Level, ServerMessage, UserId};
}
