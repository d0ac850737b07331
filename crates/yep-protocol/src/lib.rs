//! Wire protocol for YEP.
//!
//! - **Types** ([`Handshake`], [`ClientMessage`], [`ServerMessage`],
//!   [`UserId`], [`Level`]) — what travels on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how those messages are
//!   converted to and from bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (messages) → Gatekeeper (identity)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    ClientMessage, Credentials, Handshake, Level, ServerMessage, UserId, unix_now,
};
