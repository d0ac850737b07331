//! Identity services for YEP.
//!
//! This crate answers three questions for the session core:
//!
//! 1. **Who is this?** Registration and password login ([`CredentialService`])
//!    plus signed session tokens ([`TokenIssuer`]).
//! 2. **Do they own that phone?** One-time codes keyed by a salted phone
//!    fingerprint ([`VerificationFlow`], [`PhoneFingerprinter`]).
//! 3. **Who is still mid-verification?** [`PendingVerifications`].
//!
//! Storage sits behind [`UserStore`] and [`CodeStore`]; the [`memory`]
//! module has implementations for tests and single-process deployments.
//!
//! # How it fits in the stack
//!
//! ```text
//! Gatekeeper (above)  ← drives handshakes through these services
//!     ↕
//! Auth Layer (this crate)  ← users, codes, tokens
//!     ↕
//! Protocol Layer (below)  ← provides UserId, Level
//! ```

mod credentials;
mod error;
mod fingerprint;
pub mod memory;
mod model;
mod password;
mod pending;
mod store;
mod token;
mod verification;

pub use credentials::{CredentialService, LoginIdentifier};
pub use error::{AuthError, StoreError, TokenError, VerificationError};
pub use fingerprint::PhoneFingerprinter;
pub use memory::{MemoryCodeStore, MemoryUserStore};
pub use model::User;
pub use password::{hash_password, verify_password};
pub use pending::{PendingVerification, PendingVerifications};
pub use store::{CodeCheck, CodeStore, UserStore};
pub use token::{
    DEFAULT_REFRESH_TTL, DEFAULT_SESSION_TTL, REFRESH_ISSUER, RefreshClaims, SESSION_ISSUER,
    SessionClaims, TokenIssuer,
};
pub use verification::{DEFAULT_CODE_TTL, VerificationFlow};
