//! Session credential acquisition
//!
//! Models the credential pair (server-issued session cookie plus the
//! anti-forgery token the server binds to it) and the handshake that mints a
//! fresh pair. This crate has no dependency on the call-dispatch layer and can
//! be tested and used independently.
//!
//! Credential flow:
//! 1. Session client starts with `CredentialPair::unset()`
//! 2. A protected call needs a pair, so the client runs `HandshakeExecutor::acquire()`
//! 3. `PageHandshake` requests the entry surface, captures the session cookie
//!    from `Set-Cookie`, and extracts the token from the same round-trips
//! 4. The client attaches the pair to protected calls
//! 5. On an auth failure the client marks the pair stale and acquires a new one

pub mod constants;
pub mod credentials;
pub mod error;
pub mod extract;
pub mod handshake;

pub use constants::*;
pub use credentials::{CredentialPair, PairState, now_millis};
pub use error::{AcquisitionError, Error, Result};
pub use handshake::{HandshakeExecutor, HandshakeSettings, HandshakeStep, PageHandshake, TokenSource};
