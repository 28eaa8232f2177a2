//! Authenticated session client
//!
//! Calls a remote API that guards some operations with a server-issued
//! session cookie plus an anti-forgery token bound to it. The client owns the
//! pair, acquires it lazily through a handshake, and recovers from server-side
//! revocation by re-handshaking and retrying a rejected call exactly once.
//!
//! Call flow for a protected endpoint:
//! 1. Lease the current pair, running a coalesced handshake if it is unset,
//!    stale or too old
//! 2. Attach the cookie (`Cookie` header) and the token (token header)
//! 3. Classify the response with the endpoint's classifier
//! 4. Success → return; other failure → `RemoteFailure`
//! 5. Auth failure → mark the pair stale, re-handshake, retry once; a second
//!    auth failure → `PersistentAuthFailure`

pub mod classify;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod metrics;

#[cfg(test)]
pub(crate) mod testing;

pub use classify::{BodyShape, Classification, Classifier, ClassifyRule, EmptyBody};
pub use client::{ClientSettings, Response, SessionClient};
pub use config::ClientConfig;
pub use endpoint::{AuthRequirement, EndpointCatalog, EndpointDescriptor, ParamPlacement};
pub use error::{ClientError, Result};
pub use session_auth::{AcquisitionError, CredentialPair, PairState};
