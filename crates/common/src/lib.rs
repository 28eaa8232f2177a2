//! Shared types for the session client workspace
//!
//! Holds the redacting `Secret` wrapper used for cookie and token values, and
//! the configuration-level error type used when loading client settings.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
