//! Defaults for the transit backend's session handshake
//!
//! Discovered by probing the public web client. They describe where the
//! server mints its session and how the page exposes the token; none of them
//! are secrets.

/// Session cookie minted by the backend on the first page load
pub const DEFAULT_COOKIE_NAME: &str = "PHPSESSID";

/// Request header that carries the anti-forgery token on protected calls
pub const DEFAULT_TOKEN_HEADER: &str = "X-CSRF-Token";

/// Entry page whose response sets the cookie and embeds the token
pub const DEFAULT_ENTRY_PATH: &str = "/en/";

/// Token embedded in the entry page as `window.token = "..."`.
/// The first capture group is the token value.
pub const DEFAULT_TOKEN_PATTERN: &str = r#"window\.token\s*=\s*["']([^"']+)["']"#;
