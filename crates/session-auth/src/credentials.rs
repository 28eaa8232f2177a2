//! Credential pair data model
//!
//! A pair is the minimal unit of auth state: the session cookie the server
//! set, and the anti-forgery token the server bound to that cookie. Values are
//! never mixed across handshakes; a new handshake always produces a new pair.

use std::time::Duration;

use common::Secret;
use tracing::debug;

/// Lifecycle state of a credential pair.
///
/// Transitions:
/// - Unset → Valid (handshake succeeded, pair replaced)
/// - Valid → Stale (a call using it was classified as an auth failure)
/// - Stale → Valid (handshake succeeded, pair replaced)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Unset,
    Valid,
    Stale,
}

impl PairState {
    /// State label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            PairState::Unset => "unset",
            PairState::Valid => "valid",
            PairState::Stale => "stale",
        }
    }
}

/// Session cookie + anti-forgery token, acquired together.
///
/// `acquired_at` is a unix timestamp in milliseconds. Cookie and token are
/// redacted in Debug output.
#[derive(Debug, Clone)]
pub struct CredentialPair {
    cookie: Secret<String>,
    token: Secret<String>,
    acquired_at: u64,
    state: PairState,
}

impl CredentialPair {
    /// Placeholder held by a client that has not completed a handshake yet.
    pub fn unset() -> Self {
        Self {
            cookie: Secret::new(String::new()),
            token: Secret::new(String::new()),
            acquired_at: 0,
            state: PairState::Unset,
        }
    }

    /// A freshly acquired pair, valid from now.
    pub fn new(cookie: String, token: String) -> Self {
        Self {
            cookie: Secret::new(cookie),
            token: Secret::new(token),
            acquired_at: now_millis(),
            state: PairState::Valid,
        }
    }

    /// Override the acquisition timestamp (unix millis).
    pub fn with_acquired_at(mut self, acquired_at: u64) -> Self {
        self.acquired_at = acquired_at;
        self
    }

    pub fn cookie(&self) -> &str {
        self.cookie.expose()
    }

    pub fn token(&self) -> &str {
        self.token.expose()
    }

    pub fn acquired_at(&self) -> u64 {
        self.acquired_at
    }

    pub fn state(&self) -> PairState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == PairState::Valid
    }

    /// Whether a call may use this pair at `now` (unix millis).
    ///
    /// Requires `Valid`; with `max_age` set, a pair acquired `max_age` or more
    /// ago is not usable either, but its state is left alone.
    pub fn is_usable(&self, max_age: Option<Duration>, now: u64) -> bool {
        if !self.is_valid() {
            return false;
        }
        match max_age {
            Some(max_age) => now.saturating_sub(self.acquired_at) < max_age.as_millis() as u64,
            None => true,
        }
    }

    /// Valid → Stale. Unset and Stale pairs are left unchanged.
    pub fn mark_stale(&mut self) {
        if self.state == PairState::Valid {
            debug!(acquired_at = self.acquired_at, "credential pair marked stale");
            self.state = PairState::Stale;
        }
    }
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
