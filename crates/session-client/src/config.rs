//! Configuration types and loading
//!
//! Everything the client needs to reach one backend: where it lives, how the
//! session is minted, how the pair is attached, and the endpoint table. All
//! values come from a TOML file; nothing is read from the environment and
//! no credential is ever stored in the file.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use session_auth::{
    DEFAULT_COOKIE_NAME, DEFAULT_ENTRY_PATH, DEFAULT_TOKEN_HEADER, DEFAULT_TOKEN_PATTERN,
    HandshakeSettings, HandshakeStep, PageHandshake, TokenSource,
};
use tracing::info;
use transport::{HeaderInjection, HttpTransport, Method, Transport};

use crate::classify::ClassifyRule;
use crate::client::{ClientSettings, SessionClient};
use crate::endpoint::{AuthRequirement, EndpointCatalog, EndpointDescriptor, ParamPlacement};

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub remote: RemoteConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// Backend location and wire settings
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Headers added to every request (handshake and calls)
    #[serde(default)]
    pub headers: Vec<HeaderInjection>,
}

/// How the credential pair is attached
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    #[serde(default = "default_token_header")]
    pub token_header: String,
    /// Re-handshake pairs older than this even if never rejected
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            token_header: default_token_header(),
            max_age_secs: None,
        }
    }
}

/// Bootstrap sequence
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default = "default_steps")]
    pub steps: Vec<HandshakeStep>,
    #[serde(default)]
    pub token: TokenConfig,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            token: TokenConfig::default(),
        }
    }
}

/// Where the handshake finds the token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum TokenConfig {
    Body {
        #[serde(default = "default_token_pattern")]
        pattern: String,
    },
    Header {
        name: String,
    },
}

impl Default for TokenConfig {
    fn default() -> Self {
        TokenConfig::Body {
            pattern: default_token_pattern(),
        }
    }
}

/// One entry of the endpoint table
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub auth: AuthRequirement,
    #[serde(default)]
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub params: ParamPlacement,
    pub classify: ClassifyRule,
}

impl EndpointConfig {
    fn descriptor(&self) -> EndpointDescriptor {
        let mut endpoint = EndpointDescriptor::new(
            self.name.clone(),
            self.auth,
            self.path.clone(),
            self.classify.clone(),
        )
        .with_method(self.method)
        .with_params(self.params);
        for (key, value) in &self.query {
            endpoint = endpoint.with_fixed_query(key.clone(), value.clone());
        }
        endpoint
    }
}

fn default_timeout() -> u64 {
    15
}

fn default_cookie_name() -> String {
    DEFAULT_COOKIE_NAME.to_string()
}

fn default_token_header() -> String {
    DEFAULT_TOKEN_HEADER.to_string()
}

fn default_steps() -> Vec<HandshakeStep> {
    vec![HandshakeStep::get(DEFAULT_ENTRY_PATH)]
}

fn default_token_pattern() -> String {
    DEFAULT_TOKEN_PATTERN.to_string()
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(contents: &str) -> common::Result<Self> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> common::Result<()> {
        // Validate base_url is a valid URL with http(s) scheme
        if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.remote.base_url
            )));
        }

        if self.remote.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.max_age_secs == Some(0) {
            return Err(common::Error::Config(
                "max_age_secs must be greater than 0 when set".into(),
            ));
        }

        if self.session.cookie_name.trim().is_empty() {
            return Err(common::Error::Config("cookie_name must not be empty".into()));
        }

        if !is_header_name(&self.session.token_header) {
            return Err(common::Error::Config(format!(
                "token_header is not a valid header name: {:?}",
                self.session.token_header
            )));
        }

        if self.handshake.steps.is_empty() {
            return Err(common::Error::Config(
                "handshake needs at least one step".into(),
            ));
        }
        for step in &self.handshake.steps {
            if !step.path.starts_with('/') {
                return Err(common::Error::Config(format!(
                    "handshake step path must start with '/', got: {}",
                    step.path
                )));
            }
        }

        // Compiles the token pattern and checks for a capture group
        self.token_source()?;

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(common::Error::Config("endpoint name must not be empty".into()));
            }
            if !seen.insert(endpoint.name.as_str()) {
                return Err(common::Error::Config(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name
                )));
            }
            if !endpoint.path.starts_with('/') {
                return Err(common::Error::Config(format!(
                    "endpoint {} path must start with '/', got: {}",
                    endpoint.name, endpoint.path
                )));
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.remote.timeout_secs)
    }

    pub fn handshake_settings(&self) -> common::Result<HandshakeSettings> {
        Ok(HandshakeSettings {
            steps: self.handshake.steps.clone(),
            cookie_name: self.session.cookie_name.clone(),
            token_source: self.token_source()?,
        })
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            cookie_name: self.session.cookie_name.clone(),
            token_header: self.session.token_header.clone(),
            max_age: self.session.max_age_secs.map(Duration::from_secs),
        }
    }

    pub fn catalog(&self) -> EndpointCatalog {
        self.endpoints.iter().map(EndpointConfig::descriptor).collect()
    }

    fn token_source(&self) -> common::Result<TokenSource> {
        match &self.handshake.token {
            TokenConfig::Body { pattern } => TokenSource::body_pattern(pattern)
                .map_err(|e| common::Error::Config(e.to_string())),
            TokenConfig::Header { name } if is_header_name(name) => {
                Ok(TokenSource::Header(name.clone()))
            }
            TokenConfig::Header { name } => Err(common::Error::Config(format!(
                "token header is not a valid header name: {name:?}"
            ))),
        }
    }
}

fn is_header_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl SessionClient {
    /// Build a client backed by `HttpTransport` and `PageHandshake`.
    pub fn from_config(config: &ClientConfig) -> common::Result<Self> {
        config.validate()?;

        let transport = HttpTransport::new(config.remote.base_url.clone(), config.timeout())
            .map_err(|e| common::Error::Config(format!("failed to build HTTP client: {e}")))?
            .with_headers(config.remote.headers.clone())
            .protect_header(&config.session.token_header);
        let transport: Arc<dyn Transport> = Arc::new(transport);

        let handshake = PageHandshake::new(transport.clone(), config.handshake_settings()?)
            .map_err(|e| common::Error::Config(e.to_string()))?;

        info!(
            base_url = %config.remote.base_url,
            endpoints = config.endpoints.len(),
            handshake_steps = config.handshake.steps.len(),
            "session client configured"
        );

        Ok(
            SessionClient::new(transport, Arc::new(handshake), config.client_settings())
                .with_catalog(config.catalog()),
        )
    }
}
