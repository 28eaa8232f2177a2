//! Handshake executor
//!
//! A handshake is the request sequence that makes the server mint a new
//! session cookie and reveal the token bound to it. Each `acquire()` call is
//! self-contained: the cookie and the token it returns were observed during
//! that invocation's own round-trips, never carried over from another attempt.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};
use transport::{ApiRequest, Method, Transport};

use crate::constants::{DEFAULT_COOKIE_NAME, DEFAULT_ENTRY_PATH, DEFAULT_TOKEN_PATTERN};
use crate::credentials::CredentialPair;
use crate::error::{Error, Result};
use crate::extract;

/// Produces a fresh, mutually-bound credential pair.
///
/// Implementations must not mutate shared state; the caller decides where the
/// returned pair is stored and whether a failed attempt is retried.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn HandshakeExecutor>`).
pub trait HandshakeExecutor: Send + Sync {
    fn acquire(&self) -> Pin<Box<dyn Future<Output = Result<CredentialPair>> + Send + '_>>;
}

/// One request of the bootstrap sequence.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeStep {
    #[serde(default)]
    pub method: Method,
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
}

impl HandshakeStep {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: BTreeMap::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }
}

/// Where the anti-forgery token appears in handshake responses.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// First capture group of a regex over the response body
    Body(Regex),
    /// Value of a response header
    Header(String),
}

impl TokenSource {
    /// Body pattern source; the pattern must contain a capture group.
    pub fn body_pattern(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid token pattern: {e}")))?;
        if regex.captures_len() < 2 {
            return Err(Error::Config(
                "token pattern must contain a capture group".into(),
            ));
        }
        Ok(TokenSource::Body(regex))
    }

    fn extract(&self, response: &transport::ApiResponse) -> Option<String> {
        match self {
            TokenSource::Body(pattern) => extract::token_from_body(pattern, &response.body),
            TokenSource::Header(name) => extract::token_from_header(response, name),
        }
    }
}

/// Settings for `PageHandshake`.
#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    pub steps: Vec<HandshakeStep>,
    pub cookie_name: String,
    pub token_source: TokenSource,
}

impl Default for HandshakeSettings {
    /// Single GET of the entry page, `PHPSESSID` cookie, `window.token` in the body.
    fn default() -> Self {
        Self {
            steps: vec![HandshakeStep::get(DEFAULT_ENTRY_PATH)],
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            token_source: TokenSource::Body(
                Regex::new(DEFAULT_TOKEN_PATTERN).expect("default token pattern is valid"),
            ),
        }
    }
}

/// Handshake that walks a fixed list of pages/API calls.
///
/// The session cookie is taken from `Set-Cookie` of any step and sent on every
/// later step of the same attempt, so priming calls run inside the session
/// being minted. The token source is evaluated on every step; the last match
/// wins. A non-2xx status on any step fails the attempt.
pub struct PageHandshake {
    transport: Arc<dyn Transport>,
    settings: HandshakeSettings,
}

impl PageHandshake {
    pub fn new(transport: Arc<dyn Transport>, settings: HandshakeSettings) -> Result<Self> {
        if settings.steps.is_empty() {
            return Err(Error::Config("handshake needs at least one step".into()));
        }
        if settings.cookie_name.trim().is_empty() {
            return Err(Error::Config("cookie name must not be empty".into()));
        }
        Ok(Self {
            transport,
            settings,
        })
    }

    async fn run(&self) -> Result<CredentialPair> {
        let cookie_name = &self.settings.cookie_name;
        let mut cookie: Option<String> = None;
        let mut token: Option<String> = None;

        info!(steps = self.settings.steps.len(), "starting session handshake");

        for (index, step) in self.settings.steps.iter().enumerate() {
            let mut request = ApiRequest::new(step.method, step.path.clone());
            for (key, value) in &step.query {
                request = request.with_query(key.clone(), value.clone());
            }
            if let Some(ref value) = cookie {
                request
                    .set_header("cookie", &format!("{cookie_name}={value}"))
                    .map_err(|e| Error::Transport {
                        step: index,
                        path: step.path.clone(),
                        message: e.to_string(),
                    })?;
            }

            let response = self
                .transport
                .request(request)
                .await
                .map_err(|e| Error::Transport {
                    step: index,
                    path: step.path.clone(),
                    message: e.to_string(),
                })?;

            if !response.is_success() {
                warn!(step = index, path = %step.path, status = response.status, "handshake step rejected");
                return Err(Error::Status {
                    step: index,
                    path: step.path.clone(),
                    status: response.status,
                });
            }

            if let Some(value) = extract::session_cookie(&response, cookie_name) {
                if value.is_empty() {
                    debug!(step = index, "server cleared session cookie");
                    cookie = None;
                } else {
                    debug!(step = index, "session cookie observed");
                    cookie = Some(value);
                }
            }
            if let Some(value) = self.settings.token_source.extract(&response) {
                debug!(step = index, "anti-forgery token observed");
                token = Some(value);
            }
        }

        let cookie = cookie.ok_or_else(|| Error::MissingCookie {
            cookie_name: cookie_name.clone(),
        })?;
        let token = token.ok_or(Error::MissingToken)?;

        info!("session handshake succeeded");
        Ok(CredentialPair::new(cookie, token))
    }
}

impl HandshakeExecutor for PageHandshake {
    fn acquire(&self) -> Pin<Box<dyn Future<Output = Result<CredentialPair>> + Send + '_>> {
        Box::pin(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use transport::{ApiResponse, TransportError};

    /// Transport that replays canned responses and records requests.
    struct ScriptedTransport {
        responses: Mutex<VecDeque<transport::Result<ApiResponse>>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<transport::Result<ApiResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn request(
            &self,
            request: ApiRequest,
        ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
            self.requests.lock().unwrap().push(request);
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request");
            Box::pin(async move { next })
        }
    }

    fn entry_page(cookie: &str, token: &str) -> ApiResponse {
        ApiResponse::new(200, format!(r#"<script>window.token = "{token}";</script>"#))
            .with_header("set-cookie", &format!("PHPSESSID={cookie}; path=/"))
    }

    fn handshake(transport: Arc<dyn Transport>, settings: HandshakeSettings) -> PageHandshake {
        PageHandshake::new(transport, settings).unwrap()
    }

    #[tokio::test]
    async fn default_handshake_reads_cookie_and_token_from_entry_page() {
        let transport = ScriptedTransport::new(vec![Ok(entry_page("S1", "T1"))]);
        let executor = handshake(transport.clone(), HandshakeSettings::default());

        let pair = executor.acquire().await.unwrap();

        assert!(pair.is_valid());
        assert_eq!(pair.cookie(), "S1");
        assert_eq!(pair.token(), "T1");
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/en/");
        assert!(requests[0].headers.get("cookie").is_none());
    }

    #[tokio::test]
    async fn missing_token_is_acquisition_error() {
        let response = ApiResponse::new(200, "<html>maintenance</html>")
            .with_header("set-cookie", "PHPSESSID=S1; path=/");
        let transport = ScriptedTransport::new(vec![Ok(response)]);
        let executor = handshake(transport, HandshakeSettings::default());

        let err = executor.acquire().await.unwrap_err();
        assert_eq!(err, Error::MissingToken);
    }

    #[tokio::test]
    async fn missing_cookie_is_acquisition_error() {
        let response = ApiResponse::new(200, r#"window.token = "T1""#);
        let transport = ScriptedTransport::new(vec![Ok(response)]);
        let executor = handshake(transport, HandshakeSettings::default());

        let err = executor.acquire().await.unwrap_err();
        assert_eq!(
            err,
            Error::MissingCookie {
                cookie_name: "PHPSESSID".into()
            }
        );
    }

    #[tokio::test]
    async fn non_success_step_fails_attempt() {
        let transport = ScriptedTransport::new(vec![Ok(ApiResponse::new(503, "busy"))]);
        let executor = handshake(transport, HandshakeSettings::default());

        let err = executor.acquire().await.unwrap_err();
        assert!(
            matches!(err, Error::Status { step: 0, status: 503, .. }),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn transport_failure_fails_attempt() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Timeout(
            "deadline".into(),
        ))]);
        let executor = handshake(transport, HandshakeSettings::default());

        let err = executor.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Transport { step: 0, .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn later_steps_carry_captured_cookie() {
        let settings = HandshakeSettings {
            steps: vec![
                HandshakeStep::get("/en/"),
                HandshakeStep::get("/api/").with_query("act", "isProduction"),
            ],
            ..HandshakeSettings::default()
        };
        let transport = ScriptedTransport::new(vec![
            Ok(entry_page("S1", "T1")),
            Ok(ApiResponse::new(200, "true")),
        ]);
        let executor = handshake(transport.clone(), settings);

        let pair = executor.acquire().await.unwrap();

        assert_eq!(pair.cookie(), "S1");
        let requests = transport.requests();
        assert_eq!(requests[1].headers.get("cookie").unwrap(), "PHPSESSID=S1");
        assert_eq!(
            requests[1].query,
            vec![("act".to_string(), "isProduction".to_string())]
        );
    }

    #[tokio::test]
    async fn cookie_set_by_later_step_supersedes_earlier() {
        let settings = HandshakeSettings {
            steps: vec![HandshakeStep::get("/en/"), HandshakeStep::get("/api/")],
            ..HandshakeSettings::default()
        };
        let transport = ScriptedTransport::new(vec![
            Ok(entry_page("S1", "T1")),
            Ok(ApiResponse::new(200, "{}").with_header("set-cookie", "PHPSESSID=S1b; path=/")),
        ]);
        let executor = handshake(transport, settings);

        let pair = executor.acquire().await.unwrap();
        assert_eq!(pair.cookie(), "S1b");
        assert_eq!(pair.token(), "T1");
    }

    #[tokio::test]
    async fn cleared_cookie_without_reissue_is_missing() {
        let settings = HandshakeSettings {
            steps: vec![HandshakeStep::get("/en/"), HandshakeStep::get("/logout")],
            ..HandshakeSettings::default()
        };
        let transport = ScriptedTransport::new(vec![
            Ok(entry_page("S1", "T1")),
            Ok(ApiResponse::new(200, "").with_header("set-cookie", "PHPSESSID=; Max-Age=0")),
        ]);
        let executor = handshake(transport, settings);

        let err = executor.acquire().await.unwrap_err();
        assert!(matches!(err, Error::MissingCookie { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn php_deleted_cookie_is_not_kept_as_session() {
        let settings = HandshakeSettings {
            steps: vec![HandshakeStep::get("/en/"), HandshakeStep::get("/api/")],
            ..HandshakeSettings::default()
        };
        let transport = ScriptedTransport::new(vec![
            Ok(entry_page("S1", "T1")),
            Ok(ApiResponse::new(200, "{}").with_header(
                "set-cookie",
                "PHPSESSID=deleted; expires=Thu, 01-Jan-1970 00:00:01 GMT; Max-Age=0; path=/",
            )),
        ]);
        let executor = handshake(transport, settings);

        let err = executor.acquire().await.unwrap_err();
        assert!(matches!(err, Error::MissingCookie { .. }), "got: {err:?}");
    }

    #[tokio::test]
    async fn header_token_source() {
        let settings = HandshakeSettings {
            token_source: TokenSource::Header("x-csrf-token".into()),
            ..HandshakeSettings::default()
        };
        let response = ApiResponse::new(200, "<html></html>")
            .with_header("set-cookie", "PHPSESSID=S1")
            .with_header("x-csrf-token", "T-header");
        let transport = ScriptedTransport::new(vec![Ok(response)]);
        let executor = handshake(transport, settings);

        let pair = executor.acquire().await.unwrap();
        assert_eq!(pair.token(), "T-header");
    }

    #[tokio::test]
    async fn separate_attempts_never_mix_values() {
        let transport = ScriptedTransport::new(vec![
            Ok(entry_page("S1", "T1")),
            Ok(ApiResponse::new(200, "<html>no token</html>")
                .with_header("set-cookie", "PHPSESSID=S2")),
        ]);
        let executor = handshake(transport, HandshakeSettings::default());

        let first = executor.acquire().await.unwrap();
        assert_eq!((first.cookie(), first.token()), ("S1", "T1"));

        // Second attempt sees cookie S2 but no token: it must fail rather
        // than pair S2 with the earlier T1.
        let err = executor.acquire().await.unwrap_err();
        assert_eq!(err, Error::MissingToken);
    }

    /// Backend that mints a new session per entry-page load and returns a
    /// token derived from the cookie it receives on the follow-up call.
    struct MintingBackend {
        minted: AtomicUsize,
    }

    impl Transport for MintingBackend {
        fn request(
            &self,
            request: ApiRequest,
        ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                if request.path == "/en/" {
                    let n = self.minted.fetch_add(1, Ordering::SeqCst) + 1;
                    return Ok(ApiResponse::new(200, "<html></html>")
                        .with_header("set-cookie", &format!("PHPSESSID=S{n}; path=/")));
                }
                let cookie = request
                    .headers
                    .get("cookie")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("PHPSESSID="))
                    .unwrap_or("none")
                    .to_string();
                Ok(ApiResponse::new(200, "{}").with_header("x-csrf-token", &format!("T-{cookie}")))
            })
        }
    }

    #[tokio::test]
    async fn concurrent_acquires_each_return_their_own_bound_pair() {
        let backend = Arc::new(MintingBackend {
            minted: AtomicUsize::new(0),
        });
        let settings = HandshakeSettings {
            steps: vec![HandshakeStep::get("/en/"), HandshakeStep::get("/api/")],
            token_source: TokenSource::Header("x-csrf-token".into()),
            ..HandshakeSettings::default()
        };
        let executor = Arc::new(handshake(backend, settings));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let executor = executor.clone();
            tasks.push(tokio::spawn(async move { executor.acquire().await }));
        }

        let mut cookies = Vec::new();
        for task in tasks {
            let pair = task.await.unwrap().unwrap();
            assert_eq!(pair.token(), format!("T-{}", pair.cookie()));
            cookies.push(pair.cookie().to_string());
        }
        cookies.sort();
        cookies.dedup();
        assert_eq!(cookies.len(), 8, "every attempt must mint its own session");
    }

    #[test]
    fn rejects_empty_step_list() {
        let transport = ScriptedTransport::new(vec![]);
        let settings = HandshakeSettings {
            steps: vec![],
            ..HandshakeSettings::default()
        };
        assert!(matches!(
            PageHandshake::new(transport, settings),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn body_pattern_requires_capture_group() {
        assert!(TokenSource::body_pattern(r"window\.token").is_err());
        assert!(TokenSource::body_pattern(r"(unclosed").is_err());
        assert!(TokenSource::body_pattern(DEFAULT_TOKEN_PATTERN).is_ok());
    }

    #[test]
    fn step_deserializes_from_toml() {
        let step: HandshakeStep = toml::from_str(
            r#"
method = "POST"
path = "/api/"
query = { act = "isProduction" }
"#,
        )
        .unwrap();
        assert_eq!(step.method, Method::Post);
        assert_eq!(step.query.get("act").map(String::as_str), Some("isProduction"));
    }
}
