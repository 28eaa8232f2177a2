//! reqwest-backed transport
//!
//! Resolves request paths against a base URL, injects the configured default
//! headers (browser-like `User-Agent`, `X-Requested-With`, `Origin`,
//! `Referer`), and returns the upstream response verbatim, including error
//! statuses and every `Set-Cookie` header.
//!
//! Redirects are not followed: a `Set-Cookie` on a redirect response would be
//! lost inside reqwest, and the handshake must see the cookie exactly as the
//! server set it.

use crate::{ApiRequest, ApiResponse, Method, Result, Transport, TransportError};
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Default header added to every request (name + value pair from config).
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

/// HTTP transport over a shared reqwest client.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    headers: Vec<HeaderInjection>,
    protected: Vec<HeaderName>,
}

impl HttpTransport {
    /// Build a transport for `base_url` with a per-request `timeout`.
    ///
    /// The underlying client has redirects disabled and no cookie store.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
            headers: Vec::new(),
            protected: vec![COOKIE],
        })
    }

    /// Default headers injected into every request that does not set them itself.
    pub fn with_headers(mut self, headers: Vec<HeaderInjection>) -> Self {
        self.headers = headers;
        self
    }

    /// Never inject a default for this header (e.g. the anti-forgery token header).
    ///
    /// `Cookie` is always protected.
    pub fn protect_header(mut self, name: &str) -> Self {
        match HeaderName::from_str(name) {
            Ok(name) => self.protected.push(name),
            Err(e) => warn!(header = name, error = %e, "ignoring invalid protected header name"),
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Add configured defaults without replacing request-specific headers.
    fn inject_defaults(&self, headers: &mut HeaderMap) {
        for injection in &self.headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            if self.protected.contains(&name) {
                warn!(header = %injection.name, "refusing to inject session-owned header");
                continue;
            }
            if headers.contains_key(&name) {
                continue;
            }
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            headers.insert(name, value);
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Http(e.to_string())
    }
}

impl Transport for HttpTransport {
    fn request(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ApiResponse>> + Send + '_>> {
        Box::pin(async move {
            let ApiRequest {
                method,
                path,
                query,
                mut headers,
                form,
            } = request;
            self.inject_defaults(&mut headers);
            let has_content_type = headers.contains_key(CONTENT_TYPE);

            let url = self.url(&path);
            let mut builder = self
                .client
                .request(method.into(), &url)
                .headers(headers)
                .timeout(self.timeout);
            if !query.is_empty() {
                builder = builder.query(&query);
            }
            if !form.is_empty() {
                builder = builder.form(&form);
            } else if method == Method::Post {
                // The backend expects a form content type even for parameterless POSTs
                if !has_content_type {
                    builder = builder.header(CONTENT_TYPE, "application/x-www-form-urlencoded");
                }
                builder = builder.body("");
            }

            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.text().await.map_err(map_reqwest_error)?;

            debug!(
                method = method.as_str(),
                path = %path,
                status,
                body_len = body.len(),
                "remote response"
            );

            Ok(ApiResponse {
                status,
                headers,
                body,
            })
        })
    }
}
