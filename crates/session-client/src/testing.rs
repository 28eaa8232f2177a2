//! Test doubles shared by the unit tests in this crate

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_auth::{AcquisitionError, CredentialPair, HandshakeExecutor};
use transport::{ApiRequest, ApiResponse, Method, Transport};

use crate::classify::{BodyShape, ClassifyRule, EmptyBody};
use crate::endpoint::{AuthRequirement, EndpointDescriptor};

type Handler = dyn Fn(&ApiRequest) -> transport::Result<ApiResponse> + Send + Sync;

/// Transport answering every request through a closure and recording what it
/// was sent.
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest) -> transport::Result<ApiResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    fn request(
        &self,
        request: ApiRequest,
    ) -> Pin<Box<dyn Future<Output = transport::Result<ApiResponse>> + Send + '_>> {
        let response = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        Box::pin(async move { response })
    }
}

/// Handshake returning queued outcomes in order, each after its own delay.
/// An exhausted queue yields `MissingToken`.
pub(crate) struct QueueHandshake {
    outcomes: Mutex<VecDeque<(Duration, Result<CredentialPair, AcquisitionError>)>>,
    invocations: AtomicUsize,
}

impl QueueHandshake {
    pub(crate) fn new(outcomes: Vec<Result<CredentialPair, AcquisitionError>>) -> Arc<Self> {
        Self::delayed(
            outcomes
                .into_iter()
                .map(|outcome| (Duration::ZERO, outcome))
                .collect(),
        )
    }

    pub(crate) fn delayed(
        outcomes: Vec<(Duration, Result<CredentialPair, AcquisitionError>)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            invocations: AtomicUsize::new(0),
        })
    }

    pub(crate) fn count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl HandshakeExecutor for QueueHandshake {
    fn acquire(
        &self,
    ) -> Pin<Box<dyn Future<Output = session_auth::Result<CredentialPair>> + Send + '_>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let next = self.outcomes.lock().unwrap().pop_front();
        Box::pin(async move {
            let (delay, outcome) = next.unwrap_or((Duration::ZERO, Err(AcquisitionError::MissingToken)));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }
}

pub(crate) fn pair(cookie: &str, token: &str) -> CredentialPair {
    CredentialPair::new(cookie.to_string(), token.to_string())
}

/// Cookie value (for `PHPSESSID`) and `X-CSRF-Token` value on a request.
pub(crate) fn credentials_of(request: &ApiRequest) -> (Option<String>, Option<String>) {
    let cookie = request
        .headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("PHPSESSID="))
        .map(str::to_string);
    let token = request
        .headers
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (cookie, token)
}

/// Protected arrivals endpoint returning a JSON array; empty body means "no
/// arrivals".
pub(crate) fn arrivals_endpoint() -> EndpointDescriptor {
    EndpointDescriptor::new(
        "stop_arrivals",
        AuthRequirement::RequiresPair,
        "/api/",
        ClassifyRule::new(EmptyBody::Success).with_shape(BodyShape::JsonArray),
    )
    .with_method(Method::Post)
    .with_fixed_query("act", "getStopArrivals")
}

/// Open endpoint that needs no credentials.
pub(crate) fn open_endpoint() -> EndpointDescriptor {
    EndpointDescriptor::new(
        "is_production",
        AuthRequirement::None,
        "/api/",
        ClassifyRule::new(EmptyBody::Success),
    )
    .with_fixed_query("act", "isProduction")
}
