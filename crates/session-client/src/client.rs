//! Session client: credential lifecycle and call dispatch
//!
//! The client owns the single current credential pair. Protected calls lease
//! the pair, attach it, classify the outcome and, on an auth failure, mark the
//! pair stale and retry once with a freshly acquired pair.
//!
//! Handshakes are coalesced: callers that find the pair unusable queue on one
//! gate, and only the first runs `acquire()`. The rest re-check the slot once
//! they get the gate and either reuse the new pair or share the failure of the
//! attempt they waited on.

use std::sync::Arc;
use std::time::Duration;

use session_auth::{
    AcquisitionError, CredentialPair, DEFAULT_COOKIE_NAME, DEFAULT_TOKEN_HEADER,
    HandshakeExecutor, PairState, now_millis,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};
use transport::{ApiRequest, ApiResponse, Transport};
use uuid::Uuid;

use crate::classify::Classification;
use crate::endpoint::{EndpointCatalog, EndpointDescriptor};
use crate::error::{ClientError, Result};

/// Longest body excerpt carried in a `RemoteFailure`.
const DETAILS_MAX_CHARS: usize = 200;

/// How the pair is attached and how long it may be used.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Name of the session cookie sent in the `Cookie` header
    pub cookie_name: String,
    /// Request header carrying the token
    pub token_header: String,
    /// Re-handshake once a pair is this old, even if never rejected
    pub max_age: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            max_age: None,
        }
    }
}

/// Successful call result.
#[derive(Debug, Clone)]
pub struct Response {
    endpoint: String,
    inner: ApiResponse,
}

impl Response {
    fn new(endpoint: &str, inner: ApiResponse) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            inner,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn status(&self) -> u16 {
        self.inner.status
    }

    pub fn body(&self) -> &str {
        &self.inner.body
    }

    pub fn header_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner.header_values(name)
    }

    /// Decode the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.inner.body)
    }
}

/// Current pair plus handshake bookkeeping, guarded by one lock.
struct Slot {
    pair: CredentialPair,
    /// Bumped every time a handshake installs a new pair
    generation: u64,
    /// Completed handshake attempts, successful or not
    attempts: u64,
    /// Error of the latest attempt, cleared by a success
    last_failure: Option<AcquisitionError>,
}

/// A pair handed to one call, tagged with the generation it came from.
struct Lease {
    pair: CredentialPair,
    generation: u64,
}

/// Client for the remote API that owns the credential pair.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    handshake: Arc<dyn HandshakeExecutor>,
    settings: ClientSettings,
    catalog: EndpointCatalog,
    slot: RwLock<Slot>,
    handshake_gate: Mutex<()>,
}

impl SessionClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        handshake: Arc<dyn HandshakeExecutor>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            handshake,
            settings,
            catalog: EndpointCatalog::new(),
            slot: RwLock::new(Slot {
                pair: CredentialPair::unset(),
                generation: 0,
                attempts: 0,
                last_failure: None,
            }),
            handshake_gate: Mutex::new(()),
        }
    }

    /// Attach an endpoint table for `call_named`.
    pub fn with_catalog(mut self, catalog: EndpointCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn catalog(&self) -> &EndpointCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// State of the pair currently held.
    pub async fn pair_state(&self) -> PairState {
        self.slot.read().await.pair.state()
    }

    /// Mark the current pair stale so the next protected call re-handshakes.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        slot.pair.mark_stale();
        info!(
            generation = slot.generation,
            state = slot.pair.state().label(),
            "credential pair invalidated"
        );
    }

    /// Call an endpoint from the attached catalog by name.
    pub async fn call_named(&self, name: &str, params: &[(&str, &str)]) -> Result<Response> {
        let endpoint = self
            .catalog
            .get(name)
            .ok_or_else(|| ClientError::UnknownEndpoint(name.to_string()))?;
        self.call(endpoint, params).await
    }

    /// Perform one remote operation.
    ///
    /// Protected endpoints get the current pair (acquired first if needed)
    /// and are retried exactly once after an auth failure. Open endpoints are
    /// sent without credentials and never trigger a handshake.
    #[instrument(skip_all, fields(call_id = %Uuid::new_v4(), endpoint = %endpoint.name))]
    pub async fn call(
        &self,
        endpoint: &EndpointDescriptor,
        params: &[(&str, &str)],
    ) -> Result<Response> {
        let result = if endpoint.requires_pair() {
            self.call_protected(endpoint, params).await
        } else {
            self.call_open(endpoint, params).await
        };

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        crate::metrics::record_call(&endpoint.name, outcome);
        match &result {
            Ok(response) => debug!(status = response.status(), "call succeeded"),
            Err(e) => warn!(error = %e, kind = e.kind(), "call failed"),
        }
        result
    }

    async fn call_open(
        &self,
        endpoint: &EndpointDescriptor,
        params: &[(&str, &str)],
    ) -> Result<Response> {
        let response = self.send(endpoint, endpoint.build_request(params)).await?;
        let classification = endpoint.classify(response.status, &response.body);
        debug!(
            status = response.status,
            classification = classification.label(),
            "response classified"
        );
        match classification {
            Classification::Success => Ok(Response::new(&endpoint.name, response)),
            // No pair was sent, so a fresh one would not change the answer
            Classification::AuthFailure => {
                warn!(status = response.status, "open endpoint reported an auth failure");
                Err(ClientError::PersistentAuthFailure {
                    endpoint: endpoint.name.clone(),
                    status: response.status,
                })
            }
            Classification::OtherFailure => Err(remote_failure(endpoint, &response)),
        }
    }

    async fn call_protected(
        &self,
        endpoint: &EndpointDescriptor,
        params: &[(&str, &str)],
    ) -> Result<Response> {
        let mut retried = false;
        loop {
            let lease = self.lease().await?;
            let mut request = endpoint.build_request(params);
            self.attach(endpoint, &mut request, &lease.pair)?;

            let response = self.send(endpoint, request).await?;
            let classification = endpoint.classify(response.status, &response.body);
            debug!(
                status = response.status,
                classification = classification.label(),
                generation = lease.generation,
                "response classified"
            );
            match classification {
                Classification::Success => return Ok(Response::new(&endpoint.name, response)),
                Classification::OtherFailure => return Err(remote_failure(endpoint, &response)),
                Classification::AuthFailure => {
                    self.mark_stale(lease.generation).await;
                    if retried {
                        warn!(
                            status = response.status,
                            generation = lease.generation,
                            "credentials rejected after fresh handshake"
                        );
                        return Err(ClientError::PersistentAuthFailure {
                            endpoint: endpoint.name.clone(),
                            status: response.status,
                        });
                    }
                    warn!(
                        status = response.status,
                        generation = lease.generation,
                        "credentials rejected, re-handshaking"
                    );
                    crate::metrics::record_auth_retry(&endpoint.name);
                    retried = true;
                }
            }
        }
    }

    /// A usable pair, running (or waiting on) a handshake when needed.
    async fn lease(&self) -> Result<Lease> {
        let observed_attempts = {
            let slot = self.slot.read().await;
            if slot.pair.is_usable(self.settings.max_age, now_millis()) {
                return Ok(Lease {
                    pair: slot.pair.clone(),
                    generation: slot.generation,
                });
            }
            slot.attempts
        };

        let _gate = self.handshake_gate.lock().await;

        {
            let slot = self.slot.read().await;
            if slot.pair.is_usable(self.settings.max_age, now_millis()) {
                debug!(generation = slot.generation, "reusing pair from concurrent handshake");
                return Ok(Lease {
                    pair: slot.pair.clone(),
                    generation: slot.generation,
                });
            }
            // An attempt finished while we queued and it failed
            if slot.attempts != observed_attempts
                && let Some(err) = &slot.last_failure
            {
                debug!(error = %err, "sharing failure of concurrent handshake");
                return Err(ClientError::AuthUnavailable(err.clone()));
            }
        }

        info!("acquiring credential pair");
        let outcome = self.handshake.acquire().await;

        let mut slot = self.slot.write().await;
        slot.attempts += 1;
        match outcome {
            Ok(pair) => {
                slot.generation += 1;
                slot.pair = pair.clone();
                slot.last_failure = None;
                crate::metrics::record_handshake("success");
                info!(generation = slot.generation, "credential pair acquired");
                Ok(Lease {
                    pair,
                    generation: slot.generation,
                })
            }
            Err(err) => {
                slot.last_failure = Some(err.clone());
                crate::metrics::record_handshake("failure");
                warn!(error = %err, "handshake failed");
                Err(ClientError::AuthUnavailable(err))
            }
        }
    }

    /// Mark the pair stale only if it is still the one the caller used.
    async fn mark_stale(&self, generation: u64) {
        let mut slot = self.slot.write().await;
        if slot.generation == generation {
            slot.pair.mark_stale();
            debug!(
                generation,
                state = slot.pair.state().label(),
                "credential pair marked after rejection"
            );
        } else {
            debug!(
                used = generation,
                current = slot.generation,
                "pair already replaced, not marking stale"
            );
        }
    }

    fn attach(
        &self,
        endpoint: &EndpointDescriptor,
        request: &mut ApiRequest,
        pair: &CredentialPair,
    ) -> Result<()> {
        let cookie = format!("{}={}", self.settings.cookie_name, pair.cookie());
        let attached = request
            .set_header("cookie", &cookie)
            .and_then(|()| request.set_header(&self.settings.token_header, pair.token()));
        attached.map_err(|e| ClientError::RemoteFailure {
            endpoint: endpoint.name.clone(),
            status: None,
            details: e.to_string(),
        })
    }

    async fn send(&self, endpoint: &EndpointDescriptor, request: ApiRequest) -> Result<ApiResponse> {
        self.transport
            .request(request)
            .await
            .map_err(|e| ClientError::RemoteFailure {
                endpoint: endpoint.name.clone(),
                status: None,
                details: e.to_string(),
            })
    }
}

fn remote_failure(endpoint: &EndpointDescriptor, response: &ApiResponse) -> ClientError {
    let excerpt: String = response.body.trim().chars().take(DETAILS_MAX_CHARS).collect();
    let details = if excerpt.is_empty() {
        format!("status {}", response.status)
    } else {
        format!("status {}: {excerpt}", response.status)
    };
    ClientError::RemoteFailure {
        endpoint: endpoint.name.clone(),
        status: Some(response.status),
        details,
    }
}
