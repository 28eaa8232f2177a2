//! Endpoint descriptors
//!
//! Static description of each remote operation: where it lives, whether it
//! needs the credential pair, and how its responses are classified. The table
//! is configuration produced by probing the backend once, not something the
//! client discovers at runtime.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use transport::{ApiRequest, Method};

use crate::classify::{Classification, Classifier};

/// Whether an endpoint needs the credential pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequirement {
    None,
    RequiresPair,
}

/// Where caller parameters go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamPlacement {
    #[default]
    Query,
    Form,
}

/// One remote operation.
#[derive(Debug, Clone)]
pub struct EndpointDescriptor {
    pub name: String,
    pub auth: AuthRequirement,
    pub method: Method,
    pub path: String,
    /// Query parameters sent on every call (e.g. `act=getStopArrivals`)
    pub fixed_query: BTreeMap<String, String>,
    pub params: ParamPlacement,
    pub classifier: Classifier,
}

impl EndpointDescriptor {
    pub fn new(
        name: impl Into<String>,
        auth: AuthRequirement,
        path: impl Into<String>,
        classifier: impl Into<Classifier>,
    ) -> Self {
        Self {
            name: name.into(),
            auth,
            method: Method::Get,
            path: path.into(),
            fixed_query: BTreeMap::new(),
            params: ParamPlacement::Query,
            classifier: classifier.into(),
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_fixed_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed_query.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, placement: ParamPlacement) -> Self {
        self.params = placement;
        self
    }

    pub fn requires_pair(&self) -> bool {
        self.auth == AuthRequirement::RequiresPair
    }

    pub fn classify(&self, status: u16, body: &str) -> Classification {
        self.classifier.classify(status, body)
    }

    /// Request for this endpoint without credentials attached.
    pub fn build_request(&self, params: &[(&str, &str)]) -> ApiRequest {
        let mut request = ApiRequest::new(self.method, self.path.clone());
        for (key, value) in &self.fixed_query {
            request = request.with_query(key.clone(), value.clone());
        }
        for (key, value) in params {
            request = match self.params {
                ParamPlacement::Query => request.with_query(*key, *value),
                ParamPlacement::Form => request.with_form(*key, *value),
            };
        }
        request
    }
}

/// Endpoint descriptors indexed by name.
#[derive(Debug, Clone, Default)]
pub struct EndpointCatalog {
    endpoints: HashMap<String, EndpointDescriptor>,
}

impl EndpointCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a descriptor; returns the one it replaced.
    pub fn insert(&mut self, endpoint: EndpointDescriptor) -> Option<EndpointDescriptor> {
        self.endpoints.insert(endpoint.name.clone(), endpoint)
    }

    pub fn get(&self, name: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.get(name)
    }

    /// Endpoint names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.endpoints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl FromIterator<EndpointDescriptor> for EndpointCatalog {
    fn from_iter<I: IntoIterator<Item = EndpointDescriptor>>(iter: I) -> Self {
        let mut catalog = EndpointCatalog::new();
        for endpoint in iter {
            catalog.insert(endpoint);
        }
        catalog
    }
}
