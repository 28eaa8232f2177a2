//! Response classification
//!
//! Decides from status and body alone whether a call failed *because of* its
//! credentials. The same signal can mean different things on different
//! endpoints: an empty array is "no buses due" on one and "you are not
//! authorized" on another. That distinction is configured per endpoint
//! (`ClassifyRule::empty_body`) and never inferred.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

/// Outcome of classifying one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Rejected because the credential pair is missing, mismatched, or expired
    AuthFailure,
    /// Any other failure (malformed response, server error, bad parameters)
    OtherFailure,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::Success => "success",
            Classification::AuthFailure => "auth_failure",
            Classification::OtherFailure => "other_failure",
        }
    }
}

/// Expected shape of a successful body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyShape {
    /// Anything, including non-JSON text
    #[default]
    Any,
    Json,
    JsonArray,
    JsonObject,
}

/// Meaning of a syntactically valid but empty body (`""`, `null`, `false`,
/// `[]`, `{}`) on a success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyBody {
    /// Legitimately no data
    Success,
    /// Only returned to unauthenticated callers
    AuthFailure,
}

/// Declarative classification rule for one endpoint.
///
/// Evaluation order:
/// 1. status in `auth_statuses` → AuthFailure
/// 2. status not a success status → AuthFailure if an auth pattern matches
///    the body, otherwise OtherFailure
/// 3. empty body → per `empty_body`
/// 4. body well-formed for `shape` → Success
/// 5. otherwise AuthFailure if an auth pattern matches, else OtherFailure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClassifyRule {
    /// Statuses that count as success; `None` means any 2xx
    #[serde(default)]
    pub success_statuses: Option<Vec<u16>>,
    #[serde(default = "default_auth_statuses")]
    pub auth_statuses: Vec<u16>,
    /// Case-insensitive substrings that mark a body as an auth rejection
    #[serde(default = "default_auth_patterns")]
    pub auth_patterns: Vec<String>,
    #[serde(default)]
    pub shape: BodyShape,
    pub empty_body: EmptyBody,
}

fn default_auth_statuses() -> Vec<u16> {
    vec![401, 403]
}

fn default_auth_patterns() -> Vec<String> {
    vec!["unauthorized".into(), "not authorized".into()]
}

impl ClassifyRule {
    /// Rule with default statuses and patterns; the empty-body meaning is
    /// always chosen explicitly.
    pub fn new(empty_body: EmptyBody) -> Self {
        Self {
            success_statuses: None,
            auth_statuses: default_auth_statuses(),
            auth_patterns: default_auth_patterns(),
            shape: BodyShape::Any,
            empty_body,
        }
    }

    pub fn with_shape(mut self, shape: BodyShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_success_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.success_statuses = Some(statuses);
        self
    }

    pub fn with_auth_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.auth_statuses = statuses;
        self
    }

    pub fn with_auth_patterns(mut self, patterns: Vec<String>) -> Self {
        self.auth_patterns = patterns;
        self
    }

    pub fn classify(&self, status: u16, body: &str) -> Classification {
        if self.auth_statuses.contains(&status) {
            return Classification::AuthFailure;
        }
        if !self.is_success_status(status) {
            return self.auth_or_other(body);
        }
        if is_empty_body(body) {
            return match self.empty_body {
                EmptyBody::Success => Classification::Success,
                EmptyBody::AuthFailure => Classification::AuthFailure,
            };
        }
        if matches_shape(self.shape, body) {
            return Classification::Success;
        }
        self.auth_or_other(body)
    }

    fn is_success_status(&self, status: u16) -> bool {
        match &self.success_statuses {
            Some(statuses) => statuses.contains(&status),
            None => (200..300).contains(&status),
        }
    }

    fn auth_or_other(&self, body: &str) -> Classification {
        let lower = body.to_lowercase();
        let matched = self
            .auth_patterns
            .iter()
            .any(|pattern| !pattern.is_empty() && lower.contains(&pattern.to_lowercase()));
        if matched {
            Classification::AuthFailure
        } else {
            Classification::OtherFailure
        }
    }
}

/// `""`, whitespace, or JSON `null` / `false` / `[]` / `{}`.
pub fn is_empty_body(body: &str) -> bool {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return true;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Null) | Ok(serde_json::Value::Bool(false)) => true,
        Ok(serde_json::Value::Array(items)) => items.is_empty(),
        Ok(serde_json::Value::Object(fields)) => fields.is_empty(),
        _ => false,
    }
}

fn matches_shape(shape: BodyShape, body: &str) -> bool {
    if shape == BodyShape::Any {
        return true;
    }
    match serde_json::from_str::<serde_json::Value>(body.trim()) {
        Ok(value) => match shape {
            BodyShape::Any | BodyShape::Json => true,
            BodyShape::JsonArray => value.is_array(),
            BodyShape::JsonObject => value.is_object(),
        },
        Err(_) => false,
    }
}

/// Classification function signature for hand-written classifiers.
pub type ClassifyFn = dyn Fn(u16, &str) -> Classification + Send + Sync;

/// Per-endpoint classifier: a declarative rule or a custom function.
#[derive(Clone)]
pub enum Classifier {
    Rule(ClassifyRule),
    Custom(Arc<ClassifyFn>),
}

impl Classifier {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(u16, &str) -> Classification + Send + Sync + 'static,
    {
        Classifier::Custom(Arc::new(f))
    }

    pub fn classify(&self, status: u16, body: &str) -> Classification {
        match self {
            Classifier::Rule(rule) => rule.classify(status, body),
            Classifier::Custom(f) => f(status, body),
        }
    }
}

impl From<ClassifyRule> for Classifier {
    fn from(rule: ClassifyRule) -> Self {
        Classifier::Rule(rule)
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classifier::Rule(rule) => f.debug_tuple("Rule").field(rule).finish(),
            Classifier::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}
