//! Verification policies and the requests that parameterize them.
//!
//! A policy declares which view of a credential it inspects by implementing
//! one of three traits:
//!
//! - [`JwtVerificationPolicy`] receives the compact JWS, for checks on the
//!   secured form such as signature verification.
//! - [`CredentialDataValidatorPolicy`] receives the credential data: the
//!   W3C `vc` object or the reconstructed SD-JWT claims.
//! - [`CredentialWrapperValidatorPolicy`] receives the full decoded payload,
//!   including JWT registered claims such as `exp` and `nbf`.
//!
//! Policies are looked up by name in a [`PolicyRegistry`] and run by
//! [`crate::verifier::verify_presentation`].

use std::{fmt::Debug, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{ser::SerializeMap, Serialize, Serializer};
use serde_json::{Map, Value as Json};

pub mod builtin;
pub mod registry;

pub use registry::{PolicyRegistry, PolicyRegistryError};

/// Values supplied by the caller of a verification, e.g. the expected nonce.
pub type PolicyContext = Map<String, Json>;

#[async_trait]
pub trait JwtVerificationPolicy: Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn verify(&self, jwt: &str, args: Option<&Json>, context: &PolicyContext)
        -> Result<Json>;
}

#[async_trait]
pub trait CredentialDataValidatorPolicy: Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn verify(
        &self,
        data: &Map<String, Json>,
        args: Option<&Json>,
        context: &PolicyContext,
    ) -> Result<Json>;
}

#[async_trait]
pub trait CredentialWrapperValidatorPolicy: Debug {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn verify(
        &self,
        payload: &Map<String, Json>,
        args: Option<&Json>,
        context: &PolicyContext,
    ) -> Result<Json>;
}

/// A registered policy, tagged with the input it expects.
#[derive(Debug, Clone)]
pub enum VerificationPolicy {
    Jwt(Arc<dyn JwtVerificationPolicy + Send + Sync>),
    CredentialData(Arc<dyn CredentialDataValidatorPolicy + Send + Sync>),
    CredentialWrapper(Arc<dyn CredentialWrapperValidatorPolicy + Send + Sync>),
}

impl VerificationPolicy {
    pub fn name(&self) -> &str {
        match self {
            Self::Jwt(policy) => policy.name(),
            Self::CredentialData(policy) => policy.name(),
            Self::CredentialWrapper(policy) => policy.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Jwt(policy) => policy.description(),
            Self::CredentialData(policy) => policy.description(),
            Self::CredentialWrapper(policy) => policy.description(),
        }
    }
}

/// A policy together with the arguments it will be run with.
///
/// Serializes as the bare policy name when there are no arguments, and as
/// `{"policy": name, "args": args}` otherwise. Deserialization needs the
/// registry, see [`PolicyRegistry::parse_request`].
#[derive(Debug, Clone)]
pub struct PolicyRequest {
    policy: VerificationPolicy,
    args: Option<Json>,
}

impl PolicyRequest {
    pub fn new(policy: VerificationPolicy, args: Option<Json>) -> Self {
        Self { policy, args }
    }

    pub fn policy(&self) -> &VerificationPolicy {
        &self.policy
    }

    pub fn name(&self) -> &str {
        self.policy.name()
    }

    pub fn args(&self) -> Option<&Json> {
        self.args.as_ref()
    }
}

impl Serialize for PolicyRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.args {
            None => serializer.serialize_str(self.name()),
            Some(args) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("policy", self.name())?;
                map.serialize_entry("args", args)?;
                map.end()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum PolicyOutcome {
    Success(Json),
    Failure(Arc<anyhow::Error>),
}

impl PolicyOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<Result<Json>> for PolicyOutcome {
    fn from(result: Result<Json>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Failure(Arc::new(e)),
        }
    }
}

/// The outcome of running one policy request against one entry.
#[derive(Debug, Clone)]
pub struct PolicyResult {
    request: PolicyRequest,
    outcome: PolicyOutcome,
}

impl PolicyResult {
    pub fn new(request: PolicyRequest, outcome: PolicyOutcome) -> Self {
        Self { request, outcome }
    }

    pub fn request(&self) -> &PolicyRequest {
        &self.request
    }

    pub fn outcome(&self) -> &PolicyOutcome {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

impl Serialize for PolicyResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("policy", self.request.name())?;
        map.serialize_entry("description", self.request.policy.description())?;
        if let Some(args) = &self.request.args {
            map.serialize_entry("args", args)?;
        }
        map.serialize_entry("is_success", &self.is_success())?;
        match &self.outcome {
            PolicyOutcome::Success(result) => map.serialize_entry("result", result)?,
            PolicyOutcome::Failure(error) => map.serialize_entry("error", &format!("{error:#}"))?,
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::anyhow;
    use serde_json::json;

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl CredentialDataValidatorPolicy for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn description(&self) -> &str {
            "Accepts everything."
        }

        async fn verify(
            &self,
            _data: &Map<String, Json>,
            _args: Option<&Json>,
            _context: &PolicyContext,
        ) -> Result<Json> {
            Ok(Json::Null)
        }
    }

    fn noop() -> VerificationPolicy {
        VerificationPolicy::CredentialData(Arc::new(Noop))
    }

    #[test]
    fn request_serialization() {
        let bare = PolicyRequest::new(noop(), None);
        assert_eq!(serde_json::to_value(&bare).unwrap(), json!("noop"));

        let with_args = PolicyRequest::new(noop(), Some(json!({ "min": 1 })));
        assert_eq!(
            serde_json::to_value(&with_args).unwrap(),
            json!({ "policy": "noop", "args": { "min": 1 } })
        );
    }

    #[test]
    fn result_serialization() {
        let success = PolicyResult::new(
            PolicyRequest::new(noop(), None),
            PolicyOutcome::Success(json!({ "checked": true })),
        );
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({
                "policy": "noop",
                "description": "Accepts everything.",
                "is_success": true,
                "result": { "checked": true }
            })
        );

        let failure = PolicyResult::new(
            PolicyRequest::new(noop(), Some(json!(3))),
            PolicyOutcome::from(Err::<Json, _>(anyhow!("inner").context("outer"))),
        );
        assert!(!failure.is_success());
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({
                "policy": "noop",
                "description": "Accepts everything.",
                "args": 3,
                "is_success": false,
                "error": "outer: inner"
            })
        );
    }
}
