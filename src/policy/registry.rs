use std::{collections::BTreeMap, sync::Arc};

use serde_json::Value as Json;

use super::{builtin, PolicyRequest, VerificationPolicy};
use crate::{config::PolicyRequestConfig, core::jose::KeyResolver};

/// The policies available to a verifier, by unique name.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, VerificationPolicy>,
}

impl PolicyRegistry {
    /// Builds a registry, rejecting policies that share a name.
    pub fn new(
        policies: impl IntoIterator<Item = VerificationPolicy>,
    ) -> Result<Self, PolicyRegistryError> {
        let mut registry = Self::default();
        for policy in policies {
            registry.register(policy)?;
        }
        Ok(registry)
    }

    /// A registry holding every built-in policy, see [`builtin`].
    pub fn with_builtin_policies(key_resolver: Arc<dyn KeyResolver + Send + Sync>) -> Self {
        let policies = builtin::policies(key_resolver)
            .into_iter()
            .map(|policy| (policy.name().to_owned(), policy))
            .collect();
        Self { policies }
    }

    pub fn register(&mut self, policy: VerificationPolicy) -> Result<(), PolicyRegistryError> {
        let name = policy.name().to_owned();
        if self.policies.contains_key(&name) {
            return Err(PolicyRegistryError::DuplicatePolicy(name));
        }
        self.policies.insert(name, policy);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&VerificationPolicy> {
        self.policies.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Creates a request for the named policy.
    pub fn request(
        &self,
        name: &str,
        args: Option<Json>,
    ) -> Result<PolicyRequest, PolicyRegistryError> {
        let policy = self
            .get(name)
            .ok_or_else(|| PolicyRegistryError::UnknownPolicy(name.to_owned()))?;
        Ok(PolicyRequest::new(policy.clone(), args))
    }

    /// Parses a request given as `"name"` or `{"policy": "name", "args": ...}`.
    pub fn parse_request(&self, value: &Json) -> Result<PolicyRequest, PolicyRegistryError> {
        let request: PolicyRequestConfig = serde_json::from_value(value.clone()).map_err(|_| {
            PolicyRegistryError::MalformedRequest(format!(
                "expected a policy name or a `policy` object, found {value}"
            ))
        })?;
        request.resolve(self)
    }

    /// Parses an array of requests.
    pub fn parse_requests(&self, value: &Json) -> Result<Vec<PolicyRequest>, PolicyRegistryError> {
        let Json::Array(requests) = value else {
            return Err(PolicyRegistryError::MalformedRequest(format!(
                "expected an array of policy requests, found {value}"
            )));
        };
        requests.iter().map(|request| self.parse_request(request)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyRegistryError {
    #[error("a policy named `{0}` is already registered")]
    DuplicatePolicy(String),

    #[error("no policy named `{0}` is registered")]
    UnknownPolicy(String),

    #[error("malformed policy request: {0}")]
    MalformedRequest(String),
}
