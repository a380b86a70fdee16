use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::policy::{PolicyRegistry, PolicyRegistryError, PolicyRequest};

/// The policies a verifier runs, by name, as loaded from JSON.
///
/// ```json
/// {
///   "vp_policies": ["signature", { "policy": "minimum-credentials", "args": 1 }],
///   "vc_policies": ["signature", "expired", "not-before"],
///   "specific_policies": {
///     "OpenBadgeCredential": [{ "policy": "allowed-issuer", "args": ["did:key:z6Mk..."] }]
///   }
/// }
/// ```
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct VerifierConfig {
    /// Run against the presentation itself.
    #[serde(default)]
    pub vp_policies: Vec<PolicyRequestConfig>,
    /// Run against every embedded credential.
    #[serde(default)]
    pub vc_policies: Vec<PolicyRequestConfig>,
    /// Run against embedded credentials of the given type, in addition to
    /// `vc_policies`.
    #[serde(default)]
    pub specific_policies: BTreeMap<String, Vec<PolicyRequestConfig>>,
}

/// A policy request before it is looked up in the registry: either the bare
/// policy name or `{"policy": name, "args": ...}`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum PolicyRequestConfig {
    Name(String),
    WithArgs {
        policy: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Json>,
    },
}

impl PolicyRequestConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::WithArgs { policy, .. } => policy,
        }
    }

    pub fn resolve(&self, registry: &PolicyRegistry) -> Result<PolicyRequest, PolicyRegistryError> {
        match self {
            Self::Name(name) => registry.request(name, None),
            Self::WithArgs { policy, args } => registry.request(policy, args.clone()),
        }
    }
}

/// [`VerifierConfig`] with every policy found in the registry.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPolicies {
    pub vp_policies: Vec<PolicyRequest>,
    pub vc_policies: Vec<PolicyRequest>,
    pub specific_policies: BTreeMap<String, Vec<PolicyRequest>>,
}

impl VerifierConfig {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).context("invalid verifier configuration")
    }

    pub fn resolve(&self, registry: &PolicyRegistry) -> Result<ResolvedPolicies, PolicyRegistryError> {
        let mut specific_policies = BTreeMap::new();
        for (credential_type, requests) in &self.specific_policies {
            specific_policies.insert(credential_type.clone(), resolve_all(registry, requests)?);
        }

        Ok(ResolvedPolicies {
            vp_policies: resolve_all(registry, &self.vp_policies)?,
            vc_policies: resolve_all(registry, &self.vc_policies)?,
            specific_policies,
        })
    }
}

fn resolve_all(
    registry: &PolicyRegistry,
    requests: &[PolicyRequestConfig],
) -> Result<Vec<PolicyRequest>, PolicyRegistryError> {
    requests
        .iter()
        .map(|request| request.resolve(registry))
        .collect()
}
