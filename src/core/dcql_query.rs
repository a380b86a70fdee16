use std::collections::HashSet;

use crate::{core::credential_format::ClaimFormatDesignation, utils::NonEmptyVec};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

const META_TYPE_VALUES: &str = "type_values";
const META_VCT_VALUES: &str = "vct_values";
const META_DOCTYPE_VALUE: &str = "doctype_value";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlQuery {
    credentials: NonEmptyVec<DcqlCredentialQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_sets: Option<NonEmptyVec<DcqlCredentialSetQuery>>,
}

impl DcqlQuery {
    pub fn new(credentials: NonEmptyVec<DcqlCredentialQuery>) -> Self {
        Self {
            credentials,
            credential_sets: None,
        }
    }

    pub fn credential_sets(&self) -> Option<&NonEmptyVec<DcqlCredentialSetQuery>> {
        self.credential_sets.as_ref()
    }

    pub fn set_credential_sets(
        &mut self,
        credential_sets: Option<NonEmptyVec<DcqlCredentialSetQuery>>,
    ) {
        self.credential_sets = credential_sets;
    }

    pub fn credentials(&self) -> &[DcqlCredentialQuery] {
        &self.credentials
    }

    pub fn set_credentials(&mut self, credentials: NonEmptyVec<DcqlCredentialQuery>) {
        self.credentials = credentials;
    }

    /// Checks the cross references serde cannot: credential query ids are
    /// unique, and every claim id named in a `claim_sets` option is declared
    /// in the query's `claims`.
    pub fn validate(&self) -> Result<(), DcqlQueryError> {
        let mut ids = HashSet::new();
        for credential in self.credentials() {
            if !ids.insert(credential.id()) {
                return Err(DcqlQueryError::DuplicateCredentialQuery(
                    credential.id.clone(),
                ));
            }
            credential.validate()?;
        }
        Ok(())
    }
}

impl TryFrom<Json> for DcqlQuery {
    type Error = serde_json::Error;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
    }
}

/// A Credential Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.1>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialQuery {
    /// REQUIRED. A string identifying the Credential in the response.
    /// The value MUST be unique within a DCQL query.
    id: String,

    /// REQUIRED. A string that specifies the requested format for the Credential.
    format: ClaimFormatDesignation,

    /// Format-specific constraints on the Credential metadata, e.g. `vct_values`
    /// for SD-JWT VC, `doctype_value` for mso_mdoc and `type_values` for W3C
    /// formats. An empty object places no constraint.
    #[serde(default)]
    meta: serde_json::Map<String, Json>,

    /// OPTIONAL. An array of objects that specifies claims in the Credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<NonEmptyVec<DcqlCredentialClaimsQuery>>,

    /// OPTIONAL. Alternative combinations of claim ids, any one of which
    /// satisfies the query. MUST NOT be present if `claims` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    claim_sets: Option<NonEmptyVec<Vec<String>>>,

    /// OPTIONAL. Trust frameworks the Credential issuer must belong to.
    #[serde(skip_serializing_if = "Option::is_none")]
    trusted_authorities: Option<NonEmptyVec<TrustedAuthoritiesQuery>>,

    /// OPTIONAL. Defaults to `true` if not present.
    #[serde(skip_serializing_if = "Option::is_none")]
    require_cryptographic_holder_binding: Option<bool>,

    /// OPTIONAL. Whether more than one Credential may match this query.
    /// Defaults to `false` if not present.
    #[serde(skip_serializing_if = "Option::is_none")]
    multiple: Option<bool>,
}

impl DcqlCredentialQuery {
    pub fn new(id: String, format: ClaimFormatDesignation) -> Self {
        Self {
            id,
            format,
            meta: serde_json::Map::new(),
            claims: None,
            claim_sets: None,
            trusted_authorities: None,
            require_cryptographic_holder_binding: None,
            multiple: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> &ClaimFormatDesignation {
        &self.format
    }

    pub fn meta(&self) -> &serde_json::Map<String, Json> {
        &self.meta
    }

    pub fn set_meta(&mut self, meta: serde_json::Map<String, Json>) {
        self.meta = meta;
    }

    /// `meta.type_values`: alternatives, each a set of W3C types that must all
    /// be present.
    pub fn type_values(&self) -> Option<Vec<Vec<&str>>> {
        self.meta.get(META_TYPE_VALUES)?.as_array().map(|options| {
            options
                .iter()
                .map(|option| {
                    option
                        .as_array()
                        .map(|types| types.iter().filter_map(Json::as_str).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
    }

    /// `meta.vct_values`: accepted SD-JWT VC types.
    pub fn vct_values(&self) -> Option<Vec<&str>> {
        self.meta
            .get(META_VCT_VALUES)?
            .as_array()
            .map(|values| values.iter().filter_map(Json::as_str).collect())
    }

    /// `meta.doctype_value`: the required mdoc document type.
    pub fn doctype_value(&self) -> Option<&str> {
        self.meta.get(META_DOCTYPE_VALUE)?.as_str()
    }

    pub fn claims(&self) -> Option<&NonEmptyVec<DcqlCredentialClaimsQuery>> {
        self.claims.as_ref()
    }

    pub fn set_claims(&mut self, claims: Option<NonEmptyVec<DcqlCredentialClaimsQuery>>) {
        self.claims = claims;
    }

    pub fn claim_sets(&self) -> Option<&NonEmptyVec<Vec<String>>> {
        self.claim_sets.as_ref()
    }

    pub fn set_claim_sets(&mut self, claim_sets: Option<NonEmptyVec<Vec<String>>>) {
        self.claim_sets = claim_sets;
    }

    pub fn trusted_authorities(&self) -> Option<&NonEmptyVec<TrustedAuthoritiesQuery>> {
        self.trusted_authorities.as_ref()
    }

    pub fn set_trusted_authorities(
        &mut self,
        trusted_authorities: Option<NonEmptyVec<TrustedAuthoritiesQuery>>,
    ) {
        self.trusted_authorities = trusted_authorities;
    }

    /// Returns `true` if cryptographic holder binding is required.
    pub fn require_cryptographic_holder_binding(&self) -> bool {
        self.require_cryptographic_holder_binding.unwrap_or(true)
    }

    pub fn set_require_cryptographic_holder_binding(&mut self, required: Option<bool>) {
        self.require_cryptographic_holder_binding = required;
    }

    /// Returns `true` if multiple Credentials may be returned for this query.
    pub fn multiple(&self) -> bool {
        self.multiple.unwrap_or(false)
    }

    pub fn multiple_raw(&self) -> Option<bool> {
        self.multiple
    }

    pub fn set_multiple(&mut self, multiple: Option<bool>) {
        self.multiple = multiple;
    }

    /// Looks up a claims query by its id.
    pub fn claim(&self, id: &str) -> Option<&DcqlCredentialClaimsQuery> {
        self.claims()?
            .iter()
            .find(|claim| claim.id().map(String::as_str) == Some(id))
    }

    fn validate(&self) -> Result<(), DcqlQueryError> {
        let Some(claim_sets) = self.claim_sets() else {
            return Ok(());
        };

        if self.claims.is_none() {
            return Err(DcqlQueryError::ClaimSetsWithoutClaims(self.id.clone()));
        }

        for claim_id in claim_sets.iter().flatten() {
            if self.claim(claim_id).is_none() {
                return Err(DcqlQueryError::UndeclaredClaim {
                    query: self.id.clone(),
                    claim: claim_id.clone(),
                });
            }
        }

        Ok(())
    }
}

/// A Trusted Authorities Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.1.1>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TrustedAuthoritiesQuery {
    #[serde(rename = "type")]
    authority_type: TrustedAuthorityType,

    /// Trust framework specific identification data.
    values: NonEmptyVec<String>,
}

impl TrustedAuthoritiesQuery {
    pub fn new(authority_type: TrustedAuthorityType, values: NonEmptyVec<String>) -> Self {
        Self {
            authority_type,
            values,
        }
    }

    pub fn authority_type(&self) -> &TrustedAuthorityType {
        &self.authority_type
    }

    pub fn values(&self) -> &NonEmptyVec<String> {
        &self.values
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrustedAuthorityType {
    /// Authority Key Identifier, base64url encoded.
    Aki,
    /// ETSI Trusted List identifier.
    EtsiTl,
    /// OpenID Federation Trust Anchor entity identifier.
    OpenidFederation,
    #[serde(untagged)]
    Other(String),
}

/// A Credential Set Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.2>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialSetQuery {
    /// Each option lists Credential Query ids that jointly satisfy the set.
    options: NonEmptyVec<Vec<String>>,
    /// OPTIONAL. Defaults to `true` if not present.
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<bool>,
}

impl DcqlCredentialSetQuery {
    pub fn new(options: NonEmptyVec<Vec<String>>) -> Self {
        Self {
            options,
            required: None,
        }
    }

    pub fn options(&self) -> &NonEmptyVec<Vec<String>> {
        &self.options
    }

    /// Returns `true` if this credential set is required.
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }

    pub fn required_raw(&self) -> Option<bool> {
        self.required
    }

    pub fn set_required(&mut self, required: Option<bool>) {
        self.required = required;
    }
}

/// A Claims Query object
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.3>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialClaimsQuery {
    /// REQUIRED if `claim_sets` is present in the Credential Query.
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    /// A claims path pointer into the Credential.
    path: NonEmptyVec<DcqlCredentialClaimsQueryPath>,
    /// OPTIONAL. Accepted values of the claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<NonEmptyVec<DcqlCredentialClaimsQueryValue>>,
    /// OPTIONAL (mso_mdoc only).
    #[serde(skip_serializing_if = "Option::is_none")]
    intent_to_retain: Option<bool>,
}

impl DcqlCredentialClaimsQuery {
    pub fn new(path: NonEmptyVec<DcqlCredentialClaimsQueryPath>) -> Self {
        Self {
            id: None,
            path,
            values: None,
            intent_to_retain: None,
        }
    }

    pub fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
    }

    pub fn path(&self) -> &[DcqlCredentialClaimsQueryPath] {
        &self.path
    }

    pub fn values(&self) -> Option<&NonEmptyVec<DcqlCredentialClaimsQueryValue>> {
        self.values.as_ref()
    }

    pub fn set_values(&mut self, values: Option<NonEmptyVec<DcqlCredentialClaimsQueryValue>>) {
        self.values = values;
    }

    pub fn intent_to_retain(&self) -> Option<bool> {
        self.intent_to_retain
    }

    /// Returns `true` if no values are constrained, or if `value` equals one
    /// of them.
    pub fn accepts(&self, value: &Json) -> bool {
        match self.values() {
            None => true,
            Some(values) => values.iter().any(|expected| &Json::from(expected) == value),
        }
    }

    /// The path joined with `.`, the key used when reporting selected claims.
    pub fn path_key(&self) -> String {
        self.path
            .iter()
            .map(|segment| match segment {
                DcqlCredentialClaimsQueryPath::String(s) => s.clone(),
                DcqlCredentialClaimsQueryPath::Integer(i) => i.to_string(),
                DcqlCredentialClaimsQueryPath::Null => "null".to_owned(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DcqlCredentialClaimsQueryValue {
    String(String),
    Integer(isize),
    Boolean(bool),
}

impl From<&DcqlCredentialClaimsQueryValue> for Json {
    fn from(value: &DcqlCredentialClaimsQueryValue) -> Self {
        match value {
            DcqlCredentialClaimsQueryValue::String(s) => Json::String(s.clone()),
            DcqlCredentialClaimsQueryValue::Integer(i) => Json::from(*i as i64),
            DcqlCredentialClaimsQueryValue::Boolean(b) => Json::Bool(*b),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DcqlCredentialClaimsQueryPath {
    String(String),
    Null,
    Integer(usize),
}

/// A query that is well formed JSON but internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DcqlQueryError {
    #[error("credential query `{0}` is declared more than once")]
    DuplicateCredentialQuery(String),

    #[error("credential query `{0}` has claim_sets but no claims")]
    ClaimSetsWithoutClaims(String),

    #[error("claim set of credential query `{query}` references undeclared claim `{claim}`")]
    UndeclaredClaim { query: String, claim: String },
}
