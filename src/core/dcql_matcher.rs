//! Selects held credentials that answer a [`DcqlQuery`].

use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use super::{
    claim_path::{path_to_strings, resolve_in},
    credential::DigitalCredential,
    credential_format::ClaimFormatDesignation,
    dcql_query::{
        DcqlCredentialClaimsQuery, DcqlCredentialQuery, DcqlQuery, DcqlQueryError,
        TrustedAuthorityType,
    },
    disclosure::{disclosures_for_path, Disclosable, Disclosure, DisclosureError, SelectivelyDisclosable},
};

/// A credential the matcher can evaluate.
pub trait DcqlCredential {
    /// Identifies the credential among those offered to the matcher.
    fn id(&self) -> &str;

    fn format(&self) -> ClaimFormatDesignation;

    /// The claim tree that claim paths resolve against.
    fn data(&self) -> &Map<String, Json>;

    fn disclosables(&self) -> Option<&[Disclosable]> {
        None
    }

    fn disclosures(&self) -> Option<&[Disclosure]> {
        None
    }

    fn issuer(&self) -> Option<&str> {
        None
    }

    /// Authority key identifier of the issuing certificate, base64url.
    fn authority_key_identifier(&self) -> Option<&str> {
        None
    }
}

/// A parsed credential held under a caller-chosen id.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldCredential {
    id: String,
    credential: DigitalCredential,
    authority_key_identifier: Option<String>,
}

impl HeldCredential {
    pub fn new(id: impl Into<String>, credential: DigitalCredential) -> Self {
        Self {
            id: id.into(),
            credential,
            authority_key_identifier: None,
        }
    }

    pub fn with_authority_key_identifier(mut self, aki: impl Into<String>) -> Self {
        self.authority_key_identifier = Some(aki.into());
        self
    }

    pub fn credential(&self) -> &DigitalCredential {
        &self.credential
    }

    pub fn into_credential(self) -> DigitalCredential {
        self.credential
    }
}

impl DcqlCredential for HeldCredential {
    fn id(&self) -> &str {
        &self.id
    }

    fn format(&self) -> ClaimFormatDesignation {
        self.credential.format()
    }

    fn data(&self) -> &Map<String, Json> {
        self.credential.credential_data()
    }

    fn disclosables(&self) -> Option<&[Disclosable]> {
        SelectivelyDisclosable::disclosables(&self.credential)
    }

    fn disclosures(&self) -> Option<&[Disclosure]> {
        self.credential.disclosures()
    }

    fn issuer(&self) -> Option<&str> {
        self.credential.issuer()
    }

    fn authority_key_identifier(&self) -> Option<&str> {
        self.authority_key_identifier.as_deref()
    }
}

/// A credential selected for a credential query.
#[derive(Debug)]
pub struct DcqlMatch<'a, C> {
    credential: &'a C,
    selected_disclosures: Option<Vec<&'a Disclosure>>,
}

impl<'a, C> DcqlMatch<'a, C> {
    pub fn credential(&self) -> &'a C {
        self.credential
    }

    /// The disclosures that reveal the requested claims, or `None` if the
    /// credential is not selectively disclosable.
    pub fn selected_disclosures(&self) -> Option<&[&'a Disclosure]> {
        self.selected_disclosures.as_deref()
    }
}

impl DcqlMatch<'_, HeldCredential> {
    /// The credential as it should be presented: redacted to the selected
    /// disclosures, or in its signed form.
    pub fn present(&self) -> Result<String, DisclosureError> {
        let credential = self.credential.credential();
        match &self.selected_disclosures {
            Some(selected) => credential.disclose(selected.iter().copied()),
            None => credential
                .signed()
                .map(ToOwned::to_owned)
                .ok_or(DisclosureError::NotSigned),
        }
    }
}

pub type DcqlMatches<'a, C> = BTreeMap<String, Vec<DcqlMatch<'a, C>>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct DcqlMatcher;

impl DcqlMatcher {
    /// Matches `credentials` against every credential query, then checks the
    /// query's credential sets.
    ///
    /// Queries that no credential satisfies are left out of the result. When
    /// the query has no `credential_sets`, such gaps are only logged and the
    /// partial result is returned.
    pub fn match_query<'a, C: DcqlCredential>(
        query: &DcqlQuery,
        credentials: &'a [C],
    ) -> Result<DcqlMatches<'a, C>, DcqlMatchError> {
        query.validate()?;

        let mut matches = BTreeMap::new();
        for credential_query in query.credentials() {
            let mut found: Vec<_> = credentials
                .iter()
                .filter(|credential| &credential.format() == credential_query.format())
                .filter_map(|credential| match_credential(credential_query, credential))
                .collect();

            if found.is_empty() {
                debug!(query_id = credential_query.id(), "no credential matches");
                continue;
            }

            if !credential_query.multiple() && found.len() > 1 {
                warn!(
                    query_id = credential_query.id(),
                    candidates = found.len(),
                    "several credentials match a single credential query, keeping the first"
                );
                found.truncate(1);
            }

            matches.insert(credential_query.id().to_owned(), found);
        }

        let Some(credential_sets) = query.credential_sets() else {
            let missing: Vec<&str> = query
                .credentials()
                .iter()
                .map(DcqlCredentialQuery::id)
                .filter(|id| !matches.contains_key(*id))
                .collect();
            if !missing.is_empty() {
                warn!(?missing, "credential queries without a match, returning partial results");
            }
            return Ok(matches);
        };

        for (index, credential_set) in credential_sets.iter().enumerate() {
            let satisfied = credential_set
                .options()
                .iter()
                .any(|option| option.iter().all(|id| matches.contains_key(id)));

            if satisfied {
                continue;
            }
            if credential_set.is_required() {
                return Err(DcqlMatchError::CredentialSetUnsatisfied { index });
            }
            debug!(index, "optional credential set not satisfied");
        }

        Ok(matches)
    }
}

fn match_credential<'a, C: DcqlCredential>(
    query: &DcqlCredentialQuery,
    credential: &'a C,
) -> Option<DcqlMatch<'a, C>> {
    if !matches_meta(query, credential) {
        debug!(query_id = query.id(), credential = credential.id(), "meta mismatch");
        return None;
    }
    if !matches_trusted_authorities(query, credential) {
        debug!(
            query_id = query.id(),
            credential = credential.id(),
            "issuer is not a trusted authority"
        );
        return None;
    }
    let Some(claims) = matches_claims(query, credential) else {
        debug!(query_id = query.id(), credential = credential.id(), "claims mismatch");
        return None;
    };

    Some(DcqlMatch {
        credential,
        selected_disclosures: select_disclosures(credential, claims.as_deref()),
    })
}

fn matches_meta<C: DcqlCredential>(query: &DcqlCredentialQuery, credential: &C) -> bool {
    let data = credential.data();

    match query.format() {
        format if format.is_w3c() => {
            let Some(options) = query.type_values() else {
                return true;
            };
            let types = w3c_types(data);
            options
                .iter()
                .any(|option| option.iter().all(|t| types.contains(t)))
        }
        ClaimFormatDesignation::DcSdJwt => {
            let Some(accepted) = query.vct_values() else {
                return true;
            };
            data.get("vct")
                .and_then(Json::as_str)
                .is_some_and(|vct| accepted.contains(&vct))
        }
        ClaimFormatDesignation::MsoMDoc => {
            let Some(doc_type) = query.doctype_value() else {
                return true;
            };
            data.get("docType").and_then(Json::as_str) == Some(doc_type)
        }
        _ => true,
    }
}

fn w3c_types(data: &Map<String, Json>) -> Vec<&str> {
    let types = data
        .get("type")
        .or_else(|| data.get("vc").and_then(|vc| vc.get("type")));

    match types {
        Some(Json::String(t)) => vec![t.as_str()],
        Some(Json::Array(types)) => types.iter().filter_map(Json::as_str).collect(),
        _ => Vec::new(),
    }
}

fn matches_trusted_authorities<C: DcqlCredential>(
    query: &DcqlCredentialQuery,
    credential: &C,
) -> bool {
    let Some(authorities) = query.trusted_authorities() else {
        return true;
    };

    let aki = credential.authority_key_identifier();
    let issuer = credential.issuer();
    if aki.is_none() && issuer.is_none() {
        debug!(
            credential = credential.id(),
            "credential exposes no issuer or authority key identifier, not filtering"
        );
        return true;
    }

    authorities.iter().any(|authority| {
        let candidate = match authority.authority_type() {
            TrustedAuthorityType::Aki => aki,
            _ => issuer,
        };
        candidate.is_some_and(|candidate| authority.values().iter().any(|v| v == candidate))
    })
}

/// Returns the claims queries that were satisfied, `Some(None)` if the query
/// requests no specific claims, and `None` if the credential does not match.
fn matches_claims<'q, C: DcqlCredential>(
    query: &'q DcqlCredentialQuery,
    credential: &C,
) -> Option<Option<Vec<&'q DcqlCredentialClaimsQuery>>> {
    let Some(claims) = query.claims() else {
        return Some(None);
    };
    let (root, _) = claims_root(credential.data());

    let Some(claim_sets) = query.claim_sets() else {
        return claims
            .iter()
            .all(|claim| claim_matches(root, claim))
            .then(|| Some(claims.iter().collect()));
    };

    // Every id was checked by `DcqlQuery::validate`.
    claim_sets.iter().find_map(|option| {
        let selected: Vec<_> = option.iter().filter_map(|id| query.claim(id)).collect();
        selected
            .iter()
            .all(|claim| claim_matches(root, claim))
            .then_some(Some(selected))
    })
}

fn claim_matches(root: &Map<String, Json>, claim: &DcqlCredentialClaimsQuery) -> bool {
    match resolve_in(root, claim.path()) {
        None | Some(Json::Null) => false,
        Some(value) => claim.accepts(value),
    }
}

/// JWT-VC style claim sets nest the credential under `vc`.
fn claims_root(data: &Map<String, Json>) -> (&Map<String, Json>, bool) {
    match data.get("vc") {
        Some(Json::Object(vc)) => (vc, true),
        _ => (data, false),
    }
}

fn select_disclosures<'a, C: DcqlCredential>(
    credential: &'a C,
    claims: Option<&[&DcqlCredentialClaimsQuery]>,
) -> Option<Vec<&'a Disclosure>> {
    let disclosables = credential.disclosables()?;
    let disclosures = credential.disclosures().unwrap_or_default();

    let Some(claims) = claims else {
        return Some(disclosures.iter().collect());
    };

    let (_, vc_rooted) = claims_root(credential.data());
    let mut selected: Vec<&Disclosure> = Vec::new();
    for claim in claims {
        let Some(mut path) = path_to_strings(claim.path()) else {
            continue;
        };
        if vc_rooted {
            path.insert(0, "vc".to_owned());
        }
        for disclosure in disclosures_for_path(disclosables, disclosures, &path) {
            if !selected.iter().any(|d| d.digest() == disclosure.digest()) {
                selected.push(disclosure);
            }
        }
    }
    Some(selected)
}

#[derive(Debug, thiserror::Error)]
pub enum DcqlMatchError {
    #[error("malformed DCQL query: {0}")]
    MalformedQuery(#[from] DcqlQueryError),

    #[error("required credential set {index} cannot be satisfied")]
    CredentialSetUnsatisfied { index: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    use base64::prelude::*;
    use serde_json::json;

    use crate::core::credential::detect_and_parse;

    fn held(id: &str, data: Json) -> HeldCredential {
        let (_, credential) = detect_and_parse(&data.to_string()).unwrap();
        HeldCredential::new(id, credential)
    }

    fn query(value: Json) -> DcqlQuery {
        serde_json::from_value(value).unwrap()
    }

    fn pid(id: &str, given_name: &str) -> HeldCredential {
        held(
            id,
            json!({ "vct": "urn:eu.europa.ec.eudi:pid:1", "given_name": given_name }),
        )
    }

    fn ids<C: DcqlCredential>(matches: &[DcqlMatch<'_, C>]) -> Vec<String> {
        matches
            .iter()
            .map(|m| m.credential().id().to_owned())
            .collect()
    }

    fn sd_jwt_pid() -> (HeldCredential, Disclosure, Disclosure) {
        let given_name = Disclosure::new("2GLC42sKQveCfGfryNRN9w", "given_name", json!("John"));
        let family_name = Disclosure::new("eluV5Og3gSNII8EYnsxA_A", "family_name", json!("Doe"));
        let payload = json!({
            "iss": "https://issuer.example.com",
            "vct": "urn:eu.europa.ec.eudi:pid:1",
            "_sd": [given_name.digest(), family_name.digest()],
            "_sd_alg": "sha-256"
        });
        let jwt = format!(
            "{}.{}.c2ln",
            BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256","typ":"dc+sd-jwt"}"#),
            BASE64_URL_SAFE_NO_PAD.encode(payload.to_string())
        );
        let raw = format!("{jwt}~{}~{}~", given_name.encoded(), family_name.encoded());
        let (_, credential) = detect_and_parse(&raw).unwrap();
        (HeldCredential::new("sd", credential), given_name, family_name)
    }

    #[test]
    fn single_match_keeps_first_in_input_order() {
        let credentials = [pid("first", "Erika"), pid("second", "Max")];
        let query = query(json!({
            "credentials": [{ "id": "pid", "format": "dc+sd-jwt" }]
        }));

        for _ in 0..10 {
            let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
            assert_eq!(ids(&matches["pid"]), ["first"]);
        }
    }

    #[test]
    fn multiple_keeps_all() {
        let credentials = [pid("first", "Erika"), pid("second", "Max")];
        let query = query(json!({
            "credentials": [{ "id": "pid", "format": "dc+sd-jwt", "multiple": true }]
        }));

        let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
        assert_eq!(ids(&matches["pid"]), ["first", "second"]);
    }

    #[test]
    fn format_and_meta_filter() {
        let credentials = [
            pid("pid", "Erika"),
            held(
                "degree",
                json!({
                    "@context": ["https://www.w3.org/2018/credentials/v1"],
                    "type": ["VerifiableCredential", "UniversityDegreeCredential"]
                }),
            ),
        ];
        let query = query(json!({
            "credentials": [
                {
                    "id": "degree",
                    "format": "jwt_vc_json",
                    "meta": { "type_values": [["UniversityDegreeCredential"]] }
                },
                {
                    "id": "other_pid",
                    "format": "dc+sd-jwt",
                    "meta": { "vct_values": ["urn:other"] }
                },
                {
                    "id": "mdl",
                    "format": "mso_mdoc",
                    "meta": { "doctype_value": "org.iso.18013.5.1.mDL" }
                }
            ]
        }));

        let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
        assert_eq!(matches.keys().collect::<Vec<_>>(), ["degree"]);
        assert_eq!(ids(&matches["degree"]), ["degree"]);
    }

    #[test]
    fn any_claim_set_option_may_match() {
        let credentials = [pid("pid", "Erika")];
        let query = query(json!({
            "credentials": [{
                "id": "pid",
                "format": "dc+sd-jwt",
                "claims": [
                    { "id": "a", "path": ["birth_date"] },
                    { "id": "b", "path": ["given_name"] }
                ],
                "claim_sets": [["a"], ["b"]]
            }]
        }));

        let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
        assert_eq!(ids(&matches["pid"]), ["pid"]);
    }

    #[test]
    fn claim_values_must_match() {
        let credentials = [pid("erika", "Erika"), pid("max", "Max")];
        let query = query(json!({
            "credentials": [{
                "id": "pid",
                "format": "dc+sd-jwt",
                "claims": [{ "path": ["given_name"], "values": ["Max"] }]
            }]
        }));

        let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
        assert_eq!(ids(&matches["pid"]), ["max"]);
    }

    #[test]
    fn undeclared_claim_id_is_malformed() {
        let credentials = [pid("pid", "Erika")];
        let query = query(json!({
            "credentials": [{
                "id": "pid",
                "format": "dc+sd-jwt",
                "claims": [{ "id": "a", "path": ["given_name"] }],
                "claim_sets": [["a", "z"]]
            }]
        }));

        let err = DcqlMatcher::match_query(&query, &credentials).unwrap_err();
        assert!(matches!(
            err,
            DcqlMatchError::MalformedQuery(DcqlQueryError::UndeclaredClaim { .. })
        ));
    }

    #[test]
    fn required_credential_set_must_be_satisfied() {
        let credentials = [pid("pid", "Erika")];
        let mut value = json!({
            "credentials": [
                { "id": "pid", "format": "dc+sd-jwt" },
                { "id": "mdl", "format": "mso_mdoc" }
            ],
            "credential_sets": [
                { "options": [["pid"]] },
                { "options": [["mdl"]] }
            ]
        });

        let err = DcqlMatcher::match_query(&query(value.clone()), &credentials).unwrap_err();
        assert!(matches!(
            err,
            DcqlMatchError::CredentialSetUnsatisfied { index: 1 }
        ));

        value["credential_sets"][1]["required"] = json!(false);
        let matches = DcqlMatcher::match_query(&query(value), &credentials).unwrap();
        assert_eq!(matches.keys().collect::<Vec<_>>(), ["pid"]);
    }

    /// Without credential sets every query is nominally required, but missing
    /// matches only produce a warning and the partial result is returned.
    #[test]
    fn partial_results_without_credential_sets() {
        let credentials = [pid("pid", "Erika")];
        let query = query(json!({
            "credentials": [
                { "id": "pid", "format": "dc+sd-jwt" },
                { "id": "mdl", "format": "mso_mdoc" }
            ]
        }));

        let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
        assert_eq!(matches.len(), 1);
        assert!(!matches.contains_key("mdl"));
    }

    #[test]
    fn trusted_authorities_compare_issuer() {
        let (credential, _, _) = sd_jwt_pid();
        let credentials = [credential];
        let trusted = |issuer: &str| {
            query(json!({
                "credentials": [{
                    "id": "pid",
                    "format": "dc+sd-jwt",
                    "trusted_authorities": [{ "type": "openid_federation", "values": [issuer] }]
                }]
            }))
        };

        let matches =
            DcqlMatcher::match_query(&trusted("https://issuer.example.com"), &credentials).unwrap();
        assert_eq!(matches.len(), 1);
        let matches =
            DcqlMatcher::match_query(&trusted("https://other.example.com"), &credentials).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn aki_trusted_authority() {
        let credentials = [pid("pid", "Erika").with_authority_key_identifier("s9tIpPmhxdiuNkHMEWNpYim8S8Y")];
        let query = query(json!({
            "credentials": [{
                "id": "pid",
                "format": "dc+sd-jwt",
                "trusted_authorities": [{ "type": "aki", "values": ["s9tIpPmhxdiuNkHMEWNpYim8S8Y"] }]
            }]
        }));

        let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
        assert_eq!(ids(&matches["pid"]), ["pid"]);
    }

    #[test]
    fn selects_disclosures_for_requested_claims() {
        let (credential, given_name, _) = sd_jwt_pid();
        let credentials = [credential];
        let query = query(json!({
            "credentials": [{
                "id": "pid",
                "format": "dc+sd-jwt",
                "claims": [{ "path": ["given_name"] }]
            }]
        }));

        let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
        let selected = &matches["pid"][0];
        assert_eq!(selected.selected_disclosures(), Some(&[&given_name][..]));

        let presentation = selected.present().unwrap();
        assert!(presentation.ends_with(&format!("~{}~", given_name.encoded())));
        assert_eq!(presentation.matches('~').count(), 2);
    }

    #[test]
    fn no_claims_selects_every_disclosure() {
        let (credential, _, _) = sd_jwt_pid();
        let credentials = [credential];
        let query = query(json!({
            "credentials": [{ "id": "pid", "format": "dc+sd-jwt" }]
        }));

        let matches = DcqlMatcher::match_query(&query, &credentials).unwrap();
        assert_eq!(
            matches["pid"][0].selected_disclosures().map(<[_]>::len),
            Some(2)
        );
    }
}
