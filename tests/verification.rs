use std::{collections::BTreeMap, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use digital_credentials::{
    config::VerifierConfig,
    core::jose::{sign_jws, P256Signer, StaticKeyResolver},
    policy::{
        CredentialDataValidatorPolicy, PolicyContext, PolicyOutcome, PolicyRegistry,
        VerificationPolicy,
    },
    verifier::{verify_presentation, PresentationResultEntry, Verifier},
};
use p256::ecdsa::SigningKey;
use serde_json::{json, Map, Value as Json};

const OPENBADGE_VP: &str = include_str!("fixtures/openbadge_vp.jwt");
const IDENTITY_CREDENTIAL: &str = include_str!("fixtures/identity_credential.sd-jwt");

const ISSUER: &str = "did:example:university";
const HOLDER: &str = "did:example:student";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn builtin_registry(key_resolver: StaticKeyResolver) -> PolicyRegistry {
    PolicyRegistry::with_builtin_policies(Arc::new(key_resolver))
}

fn outcomes(entry: &PresentationResultEntry) -> BTreeMap<&str, bool> {
    entry
        .policy_results()
        .iter()
        .map(|result| (result.request().name(), result.is_success()))
        .collect()
}

#[tokio::test]
async fn openbadge_presentation_from_config() {
    init_tracing();

    let config = VerifierConfig::from_json_str(
        r#"{
            "vp_policies": ["signature", "not-before", "expired", { "policy": "minimum-credentials", "args": 1 }],
            "vc_policies": ["signature", "not-before", "expired"],
            "specific_policies": {
                "OpenBadgeCredential": [
                    { "policy": "allowed-issuer", "args": ["did:key:z6MkpRcoTF24KWkxoRhdYpChPvA4C7jpFg5qwo3Z22gsb1hr"] }
                ]
            }
        }"#,
    )
    .unwrap();

    let verifier = Verifier::builder()
        .with_registry(builtin_registry(StaticKeyResolver::default()))
        .with_config(config)
        .build()
        .unwrap();

    let response = verifier
        .verify(OPENBADGE_VP, PolicyContext::new())
        .await
        .unwrap();

    let [vp, badge] = response.entries() else {
        panic!("expected two entries, found {:?}", response.entries())
    };
    assert_eq!(vp.credential_type(), "VerifiablePresentation");
    assert_eq!(badge.credential_type(), "OpenBadgeCredential");
    assert_eq!(response.policies_run(), 8);

    // EdDSA keys cannot be resolved here, so only signatures fail.
    assert_eq!(
        outcomes(vp),
        BTreeMap::from([
            ("expired", true),
            ("minimum-credentials", true),
            ("not-before", true),
            ("signature", false),
        ])
    );
    assert_eq!(
        outcomes(badge),
        BTreeMap::from([
            ("allowed-issuer", true),
            ("expired", true),
            ("not-before", true),
            ("signature", false),
        ])
    );

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["policies_run"], 8);
    assert!(json["time_ms"].is_u64());
    assert_eq!(json["entries"][1]["credential_type"], "OpenBadgeCredential");
    let signature = json["entries"][0]["policy_results"]
        .as_array()
        .unwrap()
        .iter()
        .find(|result| result["policy"] == "signature")
        .unwrap();
    assert_eq!(signature["is_success"], false);
    assert!(signature["error"].as_str().unwrap().contains("did:key:z6MkpdCqT5"));
}

struct Keys {
    issuer: P256Signer,
    holder: P256Signer,
}

impl Keys {
    fn new() -> Self {
        Self {
            issuer: P256Signer::new(SigningKey::from_slice(&[3u8; 32]).unwrap()).unwrap(),
            holder: P256Signer::new(SigningKey::from_slice(&[7u8; 32]).unwrap()).unwrap(),
        }
    }

    fn resolver(&self) -> StaticKeyResolver {
        StaticKeyResolver::default()
            .with_key(ISSUER, Arc::new(self.issuer.verifier()))
            .with_key(HOLDER, Arc::new(self.holder.verifier()))
    }
}

fn kid(did: &str) -> Map<String, Json> {
    let mut header = Map::new();
    header.insert("kid".into(), format!("{did}#key-1").into());
    header
}

async fn signed_presentation(keys: &Keys, credential_exp: i64) -> String {
    let now = Utc::now().timestamp();
    let credential = sign_jws(
        &keys.issuer,
        kid(ISSUER),
        &json!({
            "iss": ISSUER,
            "sub": HOLDER,
            "nbf": now - 60,
            "exp": credential_exp,
            "vc": {
                "@context": ["https://www.w3.org/2018/credentials/v1"],
                "type": ["VerifiableCredential", "UniversityDegreeCredential"],
                "issuer": ISSUER,
                "credentialSubject": { "id": HOLDER, "degree": "BSc" }
            }
        }),
    )
    .await
    .unwrap();

    sign_jws(
        &keys.holder,
        kid(HOLDER),
        &json!({
            "iss": HOLDER,
            "nbf": now - 60,
            "nonce": "8f7d",
            "vp": {
                "@context": ["https://www.w3.org/2018/credentials/v1"],
                "type": ["VerifiablePresentation"],
                "verifiableCredential": [credential]
            }
        }),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn es256_presentation() {
    let keys = Keys::new();
    let vp_token = signed_presentation(&keys, Utc::now().timestamp() + 3600).await;

    let verifier = Verifier::builder()
        .with_registry(builtin_registry(keys.resolver()))
        .with_vp_policy("signature", None)
        .with_vc_policy("signature", None)
        .with_vc_policy("expired", None)
        .with_specific_policy(
            "UniversityDegreeCredential",
            "schema",
            Some(json!({
                "type": "object",
                "required": ["credentialSubject"],
                "properties": {
                    "credentialSubject": { "required": ["degree"] }
                }
            })),
        )
        .build()
        .unwrap();

    let response = verifier.verify(&vp_token, PolicyContext::new()).await.unwrap();
    let [vp, degree] = response.entries() else {
        panic!("expected two entries")
    };
    assert_eq!(degree.credential_type(), "UniversityDegreeCredential");

    let PolicyOutcome::Success(result) = vp.result("signature").unwrap().outcome() else {
        panic!("presentation signature should verify")
    };
    assert_eq!(result["key"], format!("{HOLDER}#key-1"));
    assert_eq!(
        outcomes(degree),
        BTreeMap::from([("expired", true), ("schema", true), ("signature", true)])
    );
}

#[tokio::test]
async fn expired_credential_and_forged_presentation() {
    let keys = Keys::new();
    let vp_token = signed_presentation(&keys, Utc::now().timestamp() - 3600).await;
    let (signing_input, _) = vp_token.rsplit_once('.').unwrap();
    let forged = format!("{signing_input}.{}", "A".repeat(86));

    let registry = builtin_registry(keys.resolver());
    let signature = registry.request("signature", None).unwrap();
    let expired = registry.request("expired", None).unwrap();

    let response = verify_presentation(
        &forged,
        &[signature.clone()],
        &[signature, expired],
        &BTreeMap::new(),
        PolicyContext::new(),
    )
    .await
    .unwrap();

    assert!(!response.entries()[0].result("signature").unwrap().is_success());
    let credential = &response.entries()[1];
    assert!(credential.result("signature").unwrap().is_success());
    assert!(!credential.result("expired").unwrap().is_success());
}

/// Succeeds, or fails when `args` is `"fail"`.
#[derive(Debug)]
struct Step(&'static str);

#[async_trait]
impl CredentialDataValidatorPolicy for Step {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "A step that may fail on request."
    }

    async fn verify(
        &self,
        _data: &Map<String, Json>,
        args: Option<&Json>,
        _context: &PolicyContext,
    ) -> Result<Json> {
        if args.and_then(Json::as_str) == Some("fail") {
            bail!("{} failed", self.0)
        }
        Ok(json!(self.0))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_policy_does_not_affect_siblings() {
    let registry = PolicyRegistry::new(
        ["first", "second", "third"].map(|name| VerificationPolicy::CredentialData(Arc::new(Step(name)))),
    )
    .unwrap();

    let requests = [
        registry.request("first", None).unwrap(),
        registry.request("second", Some(json!("fail"))).unwrap(),
        registry.request("third", None).unwrap(),
    ];

    let response = verify_presentation(
        OPENBADGE_VP,
        &requests,
        &[],
        &BTreeMap::new(),
        PolicyContext::new(),
    )
    .await
    .unwrap();

    let vp = &response.entries()[0];
    assert_eq!(vp.policy_results().len(), 3);
    assert!(vp.result("first").unwrap().is_success());
    assert!(vp.result("third").unwrap().is_success());
    let PolicyOutcome::Failure(error) = vp.result("second").unwrap().outcome() else {
        panic!("second should fail")
    };
    assert_eq!(error.to_string(), "second failed");
    assert_eq!(response.policies_run(), 3);
}

#[tokio::test]
async fn sd_jwt_vc_presentation() {
    let registry = builtin_registry(StaticKeyResolver::default());
    let allowed = registry
        .request("allowed-issuer", Some(json!("https://trial.authlete.net")))
        .unwrap();
    let schema = registry
        .request(
            "schema",
            Some(json!({ "required": ["given_name", "family_name", "birthdate"] })),
        )
        .unwrap();

    let response = verify_presentation(
        IDENTITY_CREDENTIAL,
        &[allowed.clone()],
        &[allowed],
        &BTreeMap::from([(
            "https://credentials.example.com/identity_credential".to_owned(),
            vec![schema],
        )]),
        PolicyContext::new(),
    )
    .await
    .unwrap();

    let types: Vec<_> = response
        .entries()
        .iter()
        .map(PresentationResultEntry::credential_type)
        .collect();
    assert_eq!(
        types,
        [
            "https://credentials.example.com/identity_credential",
            "https://credentials.example.com/identity_credential"
        ]
    );
    assert!(response.entries()[0].result("allowed-issuer").unwrap().is_success());
    assert_eq!(
        outcomes(&response.entries()[1]),
        BTreeMap::from([("allowed-issuer", true), ("schema", true)])
    );
}
