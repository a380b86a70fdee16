//! Compact JWS decoding and the signing capabilities used by policies.
//!
//! Key management and algorithms beyond ES256 are left to implementors of
//! [`JwsSigner`], [`JwsVerifier`] and [`KeyResolver`].

use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::prelude::*;
use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature, SigningKey, VerifyingKey,
};
use serde_json::{Map, Value as Json};
use ssi::claims::jws::split_jws;

use crate::utils::{decode_base64url, decode_base64url_json, is_base64url};

/// A decoded compact JWS. The signature is not verified.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedJws {
    pub header: Map<String, Json>,
    pub payload: Map<String, Json>,
    pub signature: Vec<u8>,
    signing_input_len: usize,
    compact: String,
}

impl DecodedJws {
    /// `BASE64URL(header) || '.' || BASE64URL(payload)`.
    pub fn signing_input(&self) -> &[u8] {
        &self.compact.as_bytes()[..self.signing_input_len]
    }

    pub fn compact(&self) -> &str {
        &self.compact
    }

    pub fn alg(&self) -> Option<&str> {
        self.header.get("alg")?.as_str()
    }

    pub fn kid(&self) -> Option<&str> {
        self.header.get("kid")?.as_str()
    }
}

/// Returns `true` if `s` has the shape of a compact JWS: a non-empty header
/// and payload, and a possibly empty signature, all base64url.
pub fn is_jwt(s: &str) -> bool {
    let Ok((header, payload, signature)) = split_jws(s) else {
        return false;
    };
    is_base64url(header)
        && is_base64url(payload)
        && (signature.is_empty() || is_base64url(signature))
}

pub fn decode_jws(compact: &str) -> Result<DecodedJws, JwsError> {
    let compact = compact.trim();
    let (header_b64, payload_b64, signature_b64) =
        split_jws(compact).map_err(|e| JwsError::Structure(e.to_string()))?;
    if signature_b64.contains('.') {
        return Err(JwsError::Structure("too many segments".into()));
    }

    let header =
        decode_base64url_json(header_b64).map_err(|e| JwsError::segment("header", e))?;
    let payload =
        decode_base64url_json(payload_b64).map_err(|e| JwsError::segment("payload", e))?;
    let signature = if signature_b64.is_empty() {
        Vec::new()
    } else {
        decode_base64url(signature_b64).map_err(|e| JwsError::segment("signature", e))?
    };

    Ok(DecodedJws {
        header,
        payload,
        signature,
        signing_input_len: header_b64.len() + 1 + payload_b64.len(),
        compact: compact.to_owned(),
    })
}

/// Signs `payload` as a compact JWS, setting `alg` (and `jwk`, unless a `kid`
/// is given) in the protected header.
pub async fn sign_jws(
    signer: &(dyn JwsSigner + Send + Sync),
    mut header: Map<String, Json>,
    payload: &Json,
) -> Result<String> {
    header.insert("alg".into(), signer.alg().into());
    if !header.contains_key("kid") {
        header.insert("jwk".into(), signer.jwk().clone());
    }

    let header_b64: String =
        serde_json::to_vec(&header).map(|b| BASE64_URL_SAFE_NO_PAD.encode(b))?;
    let payload_b64 = serde_json::to_vec(payload).map(|b| BASE64_URL_SAFE_NO_PAD.encode(b))?;
    let signing_input = [header_b64.as_bytes(), b".", payload_b64.as_bytes()].concat();
    let signature = signer.sign(&signing_input).await;
    let signature_b64 = BASE64_URL_SAFE_NO_PAD.encode(signature);
    Ok(format!("{header_b64}.{payload_b64}.{signature_b64}"))
}

#[async_trait]
pub trait JwsSigner {
    /// The algorithm that will be used to sign.
    fn alg(&self) -> &str;
    /// The public JWK of the signer.
    fn jwk(&self) -> &Json;
    async fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

pub trait JwsVerifier: Debug {
    /// The algorithm this verifier accepts.
    fn alg(&self) -> &str;
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}

/// Resolves a key identifier (a DID URL, `kid` or issuer) to a verifier.
#[async_trait]
pub trait KeyResolver: Debug {
    async fn resolve_to_key(&self, identifier: &str) -> Result<Arc<dyn JwsVerifier + Send + Sync>>;
}

#[derive(Debug)]
pub struct P256Signer {
    key: SigningKey,
    jwk: Json,
}

impl P256Signer {
    pub fn new(key: SigningKey) -> Result<Self> {
        let pk: p256::PublicKey = key.verifying_key().into();
        let jwk = serde_json::from_str(&pk.to_jwk_string())?;
        Ok(Self { key, jwk })
    }

    pub fn verifier(&self) -> P256Verifier {
        P256Verifier {
            key: VerifyingKey::from(&self.key),
        }
    }
}

#[async_trait]
impl JwsSigner for P256Signer {
    fn alg(&self) -> &str {
        "ES256"
    }

    fn jwk(&self) -> &Json {
        &self.jwk
    }

    async fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let sig: Signature = self.key.sign(payload);
        sig.to_vec()
    }
}

/// ES256 verification over a raw `r || s` signature.
#[derive(Debug, Clone)]
pub struct P256Verifier {
    key: VerifyingKey,
}

impl P256Verifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    pub fn from_jwk(jwk: &Json) -> Result<Self> {
        let pk = p256::PublicKey::from_jwk_str(&jwk.to_string())?;
        Ok(Self { key: pk.into() })
    }
}

impl JwsVerifier for P256Verifier {
    fn alg(&self) -> &str {
        "ES256"
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.key.verify(data, &signature).is_ok()
    }
}

/// A fixed set of keys by identifier.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    keys: BTreeMap<String, Arc<dyn JwsVerifier + Send + Sync>>,
}

impl StaticKeyResolver {
    pub fn with_key(
        mut self,
        identifier: impl Into<String>,
        key: Arc<dyn JwsVerifier + Send + Sync>,
    ) -> Self {
        self.keys.insert(identifier.into(), key);
        self
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve_to_key(&self, identifier: &str) -> Result<Arc<dyn JwsVerifier + Send + Sync>> {
        // A DID URL fragment resolves to the same key as its DID.
        let did = identifier.split('#').next().unwrap_or(identifier);
        if let Some(key) = self.keys.get(identifier).or_else(|| self.keys.get(did)) {
            return Ok(key.clone());
        }
        bail!("no key known for `{identifier}`")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwsError {
    #[error("not a compact JWS: {0}")]
    Structure(String),

    #[error("invalid {segment}: {reason}")]
    Segment {
        segment: &'static str,
        reason: String,
    },
}

impl JwsError {
    fn segment(segment: &'static str, e: impl ToString) -> Self {
        Self::Segment {
            segment,
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signer() -> P256Signer {
        P256Signer::new(SigningKey::from_slice(&[7u8; 32]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn sign_then_verify() {
        let signer = signer();
        let jws = sign_jws(
            &signer,
            Map::from_iter([("kid".to_owned(), json!("did:example:issuer#key-1"))]),
            &json!({ "iss": "did:example:issuer" }),
        )
        .await
        .unwrap();

        let decoded = decode_jws(&jws).unwrap();
        assert_eq!(decoded.alg(), Some("ES256"));
        assert_eq!(decoded.kid(), Some("did:example:issuer#key-1"));
        assert_eq!(decoded.payload["iss"], json!("did:example:issuer"));

        let verifier = signer.verifier();
        assert!(verifier.verify(decoded.signing_input(), &decoded.signature));
        assert!(!verifier.verify(b"tampered", &decoded.signature));

        let from_jwk = P256Verifier::from_jwk(signer.jwk()).unwrap();
        assert!(from_jwk.verify(decoded.signing_input(), &decoded.signature));
    }

    #[test]
    fn jwt_shape() {
        assert!(is_jwt("eyJhbGciOiJub25lIn0.eyJhIjoxfQ."));
        assert!(is_jwt("eyJhbGciOiJub25lIn0.eyJhIjoxfQ.c2ln"));
        assert!(!is_jwt("eyJhbGciOiJub25lIn0.eyJhIjoxfQ"));
        assert!(!is_jwt("a.b.c.d"));
        assert!(!is_jwt(".eyJhIjoxfQ.c2ln"));
    }

    #[test]
    fn decode_reports_bad_segments() {
        assert!(matches!(decode_jws("a.b"), Err(JwsError::Structure(_))));
        assert!(matches!(decode_jws("a.b.c.d"), Err(JwsError::Structure(_))));
        assert!(matches!(
            decode_jws("bm90IGpzb24.eyJhIjoxfQ.c2ln"),
            Err(JwsError::Segment {
                segment: "header",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn static_resolver_matches_did_of_did_url() {
        let resolver =
            StaticKeyResolver::default().with_key("did:example:issuer", Arc::new(signer().verifier()));

        assert!(resolver
            .resolve_to_key("did:example:issuer#key-1")
            .await
            .is_ok());
        assert!(resolver.resolve_to_key("did:example:other").await.is_err());
    }
}
