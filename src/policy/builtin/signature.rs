use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value as Json};
use tracing::debug;

use crate::{
    core::jose::{decode_jws, KeyResolver},
    policy::{JwtVerificationPolicy, PolicyContext},
};

/// Verifies the JWS signature with a key resolved from the header `kid`, or
/// the payload `iss` when there is no `kid`.
#[derive(Debug, Clone)]
pub struct SignaturePolicy {
    key_resolver: Arc<dyn KeyResolver + Send + Sync>,
}

impl SignaturePolicy {
    pub fn new(key_resolver: Arc<dyn KeyResolver + Send + Sync>) -> Self {
        Self { key_resolver }
    }
}

#[async_trait]
impl JwtVerificationPolicy for SignaturePolicy {
    fn name(&self) -> &str {
        "signature"
    }

    fn description(&self) -> &str {
        "Checks a JWT credential or presentation by verifying its cryptographic signature using the key referenced by the DID in `iss`."
    }

    async fn verify(
        &self,
        jwt: &str,
        _args: Option<&Json>,
        _context: &PolicyContext,
    ) -> Result<Json> {
        let jws = decode_jws(jwt)?;

        let Some(alg) = jws.alg() else {
            bail!("JWS header has no `alg`")
        };
        let Some(identifier) = jws
            .kid()
            .or_else(|| jws.payload.get("iss").and_then(Json::as_str))
        else {
            bail!("JWS has neither a `kid` header nor an `iss` claim")
        };
        debug!(alg, identifier, "verifying JWS signature");

        let key = self
            .key_resolver
            .resolve_to_key(identifier)
            .await
            .with_context(|| format!("failed to resolve key `{identifier}`"))?;

        if key.alg() != alg {
            bail!("unsupported JWS algorithm `{alg}`, resolved key uses `{}`", key.alg())
        }
        if !key.verify(jws.signing_input(), &jws.signature) {
            bail!("signature verification failed")
        }

        Ok(json!({ "alg": alg, "key": identifier }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use p256::ecdsa::SigningKey;
    use serde_json::Map;

    use crate::core::jose::{sign_jws, P256Signer, StaticKeyResolver};

    const ISSUER: &str = "did:example:issuer";

    async fn signed() -> (P256Signer, String) {
        let signer = P256Signer::new(SigningKey::from_slice(&[3u8; 32]).unwrap()).unwrap();
        let jwt = sign_jws(&signer, Map::new(), &json!({ "iss": ISSUER, "sub": "holder" }))
            .await
            .unwrap();
        (signer, jwt)
    }

    #[tokio::test]
    async fn verifies_with_issuer_key() {
        let (signer, jwt) = signed().await;
        let policy = SignaturePolicy::new(Arc::new(
            StaticKeyResolver::default().with_key(ISSUER, Arc::new(signer.verifier())),
        ));

        let result = policy.verify(&jwt, None, &Map::new()).await.unwrap();
        assert_eq!(result, json!({ "alg": "ES256", "key": ISSUER }));

        let (head, _) = jwt.rsplit_once('.').unwrap();
        let forged = format!("{head}.{}", "A".repeat(86));
        assert!(policy.verify(&forged, None, &Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn unknown_key_fails() {
        let (_, jwt) = signed().await;
        let policy = SignaturePolicy::new(Arc::new(StaticKeyResolver::default()));

        let error = policy.verify(&jwt, None, &Map::new()).await.unwrap_err();
        assert!(error.to_string().contains(ISSUER));
    }
}
