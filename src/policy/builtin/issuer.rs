use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value as Json};

use crate::{
    core::credential::data_issuer,
    policy::{CredentialDataValidatorPolicy, PolicyContext},
};

/// Accepts credentials whose issuer is listed in the arguments, given as a
/// single identifier or an array of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowedIssuerPolicy;

#[async_trait]
impl CredentialDataValidatorPolicy for AllowedIssuerPolicy {
    fn name(&self) -> &str {
        "allowed-issuer"
    }

    fn description(&self) -> &str {
        "Checks that the issuer of the credential is present in the supplied list."
    }

    async fn verify(
        &self,
        data: &Map<String, Json>,
        args: Option<&Json>,
        _context: &PolicyContext,
    ) -> Result<Json> {
        let allowed: Vec<&str> = match args {
            Some(Json::String(issuer)) => vec![issuer.as_str()],
            Some(Json::Array(issuers)) => issuers.iter().filter_map(Json::as_str).collect(),
            _ => bail!("expected an issuer or an array of issuers as arguments"),
        };

        let Some(issuer) = data_issuer(data)
            .or_else(|| data.get("iss").and_then(Json::as_str).map(ToOwned::to_owned))
        else {
            bail!("credential does not name its issuer")
        };

        if !allowed.contains(&issuer.as_str()) {
            bail!("issuer `{issuer}` is not in the allowed issuers {allowed:?}")
        }

        Ok(json!({ "issuer": issuer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn verify(data: Json, args: Json) -> Result<Json> {
        AllowedIssuerPolicy
            .verify(
                &serde_json::from_value(data).unwrap(),
                Some(&args),
                &Map::new(),
            )
            .await
    }

    #[tokio::test]
    async fn issuer_shapes() {
        let args = json!(["did:example:a", "did:example:b"]);
        assert!(verify(json!({ "issuer": "did:example:a" }), args.clone()).await.is_ok());
        assert!(verify(json!({ "issuer": { "id": "did:example:b" } }), args.clone())
            .await
            .is_ok());
        assert!(verify(json!({ "iss": "did:example:b" }), args.clone()).await.is_ok());
        assert!(verify(json!({ "issuer": "did:example:c" }), args).await.is_err());
    }

    #[tokio::test]
    async fn single_issuer_argument() {
        assert!(verify(json!({ "issuer": "did:example:a" }), json!("did:example:a"))
            .await
            .is_ok());
        assert!(verify(json!({ "issuer": "did:example:a" }), json!(1)).await.is_err());
        assert!(verify(json!({}), json!("did:example:a")).await.is_err());
    }
}
