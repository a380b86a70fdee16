use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value as Json};

use super::claim;
use crate::policy::{CredentialWrapperValidatorPolicy, PolicyContext};

/// Requires a presentation to embed at least `args` credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumCredentialsPolicy;

/// Requires a presentation to embed at most `args` credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaximumCredentialsPolicy;

#[async_trait]
impl CredentialWrapperValidatorPolicy for MinimumCredentialsPolicy {
    fn name(&self) -> &str {
        "minimum-credentials"
    }

    fn description(&self) -> &str {
        "Verifies that a presentation contains at least the given number of credentials."
    }

    async fn verify(
        &self,
        payload: &Map<String, Json>,
        args: Option<&Json>,
        _context: &PolicyContext,
    ) -> Result<Json> {
        let (limit, total) = (limit(args)?, credential_count(payload)?);
        if total < limit {
            bail!("presentation contains {total} credentials, at least {limit} required")
        }
        Ok(json!({ "total": total, "remaining": 0, "original": limit }))
    }
}

#[async_trait]
impl CredentialWrapperValidatorPolicy for MaximumCredentialsPolicy {
    fn name(&self) -> &str {
        "maximum-credentials"
    }

    fn description(&self) -> &str {
        "Verifies that a presentation contains at most the given number of credentials."
    }

    async fn verify(
        &self,
        payload: &Map<String, Json>,
        args: Option<&Json>,
        _context: &PolicyContext,
    ) -> Result<Json> {
        let (limit, total) = (limit(args)?, credential_count(payload)?);
        if total > limit {
            bail!(
                "presentation contains {total} credentials, {} more than the {limit} allowed",
                total - limit
            )
        }
        Ok(json!({ "total": total, "exceeding": 0, "original": limit }))
    }
}

/// The limit, given as a number or `{"value": n}`.
fn limit(args: Option<&Json>) -> Result<usize> {
    let value = match args {
        Some(Json::Object(object)) => object.get("value"),
        other => other,
    };
    match value.and_then(Json::as_u64) {
        Some(limit) => Ok(limit as usize),
        None => bail!("expected a credential count as arguments"),
    }
}

fn credential_count(payload: &Map<String, Json>) -> Result<usize> {
    let credentials = payload
        .get("vp")
        .and_then(|vp| vp.get("verifiableCredential"))
        .or_else(|| claim(payload, "verifiableCredential"));

    match credentials {
        Some(Json::Array(credentials)) => Ok(credentials.len()),
        Some(_) => Ok(1),
        None => bail!("not a presentation: no `verifiableCredential`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presentation(count: usize) -> Map<String, Json> {
        serde_json::from_value(json!({
            "vp": { "verifiableCredential": vec!["eyJ.eyJ.sig"; count] }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn bounds() {
        let context = Map::new();
        let two = presentation(2);

        assert!(MinimumCredentialsPolicy
            .verify(&two, Some(&json!(2)), &context)
            .await
            .is_ok());
        assert!(MinimumCredentialsPolicy
            .verify(&two, Some(&json!({ "value": 3 })), &context)
            .await
            .is_err());
        assert!(MaximumCredentialsPolicy
            .verify(&two, Some(&json!(2)), &context)
            .await
            .is_ok());
        assert!(MaximumCredentialsPolicy
            .verify(&two, Some(&json!(1)), &context)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn requires_presentation_and_limit() {
        let context = Map::new();
        assert!(MinimumCredentialsPolicy
            .verify(&Map::new(), Some(&json!(1)), &context)
            .await
            .is_err());
        assert!(MinimumCredentialsPolicy
            .verify(&presentation(1), None, &context)
            .await
            .is_err());
    }
}
