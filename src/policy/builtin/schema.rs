use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use crate::policy::{CredentialDataValidatorPolicy, PolicyContext};

/// Validates the credential data against the JSON Schema given as arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaPolicy;

#[async_trait]
impl CredentialDataValidatorPolicy for SchemaPolicy {
    fn name(&self) -> &str {
        "schema"
    }

    fn description(&self) -> &str {
        "Verifies a credential's data against a JSON Schema."
    }

    async fn verify(
        &self,
        data: &Map<String, Json>,
        args: Option<&Json>,
        _context: &PolicyContext,
    ) -> Result<Json> {
        let Some(schema) = args.filter(|args| args.is_object()) else {
            bail!("expected a JSON Schema object as arguments")
        };
        let validator =
            JSONSchema::compile(schema).map_err(|e| anyhow!("invalid JSON Schema: {e}"))?;

        let instance = Json::Object(data.clone());
        if let Err(errors) = validator.validate(&instance) {
            let errors: Vec<String> = errors
                .map(|error| {
                    debug!("credential data did not pass schema validation: {error}");
                    format!("{}: {error}", error.instance_path)
                })
                .collect();
            bail!("schema validation failed: {}", errors.join("; "))
        }

        Ok(json!({ "valid": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Json {
        json!({
            "type": "object",
            "required": ["credentialSubject"],
            "properties": {
                "credentialSubject": {
                    "type": "object",
                    "required": ["given_name"],
                    "properties": { "given_name": { "type": "string" } }
                }
            }
        })
    }

    async fn verify(data: Json, args: Option<Json>) -> Result<Json> {
        SchemaPolicy
            .verify(
                &serde_json::from_value(data).unwrap(),
                args.as_ref(),
                &Map::new(),
            )
            .await
    }

    #[tokio::test]
    async fn validates_data() {
        let valid = json!({ "credentialSubject": { "given_name": "Erika" } });
        assert!(verify(valid, Some(schema())).await.is_ok());

        let invalid = json!({ "credentialSubject": { "given_name": 7 } });
        let error = verify(invalid, Some(schema())).await.unwrap_err();
        assert!(error.to_string().contains("/credentialSubject/given_name"));
    }

    #[tokio::test]
    async fn schema_argument_is_required() {
        assert!(verify(json!({}), None).await.is_err());
        assert!(verify(json!({}), Some(json!("schema.json"))).await.is_err());
        assert!(verify(json!({}), Some(json!({ "type": 12 }))).await.is_err());
    }
}
