use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value as Json};

use super::claim;
use crate::policy::{CredentialWrapperValidatorPolicy, PolicyContext};

const EXPIRATION_CLAIMS: [&str; 3] = ["exp", "expirationDate", "validUntil"];
const NOT_BEFORE_CLAIMS: [&str; 3] = ["nbf", "issuanceDate", "validFrom"];

/// Fails if the credential's expiration date has passed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpirationPolicy;

#[async_trait]
impl CredentialWrapperValidatorPolicy for ExpirationPolicy {
    fn name(&self) -> &str {
        "expired"
    }

    fn description(&self) -> &str {
        "Verifies that the credential's expiration date has not been exceeded."
    }

    async fn verify(
        &self,
        payload: &Map<String, Json>,
        _args: Option<&Json>,
        _context: &PolicyContext,
    ) -> Result<Json> {
        let Some((date_seen, expiry)) = find_date(payload, &EXPIRATION_CLAIMS)? else {
            return Ok(json!({ "policy_available": false }));
        };

        let now = Utc::now();
        if expiry < now {
            bail!(
                "credential expired at {} ({date_seen}), {}s ago",
                expiry.to_rfc3339(),
                (now - expiry).num_seconds()
            )
        }

        Ok(json!({
            "policy_available": true,
            "date_seen": date_seen,
            "expiry": expiry.to_rfc3339(),
            "expires_in_seconds": (expiry - now).num_seconds(),
        }))
    }
}

/// Fails if the credential is not valid yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotBeforePolicy;

#[async_trait]
impl CredentialWrapperValidatorPolicy for NotBeforePolicy {
    fn name(&self) -> &str {
        "not-before"
    }

    fn description(&self) -> &str {
        "Verifies that the credential's not-before date (`nbf`, `issuanceDate` or `validFrom`) has been reached."
    }

    async fn verify(
        &self,
        payload: &Map<String, Json>,
        _args: Option<&Json>,
        _context: &PolicyContext,
    ) -> Result<Json> {
        let Some((date_seen, not_before)) = find_date(payload, &NOT_BEFORE_CLAIMS)? else {
            return Ok(json!({ "policy_available": false }));
        };

        let now = Utc::now();
        if not_before > now {
            bail!(
                "credential is not valid before {} ({date_seen}), {}s from now",
                not_before.to_rfc3339(),
                (not_before - now).num_seconds()
            )
        }

        Ok(json!({
            "policy_available": true,
            "date_seen": date_seen,
            "available_from": not_before.to_rfc3339(),
            "available_since_seconds": (now - not_before).num_seconds(),
        }))
    }
}

/// The first of `keys` present on the payload, as a timestamp.
fn find_date<'k>(
    payload: &Map<String, Json>,
    keys: &[&'k str],
) -> Result<Option<(&'k str, DateTime<Utc>)>> {
    for key in keys {
        if let Some(value) = claim(payload, key) {
            let date = parse_date(value).with_context(|| format!("invalid `{key}`"))?;
            return Ok(Some((*key, date)));
        }
    }
    Ok(None)
}

/// A NumericDate in seconds, or an RFC 3339 date-time string.
fn parse_date(value: &Json) -> Result<DateTime<Utc>> {
    match value {
        Json::Number(seconds) => {
            let Some(seconds) = seconds.as_i64() else {
                bail!("expected whole seconds, found {seconds}")
            };
            DateTime::from_timestamp(seconds, 0).context("timestamp out of range")
        }
        Json::String(date) => Ok(DateTime::parse_from_rfc3339(date)?.with_timezone(&Utc)),
        other => bail!("expected a number or date string, found {other}"),
    }
}
