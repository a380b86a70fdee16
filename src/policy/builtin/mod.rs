//! Policies every verifier can request by name.
//!
//! | name | input | checks |
//! |---|---|---|
//! | `signature` | JWT | ES256 signature, key resolved from `kid` or `iss` |
//! | `expired` | payload | `exp`, `expirationDate` or `validUntil` is not in the past |
//! | `not-before` | payload | `nbf`, `issuanceDate` or `validFrom` is not in the future |
//! | `allowed-issuer` | data | the issuer is one of `args` |
//! | `schema` | data | the data validates against the JSON Schema in `args` |
//! | `minimum-credentials` | payload | a presentation embeds at least `args` credentials |
//! | `maximum-credentials` | payload | a presentation embeds at most `args` credentials |

use std::sync::Arc;

use serde_json::{Map, Value as Json};

use super::VerificationPolicy;
use crate::core::jose::KeyResolver;

mod credential_count;
mod issuer;
mod schema;
mod signature;
mod validity;

pub use credential_count::{MaximumCredentialsPolicy, MinimumCredentialsPolicy};
pub use issuer::AllowedIssuerPolicy;
pub use schema::SchemaPolicy;
pub use signature::SignaturePolicy;
pub use validity::{ExpirationPolicy, NotBeforePolicy};

pub fn policies(key_resolver: Arc<dyn KeyResolver + Send + Sync>) -> Vec<VerificationPolicy> {
    vec![
        VerificationPolicy::Jwt(Arc::new(SignaturePolicy::new(key_resolver))),
        VerificationPolicy::CredentialWrapper(Arc::new(ExpirationPolicy)),
        VerificationPolicy::CredentialWrapper(Arc::new(NotBeforePolicy)),
        VerificationPolicy::CredentialData(Arc::new(AllowedIssuerPolicy)),
        VerificationPolicy::CredentialData(Arc::new(SchemaPolicy)),
        VerificationPolicy::CredentialWrapper(Arc::new(MinimumCredentialsPolicy)),
        VerificationPolicy::CredentialWrapper(Arc::new(MaximumCredentialsPolicy)),
    ]
}

/// Looks `key` up on the payload, then on the `vc` object it may wrap.
fn claim<'a>(payload: &'a Map<String, Json>, key: &str) -> Option<&'a Json> {
    payload
        .get(key)
        .or_else(|| payload.get("vc")?.as_object()?.get(key))
}
