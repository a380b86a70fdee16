use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use super::VerificationError;
use crate::core::{
    credential::{detect_and_parse, w3c_type, DigitalCredential, SignatureDescriptor},
    disclosure::SEPARATOR,
    jose::decode_jws,
};

const DEFAULT_PRESENTATION_TYPE: &str = "VerifiablePresentation";
const DEFAULT_CREDENTIAL_TYPE: &str = "VerifiableCredential";

/// The views of a presentation or credential that policies inspect.
#[derive(Debug, Clone)]
pub(crate) struct PolicyInput {
    /// The compact JWS, when the subject is JWT secured.
    pub jwt: Option<String>,
    /// The W3C `vc`/`vp` object, or the revealed SD-JWT claims.
    pub data: Map<String, Json>,
    /// The whole decoded payload.
    pub payload: Map<String, Json>,
}

/// A subject of verification. `input` is an error when the credential could
/// not be parsed, in which case every policy run against it fails.
#[derive(Debug)]
pub(crate) struct Subject {
    pub credential_type: String,
    pub input: Result<Arc<PolicyInput>, Arc<anyhow::Error>>,
}

/// Splits a VP token into the presentation subject followed by one subject per
/// embedded credential.
pub(crate) fn subjects(vp_token: &str) -> Result<(Subject, Vec<Subject>), VerificationError> {
    let vp_token = vp_token.trim();

    if vp_token.contains(SEPARATOR) {
        return sd_jwt_subjects(vp_token);
    }

    let jws = decode_jws(vp_token).map_err(|e| VerificationError::InvalidVpToken(e.to_string()))?;
    let payload = jws.payload;

    let credential_type = w3c_type(&payload)
        .or_else(|| payload.get("vct").and_then(Json::as_str))
        .unwrap_or(DEFAULT_PRESENTATION_TYPE)
        .to_owned();

    let credentials = match payload
        .get("vp")
        .and_then(|vp| vp.get("verifiableCredential"))
        .or_else(|| payload.get("verifiableCredential"))
    {
        Some(Json::Array(credentials)) => credentials.iter().map(credential_subject).collect(),
        Some(credential) => vec![credential_subject(credential)],
        None => {
            warn!(%credential_type, "presentation embeds no credentials");
            Vec::new()
        }
    };

    let data = match payload.get("vp") {
        Some(Json::Object(vp)) => vp.clone(),
        _ => payload.clone(),
    };
    let presentation = Subject {
        credential_type,
        input: Ok(Arc::new(PolicyInput {
            jwt: Some(vp_token.to_owned()),
            data,
            payload,
        })),
    };

    Ok((presentation, credentials))
}

/// An SD-JWT VC presentation is its own single credential.
fn sd_jwt_subjects(vp_token: &str) -> Result<(Subject, Vec<Subject>), VerificationError> {
    let (_, credential) =
        detect_and_parse(vp_token).map_err(|e| VerificationError::InvalidVpToken(e.to_string()))?;
    let input = Arc::new(
        policy_input(&credential).map_err(|e| VerificationError::InvalidVpToken(format!("{e:#}")))?,
    );
    let credential_type = credential
        .credential_type()
        .unwrap_or(DEFAULT_CREDENTIAL_TYPE)
        .to_owned();
    debug!(%credential_type, "verifying SD-JWT VC presentation");

    let presentation = Subject {
        credential_type: credential_type.clone(),
        input: Ok(input.clone()),
    };
    let credential = Subject {
        credential_type,
        input: Ok(input),
    };
    Ok((presentation, vec![credential]))
}

fn credential_subject(value: &Json) -> Subject {
    let parsed = match value {
        Json::String(raw) => detect_and_parse(raw).map_err(anyhow::Error::from),
        Json::Object(_) => detect_and_parse(&value.to_string()).map_err(anyhow::Error::from),
        other => Err(anyhow!("expected a string or an object, found {other}")),
    };

    let subject = parsed.and_then(|(detection, credential)| {
        debug!(?detection, "embedded credential detected");
        let credential_type = credential
            .credential_type()
            .unwrap_or(DEFAULT_CREDENTIAL_TYPE)
            .to_owned();
        Ok((credential_type, policy_input(&credential)?))
    });

    match subject {
        Ok((credential_type, input)) => Subject {
            credential_type,
            input: Ok(Arc::new(input)),
        },
        Err(e) => {
            let e = e.context("failed to parse embedded credential");
            warn!("{e:#}");
            Subject {
                credential_type: fallback_type(value),
                input: Err(Arc::new(e)),
            }
        }
    }
}

fn policy_input(credential: &DigitalCredential) -> Result<PolicyInput> {
    let data = credential.credential_data().clone();
    let body = credential.body();

    match (&body.signature, &body.signed) {
        (SignatureDescriptor::Jwt { .. }, Some(jwt)) => {
            let payload = decode_jws(jwt).context("invalid credential JWS")?.payload;
            Ok(PolicyInput {
                jwt: Some(jwt.clone()),
                data,
                payload,
            })
        }
        // Registered claims of an SD-JWT sit next to the disclosed ones.
        (SignatureDescriptor::SdJwt { .. }, Some(jwt)) => Ok(PolicyInput {
            jwt: Some(jwt.clone()),
            payload: data.clone(),
            data,
        }),
        (SignatureDescriptor::Jwt { .. } | SignatureDescriptor::SdJwt { .. }, None) => {
            bail!("JWT secured credential has no compact form")
        }
        _ => Ok(PolicyInput {
            jwt: None,
            payload: data.clone(),
            data,
        }),
    }
}

/// Best effort typing of a credential that could not be parsed.
fn fallback_type(value: &Json) -> String {
    let claims = match value {
        Json::Object(claims) => Some(claims.clone()),
        Json::String(raw) => decode_jws(raw).ok().map(|jws| jws.payload),
        _ => None,
    };
    claims
        .as_ref()
        .and_then(|claims| w3c_type(claims).or_else(|| claims.get("vct")?.as_str()))
        .unwrap_or(DEFAULT_CREDENTIAL_TYPE)
        .to_owned()
}
