//! Classifies raw credentials by shape and parses them into [`DigitalCredential`].

use std::{fmt, sync::Arc};

use serde_json::{Map, Value as Json};
use tracing::{debug, trace};

use super::{
    data_issuer, data_subject,
    detection::{
        CredentialDetectionResult, CredentialPrimaryDataType, CredentialSubDataType,
        SignaturePrimaryType,
    },
    mdoc::MdocDecoder,
    CredentialBody, DigitalCredential, SdJwtVcSubtype, SignatureDescriptor, W3cSubtype,
};
use crate::{
    core::{
        disclosure::{
            contains_sd_digests, declared_digests, reveal, Disclosure, DisclosureError,
            SdJwtParts, SD_ALG_KEY, SD_ALG_SHA_256, SEPARATOR,
        },
        jose::{decode_jws, is_jwt, JwsError},
    },
    utils::{decode_base64url, decode_hex, is_base64url, is_hex},
};

pub const DM_1_1_CONTEXTS: [&str; 2] = [
    "https://www.w3.org/2018/credentials/v1",
    "https://w3id.org/credentials/v1",
];

pub const DM_2_0_CONTEXTS: [&str; 4] = [
    "https://www.w3.org/ns/credentials/v2",
    "https://w3id.org/vc/status-list/2021/v1",
    "https://w3id.org/security/data-integrity/v1",
    "https://w3id.org/vc-revocation-list-2020/v1",
];

const DATA_INTEGRITY_PROOF: &str = "DataIntegrityProof";

/// Deepest envelope nesting accepted, e.g. a JWT wrapping a W3C credential.
pub const MAX_NESTING_DEPTH: usize = 2;

pub type Detected = (CredentialDetectionResult, DigitalCredential);

/// Detects the format of `raw` and parses it, without mdoc support.
pub fn detect_and_parse(raw: &str) -> Result<Detected, DetectionError> {
    CredentialParser::new().detect_and_parse(raw)
}

#[derive(Clone, Default)]
pub struct CredentialParser {
    mdoc_decoder: Option<Arc<dyn MdocDecoder + Send + Sync>>,
}

impl fmt::Debug for CredentialParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialParser")
            .field("mdoc_decoder", &self.mdoc_decoder)
            .finish()
    }
}

impl CredentialParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the codec used for hex and base64url encoded mdocs.
    pub fn with_mdoc_decoder(mut self, decoder: Arc<dyn MdocDecoder + Send + Sync>) -> Self {
        self.mdoc_decoder = Some(decoder);
        self
    }

    /// Classifies and parses a credential of unknown encoding.
    ///
    /// Shapes are tried in a fixed order, the first match wins:
    ///
    /// 1. a JSON object (unsigned, or secured with an embedded proof);
    /// 2. a compact JWT, either an SD-JWT when it carries `~` separated
    ///    disclosures, or an envelope whose payload (or its `vc` member) is
    ///    detected again;
    /// 3. a hex encoded mdoc;
    /// 4. a base64url encoded mdoc.
    pub fn detect_and_parse(&self, raw: &str) -> Result<Detected, DetectionError> {
        self.detect(raw, 0)
    }

    fn detect(&self, raw: &str, depth: usize) -> Result<Detected, DetectionError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(DetectionError::RecursionLimit);
        }

        let raw = raw.trim();

        if raw.starts_with('{') {
            trace!(depth, "detected JSON credential");
            return self.parse_json(raw);
        }

        let signed_core = raw.split(SEPARATOR).next().unwrap_or_default();
        if is_jwt(signed_core) {
            if raw.contains(SEPARATOR) {
                trace!(depth, "detected SD-JWT credential");
                return self.parse_sd_jwt(raw);
            }
            trace!(depth, "detected JWT credential");
            return self.parse_jwt(raw, depth);
        }

        if is_hex(raw) {
            trace!(depth, "detected hex encoded mdoc");
            let bytes = decode_hex(raw).map_err(DetectionError::malformed)?;
            return self.parse_mdoc(raw, &bytes);
        }

        if is_base64url(raw) {
            trace!(depth, "detected base64url encoded mdoc");
            let bytes = decode_base64url(raw).map_err(DetectionError::malformed)?;
            return self.parse_mdoc(raw, &bytes);
        }

        debug!("credential matches no known format");
        Err(DetectionError::UnrecognizedFormat)
    }

    fn parse_json(&self, raw: &str) -> Result<Detected, DetectionError> {
        let data: Map<String, Json> =
            serde_json::from_str(raw).map_err(DetectionError::malformed)?;
        let contains_disclosables = contains_sd_digests(&data);
        let disclosables = if contains_disclosables {
            Some(declared_digests(&data)?)
        } else {
            None
        };

        if let Some(proof) = data.get("proof") {
            let proof_type = proof
                .get("type")
                .and_then(Json::as_str)
                .ok_or_else(|| DetectionError::malformed("proof has no type"))?;

            if proof_type != DATA_INTEGRITY_PROOF {
                return Err(DetectionError::NotImplemented(format!(
                    "proof type `{proof_type}`"
                )));
            }
            if proof.get("cryptosuite").and_then(Json::as_str).is_none() {
                return Err(DetectionError::malformed(
                    "DataIntegrityProof has no cryptosuite",
                ));
            }

            let detection = CredentialDetectionResult::new(
                CredentialPrimaryDataType::W3c,
                CredentialSubDataType::W3c2,
                SignaturePrimaryType::DataIntegrityProof,
                contains_disclosables,
                false,
            );
            let body = CredentialBody {
                signed: Some(raw.to_owned()),
                signature: SignatureDescriptor::DataIntegrityProof {
                    proof: proof.clone(),
                },
                disclosables,
                disclosures: None,
                issuer: data_issuer(&data),
                subject: data_subject(&data),
                credential_data: data,
            };
            return Ok((
                detection,
                DigitalCredential::W3c {
                    subtype: W3cSubtype::V2,
                    body,
                },
            ));
        }

        let kind = if data.contains_key("@context") && data.contains_key("vct") {
            Kind::SdJwtVc(SdJwtVcSubtype::Dm)
        } else if data.contains_key("vct") {
            Kind::SdJwtVc(SdJwtVcSubtype::Plain)
        } else if data.contains_key("@context") && data.contains_key("type") {
            Kind::W3c(w3c_subtype(&data)?)
        } else {
            debug!("JSON credential has neither `vct` nor `@context` and `type`");
            return Err(DetectionError::UnrecognizedFormat);
        };

        let detection = kind.detection(SignaturePrimaryType::Unsigned, contains_disclosables, false);
        let body = CredentialBody {
            signed: None,
            signature: SignatureDescriptor::None,
            disclosables,
            disclosures: None,
            issuer: jwt_issuer(&data),
            subject: jwt_subject(&data),
            credential_data: data,
        };
        Ok((detection, kind.credential(body)))
    }

    fn parse_sd_jwt(&self, raw: &str) -> Result<Detected, DetectionError> {
        let parts = SdJwtParts::split(raw);
        let jws = decode_jws(parts.signed)?;

        if let Some(alg) = jws.payload.get(SD_ALG_KEY) {
            if alg.as_str() != Some(SD_ALG_SHA_256) {
                return Err(DetectionError::NotImplemented(format!("_sd_alg {alg}")));
            }
        }

        let kind = sd_jwt_kind(&jws.payload)?;

        let disclosures = parts
            .disclosures
            .iter()
            .map(|encoded| Disclosure::decode(encoded))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            disclosures = disclosures.len(),
            key_binding = parts.key_binding_jwt.is_some(),
            "parsing SD-JWT"
        );

        let revealed = reveal(&jws.payload, disclosures)?;
        if revealed.disclosables.is_empty() {
            return Err(DetectionError::malformed(
                "SD-JWT declares no selectively disclosable claims",
            ));
        }

        let detection = kind.detection(SignaturePrimaryType::SdJwt, true, true);
        let body = CredentialBody {
            signed: Some(parts.signed.to_owned()),
            signature: SignatureDescriptor::SdJwt {
                header: jws.header.clone(),
                signature: signature_segment(parts.signed),
                key_binding_jwt: parts.key_binding_jwt.map(ToOwned::to_owned),
            },
            disclosables: Some(revealed.disclosables),
            disclosures: Some(revealed.disclosures).filter(|d| !d.is_empty()),
            issuer: jwt_issuer(&revealed.claims),
            subject: jwt_subject(&revealed.claims),
            credential_data: revealed.claims,
        };
        Ok((detection, kind.credential(body)))
    }

    fn parse_jwt(&self, raw: &str, depth: usize) -> Result<Detected, DetectionError> {
        let jws = decode_jws(raw)?;

        let inner = match jws.payload.get("vc") {
            Some(Json::Object(vc)) => vc.clone(),
            _ => jws.payload.clone(),
        };
        let (detection, mut credential) = self.detect(&Json::Object(inner).to_string(), depth + 1)?;

        let body = credential.body_mut();
        body.signed = Some(raw.to_owned());
        body.signature = SignatureDescriptor::Jwt {
            header: jws.header.clone(),
            signature: signature_segment(raw),
        };
        if let Some(iss) = string_claim(&jws.payload, "iss") {
            body.issuer = Some(iss);
        }
        if let Some(sub) = string_claim(&jws.payload, "sub") {
            body.subject = Some(sub);
        }

        Ok((detection.jwt_wrapped(), credential))
    }

    fn parse_mdoc(&self, raw: &str, bytes: &[u8]) -> Result<Detected, DetectionError> {
        let Some(decoder) = &self.mdoc_decoder else {
            return Err(DetectionError::NotImplemented(
                "no mdoc decoder configured".into(),
            ));
        };
        let document = decoder
            .decode(bytes)
            .map_err(|e| DetectionError::MalformedInput(format!("mdoc: {e:#}")))?;
        debug!(doc_type = %document.doc_type, "parsed mdoc");

        let has_elements = !document.namespaces.is_empty();
        let detection = CredentialDetectionResult::new(
            CredentialPrimaryDataType::Mdocs,
            CredentialSubDataType::Mdocs,
            SignaturePrimaryType::Cose,
            has_elements,
            has_elements,
        );
        let body = CredentialBody {
            signed: Some(raw.to_owned()),
            credential_data: document.credential_data(),
            signature: SignatureDescriptor::Cose { x5c: document.x5c },
            disclosables: None,
            disclosures: None,
            issuer: None,
            subject: None,
        };
        Ok((
            detection,
            DigitalCredential::Mdoc {
                doc_type: document.doc_type,
                body,
            },
        ))
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    W3c(W3cSubtype),
    SdJwtVc(SdJwtVcSubtype),
}

impl Kind {
    fn detection(
        self,
        signature: SignaturePrimaryType,
        contains_disclosables: bool,
        provides_disclosures: bool,
    ) -> CredentialDetectionResult {
        let (primary, sub) = match self {
            Kind::W3c(W3cSubtype::V1_1) => {
                (CredentialPrimaryDataType::W3c, CredentialSubDataType::W3c1_1)
            }
            Kind::W3c(W3cSubtype::V2) => (CredentialPrimaryDataType::W3c, CredentialSubDataType::W3c2),
            Kind::SdJwtVc(SdJwtVcSubtype::Dm) => {
                (CredentialPrimaryDataType::SdJwtVc, CredentialSubDataType::SdJwtVcDm)
            }
            Kind::SdJwtVc(SdJwtVcSubtype::Plain) => {
                (CredentialPrimaryDataType::SdJwtVc, CredentialSubDataType::SdJwtVc)
            }
        };
        CredentialDetectionResult::new(
            primary,
            sub,
            signature,
            contains_disclosables,
            provides_disclosures,
        )
    }

    fn credential(self, body: CredentialBody) -> DigitalCredential {
        match self {
            Kind::W3c(subtype) => DigitalCredential::W3c { subtype, body },
            Kind::SdJwtVc(subtype) => DigitalCredential::SdJwtVc { subtype, body },
        }
    }
}

/// SD-JWT payloads are classified with `@context` taking precedence over a
/// bare `vct`, descending into `vc` for JWT-VC style payloads.
fn sd_jwt_kind(payload: &Map<String, Json>) -> Result<Kind, DetectionError> {
    let has = |key: &str| payload.contains_key(key);

    if has("@context") && has("vct") {
        Ok(Kind::SdJwtVc(SdJwtVcSubtype::Dm))
    } else if has("@context") || has("type") {
        Ok(Kind::W3c(w3c_subtype(payload)?))
    } else if has("vct") {
        Ok(Kind::SdJwtVc(SdJwtVcSubtype::Plain))
    } else if let Some(Json::Object(vc)) = payload.get("vc") {
        sd_jwt_kind(vc)
    } else {
        Err(DetectionError::UnrecognizedFormat)
    }
}

fn w3c_subtype(data: &Map<String, Json>) -> Result<W3cSubtype, DetectionError> {
    let contexts: Vec<&str> = match data.get("@context") {
        Some(Json::Array(contexts)) => contexts.iter().filter_map(Json::as_str).collect(),
        Some(Json::String(context)) => vec![context.as_str()],
        _ => return Err(DetectionError::UnknownContext("no @context".into())),
    };

    if DM_2_0_CONTEXTS.iter().any(|c| contexts.contains(c)) {
        Ok(W3cSubtype::V2)
    } else if DM_1_1_CONTEXTS.iter().any(|c| contexts.contains(c)) {
        Ok(W3cSubtype::V1_1)
    } else {
        Err(DetectionError::UnknownContext(contexts.join(", ")))
    }
}

fn signature_segment(compact: &str) -> String {
    compact.rsplit('.').next().unwrap_or_default().to_owned()
}

fn string_claim(data: &Map<String, Json>, key: &str) -> Option<String> {
    data.get(key)?.as_str().map(ToOwned::to_owned)
}

fn jwt_issuer(data: &Map<String, Json>) -> Option<String> {
    string_claim(data, "iss").or_else(|| data_issuer(data))
}

fn jwt_subject(data: &Map<String, Json>) -> Option<String> {
    string_claim(data, "sub").or_else(|| data_subject(data))
}

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("unrecognized credential format")]
    UnrecognizedFormat,

    #[error("malformed credential: {0}")]
    MalformedInput(String),

    #[error("unknown W3C data model: {0}")]
    UnknownContext(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("credential envelopes nested deeper than {MAX_NESTING_DEPTH} levels")]
    RecursionLimit,
}

impl DetectionError {
    pub fn malformed(e: impl ToString) -> Self {
        Self::MalformedInput(e.to_string())
    }
}

impl From<DisclosureError> for DetectionError {
    fn from(e: DisclosureError) -> Self {
        Self::malformed(e)
    }
}

impl From<JwsError> for DetectionError {
    fn from(e: JwsError) -> Self {
        Self::malformed(e)
    }
}
