//! The typed credential model produced by format detection.

use serde_json::{Map, Value as Json};

use super::{
    credential_format::ClaimFormatDesignation,
    disclosure::{self, Disclosable, Disclosure, DisclosureError, SelectivelyDisclosable},
};

pub mod detection;
pub mod mdoc;
pub mod parser;

pub use detection::{
    CredentialDetectionResult, CredentialPrimaryDataType, CredentialSubDataType,
    SignaturePrimaryType,
};
pub use parser::{detect_and_parse, CredentialParser, DetectionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum W3cSubtype {
    V1_1,
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdJwtVcSubtype {
    /// Carries a W3C `@context` alongside `vct`.
    Dm,
    Plain,
}

/// How a credential is secured.
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureDescriptor {
    None,
    Jwt {
        header: Map<String, Json>,
        /// The base64url signature segment.
        signature: String,
    },
    SdJwt {
        header: Map<String, Json>,
        signature: String,
        key_binding_jwt: Option<String>,
    },
    DataIntegrityProof {
        proof: Json,
    },
    Cose {
        x5c: Vec<String>,
    },
}

/// Fields common to every credential variant.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialBody {
    /// Compact signed form, without disclosures. `None` if unsigned.
    pub signed: Option<String>,
    /// The claim tree, with every supplied disclosure revealed.
    pub credential_data: Map<String, Json>,
    pub signature: SignatureDescriptor,
    /// Every digest the credential declares.
    pub disclosables: Option<Vec<Disclosable>>,
    /// The disclosures that were supplied with the credential.
    pub disclosures: Option<Vec<Disclosure>>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DigitalCredential {
    W3c {
        subtype: W3cSubtype,
        body: CredentialBody,
    },
    SdJwtVc {
        subtype: SdJwtVcSubtype,
        body: CredentialBody,
    },
    Mdoc {
        doc_type: String,
        body: CredentialBody,
    },
}

impl DigitalCredential {
    pub fn body(&self) -> &CredentialBody {
        match self {
            Self::W3c { body, .. } | Self::SdJwtVc { body, .. } | Self::Mdoc { body, .. } => body,
        }
    }

    pub(crate) fn body_mut(&mut self) -> &mut CredentialBody {
        match self {
            Self::W3c { body, .. } | Self::SdJwtVc { body, .. } | Self::Mdoc { body, .. } => body,
        }
    }

    pub fn credential_data(&self) -> &Map<String, Json> {
        &self.body().credential_data
    }

    pub fn signature(&self) -> &SignatureDescriptor {
        &self.body().signature
    }

    pub fn disclosures(&self) -> Option<&[Disclosure]> {
        self.body().disclosures.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.body().issuer.as_deref()
    }

    pub fn subject(&self) -> Option<&str> {
        self.body().subject.as_deref()
    }

    /// The DCQL format this credential answers to.
    pub fn format(&self) -> ClaimFormatDesignation {
        match self {
            Self::W3c { body, .. } => match body.signature {
                SignatureDescriptor::DataIntegrityProof { .. } => ClaimFormatDesignation::LdpVc,
                _ => ClaimFormatDesignation::JwtVcJson,
            },
            Self::SdJwtVc { .. } => ClaimFormatDesignation::DcSdJwt,
            Self::Mdoc { .. } => ClaimFormatDesignation::MsoMDoc,
        }
    }

    /// The most specific type name: the last W3C `type`, the SD-JWT VC `vct`
    /// or the mdoc document type.
    pub fn credential_type(&self) -> Option<&str> {
        match self {
            Self::W3c { body, .. } => w3c_type(&body.credential_data),
            Self::SdJwtVc { body, .. } => body.credential_data.get("vct")?.as_str(),
            Self::Mdoc { doc_type, .. } => Some(doc_type.as_str()),
        }
    }

    /// The disclosures needed to reveal the claim at `path`.
    pub fn select_disclosures(&self, path: &[String]) -> Vec<&Disclosure> {
        let body = self.body();
        match (&body.disclosables, &body.disclosures) {
            (Some(disclosables), Some(disclosures)) => {
                disclosure::disclosures_for_path(disclosables, disclosures, path)
            }
            _ => Vec::new(),
        }
    }

    /// Presents the credential revealing only `selected`.
    pub fn disclose<'a>(
        &self,
        selected: impl IntoIterator<Item = &'a Disclosure>,
    ) -> Result<String, DisclosureError> {
        disclosure::redact(self, selected)
    }
}

impl SelectivelyDisclosable for DigitalCredential {
    fn signed(&self) -> Option<&str> {
        self.body().signed.as_deref()
    }

    fn disclosables(&self) -> Option<&[Disclosable]> {
        self.body().disclosables.as_deref()
    }
}

/// The last entry of `type` (or `vc.type`, `vp.type`), which by convention is
/// the most specific.
pub fn w3c_type(data: &Map<String, Json>) -> Option<&str> {
    let types = data
        .get("type")
        .or_else(|| data.get("vc")?.get("type"))
        .or_else(|| data.get("vp")?.get("type"))?;

    match types {
        Json::String(t) => Some(t.as_str()),
        Json::Array(types) => types.last()?.as_str(),
        _ => None,
    }
}

/// `issuer` as a string or `{ "id": ... }`, falling back to `vc.issuer`.
pub(crate) fn data_issuer(data: &Map<String, Json>) -> Option<String> {
    string_or_id(data.get("issuer")).or_else(|| string_or_id(data.get("vc")?.get("issuer")))
}

/// `credentialSubject.id`, falling back to `vc.credentialSubject.id`.
pub(crate) fn data_subject(data: &Map<String, Json>) -> Option<String> {
    string_or_id(data.get("credentialSubject"))
        .or_else(|| string_or_id(data.get("vc")?.get("credentialSubject")))
}

fn string_or_id(value: Option<&Json>) -> Option<String> {
    match value? {
        Json::String(s) => Some(s.clone()),
        Json::Object(object) => object.get("id")?.as_str().map(ToOwned::to_owned),
        _ => None,
    }
}
