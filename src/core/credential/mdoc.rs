use std::fmt::Debug;

use anyhow::Result;
use serde_json::{Map, Value as Json};

/// Decodes CBOR mdoc structures (an ISO 18013-5 `DeviceResponse` or a bare
/// `Document`).
///
/// The CBOR/COSE codec lives outside this crate; the parser only needs the
/// document type, the issuer-signed elements and the issuer certificate chain.
pub trait MdocDecoder: Debug {
    fn decode(&self, bytes: &[u8]) -> Result<MdocDocument>;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MdocDocument {
    pub doc_type: String,
    /// Issuer-signed element values by namespace, then element identifier.
    pub namespaces: Map<String, Json>,
    /// Base64 DER certificates from the issuer auth `x5chain`.
    pub x5c: Vec<String>,
}

impl MdocDocument {
    /// The claim tree used for matching: `docType` beside one object per
    /// namespace.
    pub fn credential_data(&self) -> Map<String, Json> {
        let mut data = self.namespaces.clone();
        data.insert("docType".into(), Json::String(self.doc_type.clone()));
        data
    }
}
