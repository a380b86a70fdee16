use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialPrimaryDataType {
    #[serde(rename = "W3C")]
    W3c,
    #[serde(rename = "SDJWTVC")]
    SdJwtVc,
    #[serde(rename = "MDOCS")]
    Mdocs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialSubDataType {
    /// W3C VC Data Model 1.1.
    #[serde(rename = "W3C_1_1")]
    W3c1_1,
    /// W3C VC Data Model 2.0.
    #[serde(rename = "W3C_2")]
    W3c2,
    /// SD-JWT VC carrying a W3C `@context`.
    #[serde(rename = "sdjwtvcdm")]
    SdJwtVcDm,
    #[serde(rename = "sdjwtvc")]
    SdJwtVc,
    #[serde(rename = "mdocs")]
    Mdocs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignaturePrimaryType {
    Unsigned,
    Jwt,
    #[serde(rename = "SDJWT")]
    SdJwt,
    DataIntegrityProof,
    Cose,
}

/// How a raw credential was classified.
///
/// Constructed only through [`CredentialDetectionResult::new`] (or
/// deserialization, which applies the same checks), so the combination of
/// signature kind and disclosure flags is always consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDetectionResult", rename_all = "camelCase")]
pub struct CredentialDetectionResult {
    credential_primary_type: CredentialPrimaryDataType,
    credential_sub_type: CredentialSubDataType,
    signature_primary: SignaturePrimaryType,
    contains_disclosables: bool,
    provides_disclosures: bool,
}

impl CredentialDetectionResult {
    /// # Panics
    ///
    /// Panics if the flags contradict the signature kind: an SD-JWT always
    /// provides disclosures, JWT and unsigned credentials never do, and
    /// providing disclosures implies containing disclosables. Such a result
    /// is a detector bug, not bad input.
    pub fn new(
        credential_primary_type: CredentialPrimaryDataType,
        credential_sub_type: CredentialSubDataType,
        signature_primary: SignaturePrimaryType,
        contains_disclosables: bool,
        provides_disclosures: bool,
    ) -> Self {
        let raw = RawDetectionResult {
            credential_primary_type,
            credential_sub_type,
            signature_primary,
            contains_disclosables,
            provides_disclosures,
        };
        match Self::try_from(raw) {
            Ok(result) => result,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn credential_primary_type(&self) -> CredentialPrimaryDataType {
        self.credential_primary_type
    }

    pub fn credential_sub_type(&self) -> CredentialSubDataType {
        self.credential_sub_type
    }

    pub fn signature_primary(&self) -> SignaturePrimaryType {
        self.signature_primary
    }

    pub fn contains_disclosables(&self) -> bool {
        self.contains_disclosables
    }

    pub fn provides_disclosures(&self) -> bool {
        self.provides_disclosures
    }

    /// The same classification, reached through a JWT envelope.
    pub(crate) fn jwt_wrapped(self) -> Self {
        Self::new(
            self.credential_primary_type,
            self.credential_sub_type,
            SignaturePrimaryType::Jwt,
            self.contains_disclosables,
            false,
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetectionResult {
    credential_primary_type: CredentialPrimaryDataType,
    credential_sub_type: CredentialSubDataType,
    signature_primary: SignaturePrimaryType,
    contains_disclosables: bool,
    provides_disclosures: bool,
}

impl TryFrom<RawDetectionResult> for CredentialDetectionResult {
    type Error = String;

    fn try_from(raw: RawDetectionResult) -> Result<Self, Self::Error> {
        use SignaturePrimaryType::*;

        match raw.signature_primary {
            SdJwt if !raw.provides_disclosures => {
                return Err("an SD-JWT credential must provide disclosures".into())
            }
            Jwt | Unsigned if raw.provides_disclosures => {
                return Err(format!(
                    "a {:?} credential cannot provide disclosures",
                    raw.signature_primary
                ))
            }
            _ => {}
        }

        if raw.provides_disclosures && !raw.contains_disclosables {
            return Err("providing disclosures requires disclosables".into());
        }

        Ok(Self {
            credential_primary_type: raw.credential_primary_type,
            credential_sub_type: raw.credential_sub_type,
            signature_primary: raw.signature_primary,
            contains_disclosables: raw.contains_disclosables,
            provides_disclosures: raw.provides_disclosures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use super::{
        CredentialPrimaryDataType as Primary, CredentialSubDataType as Sub,
        SignaturePrimaryType as Sig,
    };

    #[test]
    fn consistent_results() {
        let result = CredentialDetectionResult::new(Primary::SdJwtVc, Sub::SdJwtVc, Sig::SdJwt, true, true);
        assert!(result.provides_disclosures());

        let result = CredentialDetectionResult::new(Primary::Mdocs, Sub::Mdocs, Sig::Cose, false, false);
        assert!(!result.contains_disclosables());

        let wrapped =
            CredentialDetectionResult::new(Primary::W3c, Sub::W3c2, Sig::Unsigned, true, false).jwt_wrapped();
        assert_eq!(wrapped.signature_primary(), Sig::Jwt);
        assert!(wrapped.contains_disclosables());
    }

    #[test]
    #[should_panic(expected = "must provide disclosures")]
    fn sd_jwt_without_disclosures() {
        CredentialDetectionResult::new(Primary::SdJwtVc, Sub::SdJwtVc, Sig::SdJwt, true, false);
    }

    #[test]
    #[should_panic(expected = "cannot provide disclosures")]
    fn jwt_providing_disclosures() {
        CredentialDetectionResult::new(Primary::W3c, Sub::W3c1_1, Sig::Jwt, true, true);
    }

    #[test]
    #[should_panic(expected = "cannot provide disclosures")]
    fn unsigned_providing_disclosures() {
        CredentialDetectionResult::new(Primary::SdJwtVc, Sub::SdJwtVcDm, Sig::Unsigned, true, true);
    }

    #[test]
    #[should_panic(expected = "requires disclosables")]
    fn disclosures_without_disclosables() {
        CredentialDetectionResult::new(Primary::Mdocs, Sub::Mdocs, Sig::Cose, false, true);
    }

    #[test]
    fn deserialization_rejects_inconsistent_flags() {
        let valid = json!({
            "credentialPrimaryType": "SDJWTVC",
            "credentialSubType": "sdjwtvc",
            "signaturePrimary": "UNSIGNED",
            "containsDisclosables": true,
            "providesDisclosures": false
        });
        let result: CredentialDetectionResult = serde_json::from_value(valid.clone()).unwrap();
        assert_eq!(serde_json::to_value(result).unwrap(), valid);

        let mut invalid = valid;
        invalid["providesDisclosures"] = json!(true);
        assert!(serde_json::from_value::<CredentialDetectionResult>(invalid).is_err());
    }
}
