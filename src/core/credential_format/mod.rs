use core::fmt;
use std::{borrow::Cow, str::FromStr};

use serde::{Deserialize, Serialize};

const FORMAT_JWT_VC_JSON: &str = "jwt_vc_json";
const FORMAT_LDP_VC: &str = "ldp_vc";
const FORMAT_DC_SD_JWT: &str = "dc+sd-jwt";
const FORMAT_AC_VC: &str = "ac_vc";
const FORMAT_MSO_MDOC: &str = "mso_mdoc";

/// Credential format identifiers, as used by the `format` member of a DCQL
/// credential query.
///
/// See [OID4VP 1.0 Appendix B](https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#appendix-B).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ClaimFormatDesignation {
    /// W3C Verifiable Credentials secured as a JWT, without JSON-LD processing.
    JwtVcJson,

    /// W3C Verifiable Credentials secured with a Data Integrity proof.
    LdpVc,

    /// IETF SD-JWT VC.
    DcSdJwt,

    /// AnonCreds credentials.
    AcVc,

    /// ISO/IEC 18013-5 mobile documents.
    MsoMDoc,

    /// Other claim format designations not covered by the above.
    ///
    /// The value of this variant is the name of the claim format designation.
    Other(String),
}

impl ClaimFormatDesignation {
    pub fn from_name(name: Cow<str>) -> Self {
        match name.as_ref() {
            FORMAT_JWT_VC_JSON => Self::JwtVcJson,
            FORMAT_LDP_VC => Self::LdpVc,
            FORMAT_DC_SD_JWT => Self::DcSdJwt,
            FORMAT_AC_VC => Self::AcVc,
            FORMAT_MSO_MDOC => Self::MsoMDoc,
            _ => Self::Other(name.into_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::JwtVcJson => FORMAT_JWT_VC_JSON,
            Self::LdpVc => FORMAT_LDP_VC,
            Self::DcSdJwt => FORMAT_DC_SD_JWT,
            Self::AcVc => FORMAT_AC_VC,
            Self::MsoMDoc => FORMAT_MSO_MDOC,
            Self::Other(other) => other,
        }
    }

    /// Whether credentials of this format are W3C data model credentials,
    /// whose metadata is constrained by `type_values`.
    pub fn is_w3c(&self) -> bool {
        matches!(self, Self::JwtVcJson | Self::LdpVc)
    }
}

impl From<&str> for ClaimFormatDesignation {
    fn from(s: &str) -> Self {
        Self::from_name(Cow::Borrowed(s))
    }
}

impl From<String> for ClaimFormatDesignation {
    fn from(value: String) -> Self {
        Self::from_name(Cow::Owned(value))
    }
}

impl FromStr for ClaimFormatDesignation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl fmt::Display for ClaimFormatDesignation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl Serialize for ClaimFormatDesignation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.name().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ClaimFormatDesignation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn known_and_custom_designations() {
        let formats: Vec<ClaimFormatDesignation> =
            serde_json::from_value(json!(["dc+sd-jwt", "mso_mdoc", "vc+sd-jwt"])).unwrap();

        assert_eq!(formats[0], ClaimFormatDesignation::DcSdJwt);
        assert_eq!(formats[1], ClaimFormatDesignation::MsoMDoc);
        assert_eq!(formats[2], ClaimFormatDesignation::Other("vc+sd-jwt".into()));
        assert_eq!(
            serde_json::to_value(&formats).unwrap(),
            json!(["dc+sd-jwt", "mso_mdoc", "vc+sd-jwt"])
        );
        assert!(ClaimFormatDesignation::LdpVc.is_w3c());
        assert!(!ClaimFormatDesignation::DcSdJwt.is_w3c());
    }
}
