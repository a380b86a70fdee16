//! SD-JWT selective disclosure: digests, payload reconstruction and redaction.
//!
//! See [RFC 9901](https://www.rfc-editor.org/rfc/rfc9901.html).

use std::collections::{HashMap, HashSet};

use base64::prelude::*;
use serde_json::{json, Map, Value as Json};
use sha2::{Digest, Sha256};

use crate::utils::decode_base64url_json;

/// The only hash algorithm accepted in `_sd_alg`.
pub const SD_ALG_SHA_256: &str = "sha-256";

/// Separates the issuer-signed JWT, the disclosures and the key-binding JWT.
pub const SEPARATOR: char = '~';

pub(crate) const SD_KEY: &str = "_sd";
pub(crate) const SD_ALG_KEY: &str = "_sd_alg";
const ARRAY_ELEMENT_KEY: &str = "...";

/// Computes the digest of an encoded disclosure.
///
/// The hash input is the ASCII of the base64url string as received, not the
/// decoded JSON.
pub fn digest(encoded: &str) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(encoded.as_bytes()))
}

/// A `[salt, claim_name, claim_value]` disclosure, or a `[salt, claim_value]`
/// array element disclosure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disclosure {
    salt: String,
    claim_name: Option<String>,
    claim_value: Json,
    encoded: String,
    digest: String,
}

impl Disclosure {
    /// Creates an object property disclosure, encoded as compact JSON.
    pub fn new(salt: impl Into<String>, claim_name: impl Into<String>, claim_value: Json) -> Self {
        Self::encode(salt.into(), Some(claim_name.into()), claim_value)
    }

    /// Creates an array element disclosure, encoded as compact JSON.
    pub fn new_array_element(salt: impl Into<String>, claim_value: Json) -> Self {
        Self::encode(salt.into(), None, claim_value)
    }

    fn encode(salt: String, claim_name: Option<String>, claim_value: Json) -> Self {
        let array = match &claim_name {
            Some(name) => json!([salt, name, claim_value]),
            None => json!([salt, claim_value]),
        };
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(array.to_string());
        let digest = digest(&encoded);
        Self {
            salt,
            claim_name,
            claim_value,
            encoded,
            digest,
        }
    }

    /// Decodes a disclosure, keeping `encoded` verbatim for digest computation.
    pub fn decode(encoded: &str) -> Result<Self, DisclosureError> {
        let array: Vec<Json> = decode_base64url_json(encoded).map_err(DisclosureError::malformed)?;

        let (salt, claim_name, claim_value) = match <[Json; 3]>::try_from(array) {
            Ok([salt, Json::String(name), value]) => (salt, Some(name), value),
            Ok(_) => return Err(DisclosureError::malformed("claim name must be a string")),
            Err(array) => match <[Json; 2]>::try_from(array) {
                Ok([salt, value]) => (salt, None, value),
                Err(array) => {
                    return Err(DisclosureError::Malformed(format!(
                        "expected 2 or 3 elements, found {}",
                        array.len()
                    )))
                }
            },
        };

        let Json::String(salt) = salt else {
            return Err(DisclosureError::malformed("salt must be a string"));
        };

        if matches!(claim_name.as_deref(), Some(SD_KEY | ARRAY_ELEMENT_KEY)) {
            return Err(DisclosureError::malformed("reserved claim name"));
        }

        Ok(Self {
            salt,
            claim_name,
            claim_value,
            encoded: encoded.to_owned(),
            digest: digest(encoded),
        })
    }

    /// Encodes the JSON array text `contents` as is, whitespace included.
    pub fn from_json(contents: &str) -> Result<Self, DisclosureError> {
        Self::decode(&BASE64_URL_SAFE_NO_PAD.encode(contents))
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// `None` for array element disclosures.
    pub fn claim_name(&self) -> Option<&str> {
        self.claim_name.as_deref()
    }

    pub fn claim_value(&self) -> &Json {
        &self.claim_value
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// A digest declared by a credential, either in an `_sd` array or as a
/// `{"...": digest}` array element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disclosable {
    digest: String,
    parent: Vec<String>,
    claim_path: Option<Vec<String>>,
}

impl Disclosable {
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Path of the object or array declaring the digest.
    pub fn parent(&self) -> &[String] {
        &self.parent
    }

    /// Path of the revealed claim, if a disclosure for this digest was supplied.
    pub fn claim_path(&self) -> Option<&[String]> {
        self.claim_path.as_deref()
    }
}

/// Something that can be presented with a chosen subset of its disclosures.
pub trait SelectivelyDisclosable {
    /// The issuer-signed compact form, without disclosures.
    fn signed(&self) -> Option<&str>;

    fn disclosables(&self) -> Option<&[Disclosable]>;
}

/// Presents `credential` revealing only `selected`.
///
/// The output is `signed~d1~...~dn~`; with nothing selected it is `signed~`.
pub fn redact<'a, C, I>(credential: &C, selected: I) -> Result<String, DisclosureError>
where
    C: SelectivelyDisclosable + ?Sized,
    I: IntoIterator<Item = &'a Disclosure>,
{
    let signed = credential.signed().ok_or(DisclosureError::NotSigned)?;
    let declared = credential.disclosables().unwrap_or_default();

    let mut presentation = String::from(signed);
    presentation.push(SEPARATOR);
    for disclosure in selected {
        if !declared.iter().any(|d| d.digest == disclosure.digest) {
            return Err(DisclosureError::DisclosureNotDeclared(
                disclosure.digest.clone(),
            ));
        }
        presentation.push_str(&disclosure.encoded);
        presentation.push(SEPARATOR);
    }

    Ok(presentation)
}

/// Returns the disclosures that must be revealed for the claim at `path` to be
/// visible: the claim's own disclosure and those of every enclosing disclosed
/// object.
pub fn disclosures_for_path<'a>(
    disclosables: &[Disclosable],
    disclosures: &'a [Disclosure],
    path: &[String],
) -> Vec<&'a Disclosure> {
    disclosables
        .iter()
        .filter(|d| {
            d.claim_path
                .as_deref()
                .is_some_and(|claim_path| path.starts_with(claim_path))
        })
        .filter_map(|d| disclosures.iter().find(|disc| disc.digest == d.digest))
        .collect()
}

/// The components of a combined SD-JWT string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdJwtParts<'a> {
    pub signed: &'a str,
    pub disclosures: Vec<&'a str>,
    pub key_binding_jwt: Option<&'a str>,
}

impl<'a> SdJwtParts<'a> {
    /// Splits `signed~d1~...~dn~[kb-jwt]`.
    ///
    /// Empty segments are ignored. A trailing segment containing `.` is a
    /// key-binding JWT, since encoded disclosures never contain one.
    pub fn split(raw: &'a str) -> Self {
        let mut segments = raw.split(SEPARATOR);
        let signed = segments.next().unwrap_or_default();
        let mut disclosures: Vec<&str> = segments.filter(|s| !s.is_empty()).collect();

        let key_binding_jwt = match disclosures.last() {
            Some(last) if last.contains('.') => disclosures.pop(),
            _ => None,
        };

        Self {
            signed,
            disclosures,
            key_binding_jwt,
        }
    }

    /// The disclosures joined back with the separator.
    pub fn disclosure_string(&self) -> String {
        self.disclosures.join("~")
    }
}

/// A payload with every supplied disclosure substituted in.
#[derive(Debug, Clone)]
pub struct RevealedPayload {
    pub claims: Map<String, Json>,
    pub disclosables: Vec<Disclosable>,
    pub disclosures: Vec<Disclosure>,
}

/// Rebuilds the full claim set of an SD-JWT payload.
///
/// `_sd` digests and `{"...": digest}` array elements are replaced by their
/// disclosed claims, recursively including inside disclosed values; undisclosed
/// digests are dropped. Every disclosure must be referenced exactly once, and
/// no digest may appear more than once in the payload.
pub fn reveal(
    payload: &Map<String, Json>,
    disclosures: Vec<Disclosure>,
) -> Result<RevealedPayload, DisclosureError> {
    let mut pending = HashMap::with_capacity(disclosures.len());
    for disclosure in &disclosures {
        if pending
            .insert(disclosure.digest.clone(), disclosure.clone())
            .is_some()
        {
            return Err(DisclosureError::Malformed(format!(
                "duplicate disclosure {}",
                disclosure.digest
            )));
        }
    }

    let mut revealer = Revealer {
        pending,
        seen: HashSet::new(),
        disclosables: Vec::new(),
    };
    let mut claims = revealer.object(payload, &mut Vec::new())?;
    claims.remove(SD_ALG_KEY);

    if let Some(unused) = revealer.pending.keys().next() {
        return Err(DisclosureError::Malformed(format!(
            "disclosure {unused} is not referenced by the credential"
        )));
    }

    Ok(RevealedPayload {
        claims,
        disclosables: revealer.disclosables,
        disclosures,
    })
}

/// Collects the digests declared in a payload without revealing anything.
pub fn declared_digests(payload: &Map<String, Json>) -> Result<Vec<Disclosable>, DisclosureError> {
    reveal(payload, Vec::new()).map(|revealed| revealed.disclosables)
}

struct Revealer {
    pending: HashMap<String, Disclosure>,
    seen: HashSet<String>,
    disclosables: Vec<Disclosable>,
}

impl Revealer {
    fn object(
        &mut self,
        object: &Map<String, Json>,
        path: &mut Vec<String>,
    ) -> Result<Map<String, Json>, DisclosureError> {
        let mut out = Map::new();

        for (key, value) in object {
            if key == SD_KEY {
                continue;
            }
            path.push(key.clone());
            let value = self.value(value, path)?;
            path.pop();
            out.insert(key.clone(), value);
        }

        let Some(digests) = object.get(SD_KEY) else {
            return Ok(out);
        };
        let Json::Array(digests) = digests else {
            return Err(DisclosureError::malformed("`_sd` must be an array"));
        };

        for digest in digests {
            let Json::String(digest) = digest else {
                return Err(DisclosureError::malformed("`_sd` entries must be strings"));
            };

            let Some(disclosure) = self.pending.remove(digest) else {
                self.declare(digest, path, None)?;
                continue;
            };

            let Some(name) = disclosure.claim_name.clone() else {
                return Err(DisclosureError::Malformed(format!(
                    "array element disclosure {digest} referenced from an object"
                )));
            };
            if out.contains_key(&name) {
                return Err(DisclosureError::Malformed(format!(
                    "disclosed claim `{name}` already present"
                )));
            }

            let mut claim_path = path.clone();
            claim_path.push(name.clone());
            self.declare(digest, path, Some(claim_path.clone()))?;

            let value = self.value(&disclosure.claim_value, &mut claim_path)?;
            out.insert(name, value);
        }

        Ok(out)
    }

    fn array(&mut self, array: &[Json], path: &mut Vec<String>) -> Result<Json, DisclosureError> {
        let mut out = Vec::with_capacity(array.len());

        for element in array {
            let index = out.len().to_string();

            let Some(digest) = array_element_digest(element) else {
                path.push(index);
                out.push(self.value(element, path)?);
                path.pop();
                continue;
            };

            let Some(disclosure) = self.pending.remove(digest) else {
                self.declare(digest, path, None)?;
                continue;
            };

            if disclosure.claim_name.is_some() {
                return Err(DisclosureError::Malformed(format!(
                    "object property disclosure {digest} referenced from an array"
                )));
            }

            let mut claim_path = path.clone();
            claim_path.push(index);
            self.declare(digest, path, Some(claim_path.clone()))?;
            out.push(self.value(&disclosure.claim_value, &mut claim_path)?);
        }

        Ok(Json::Array(out))
    }

    fn value(&mut self, value: &Json, path: &mut Vec<String>) -> Result<Json, DisclosureError> {
        match value {
            Json::Object(object) => self.object(object, path).map(Json::Object),
            Json::Array(array) => self.array(array, path),
            other => Ok(other.clone()),
        }
    }

    fn declare(
        &mut self,
        digest: &str,
        parent: &[String],
        claim_path: Option<Vec<String>>,
    ) -> Result<(), DisclosureError> {
        if !self.seen.insert(digest.to_owned()) {
            return Err(DisclosureError::Malformed(format!(
                "digest {digest} appears more than once"
            )));
        }
        self.disclosables.push(Disclosable {
            digest: digest.to_owned(),
            parent: parent.to_vec(),
            claim_path,
        });
        Ok(())
    }
}

fn array_element_digest(element: &Json) -> Option<&str> {
    let object = element.as_object()?;
    if object.len() != 1 {
        return None;
    }
    object.get(ARRAY_ELEMENT_KEY)?.as_str()
}

/// Returns `true` if `_sd` appears anywhere in the claim tree.
pub fn contains_sd_digests(object: &Map<String, Json>) -> bool {
    fn value_contains(value: &Json) -> bool {
        match value {
            Json::Object(object) => contains_sd_digests(object),
            Json::Array(array) => array.iter().any(value_contains),
            _ => false,
        }
    }

    object.contains_key(SD_KEY) || object.values().any(value_contains)
}

#[derive(Debug, thiserror::Error)]
pub enum DisclosureError {
    /// A selected disclosure's digest is not declared by the credential.
    #[error("disclosure with digest {0} is not declared by the credential")]
    DisclosureNotDeclared(String),

    #[error("credential has no signed form to present")]
    NotSigned,

    #[error("malformed disclosure: {0}")]
    Malformed(String),
}

impl DisclosureError {
    pub fn malformed(e: impl ToString) -> Self {
        Self::Malformed(e.to_string())
    }
}
