use anyhow::{bail, Context, Error, Result};
use base64::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::ops::Deref;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "Vec<T>", into = "Vec<T>")]
pub struct NonEmptyVec<T: Clone>(Vec<T>);

impl<T: Clone> NonEmptyVec<T> {
    pub fn new(t: T) -> Self {
        Self(vec![t])
    }

    pub fn maybe_new(v: Vec<T>) -> Option<Self> {
        Self::try_from(v).ok()
    }

    pub fn push(&mut self, t: T) {
        self.0.push(t)
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T: Clone> TryFrom<Vec<T>> for NonEmptyVec<T> {
    type Error = Error;

    fn try_from(v: Vec<T>) -> Result<NonEmptyVec<T>, Error> {
        if v.is_empty() {
            bail!("cannot create a NonEmptyVec from an empty Vec")
        }
        Ok(NonEmptyVec(v))
    }
}

impl<T: Clone> From<NonEmptyVec<T>> for Vec<T> {
    fn from(NonEmptyVec(v): NonEmptyVec<T>) -> Vec<T> {
        v
    }
}

impl<T: Clone> AsRef<[T]> for NonEmptyVec<T> {
    fn as_ref(&self) -> &[T] {
        &self.0
    }
}

impl<T: Clone> Deref for NonEmptyVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

/// Returns `true` if `s` is a non-empty run of base64url characters, with at
/// most two trailing `=` padding characters.
pub fn is_base64url(s: &str) -> bool {
    let unpadded = s.trim_end_matches('=');
    if unpadded.is_empty() || s.len() - unpadded.len() > 2 {
        return false;
    }
    unpadded
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Decodes base64url, tolerating padding.
pub fn decode_base64url(s: &str) -> Result<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD
        .decode(s.trim_end_matches('='))
        .context("invalid base64url encoding")
}

/// Decodes a base64url segment holding a JSON document.
pub fn decode_base64url_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    let bytes = decode_base64url(s)?;
    serde_json::from_slice(&bytes).context("base64url segment is not valid JSON")
}

/// Returns `true` if `s` is an even-length, non-empty hexadecimal string.
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).context("invalid hex encoding")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_vec_rejects_empty() {
        assert!(NonEmptyVec::<u8>::maybe_new(vec![]).is_none());
        assert!(serde_json::from_str::<NonEmptyVec<u8>>("[]").is_err());
        assert_eq!(
            serde_json::from_str::<NonEmptyVec<u8>>("[1]").unwrap(),
            NonEmptyVec::new(1)
        );
    }

    #[test]
    fn encoding_detection() {
        assert!(is_hex("a1B2"));
        assert!(!is_hex("a1B"));
        assert!(!is_hex(""));
        assert!(is_base64url("eyJhbGciOiJFUzI1NiJ9"));
        assert!(is_base64url("ab=="));
        assert!(!is_base64url("ab==="));
        assert!(!is_base64url("a.b"));
        assert!(!is_base64url("a+b/"));
    }

    #[test]
    fn hex_decoding() {
        assert_eq!(decode_hex("00ff10").unwrap(), vec![0x00, 0xff, 0x10]);
        assert!(decode_hex("0g").is_err());
        assert!(decode_hex("abc").is_err());
    }
}
